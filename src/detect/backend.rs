use anyhow::Result;

use crate::detect::result::Bbox;
use crate::frame::Frame;

/// Object detector consulted once per monitor tick.
///
/// The monitor only needs to know whether anything was found; the boxes are
/// passed through for callers that want them.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame already scaled to the configured frame size.
    fn predict(&mut self, frame: &Frame) -> Result<Vec<Bbox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: ObjectDetector + ?Sized> ObjectDetector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn predict(&mut self, frame: &Frame) -> Result<Vec<Bbox>> {
        (**self).predict(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
