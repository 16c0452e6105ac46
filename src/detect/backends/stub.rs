use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::ObjectDetector;
use crate::detect::result::Bbox;
use crate::frame::Frame;

/// Stub detector for testing and `stub://` cameras.
///
/// Hashes each frame and reports one full-frame box whenever the content differs
/// from the previous frame.
#[derive(Default)]
pub struct StubDetector {
    last_hash: Option<[u8; 32]>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn predict(&mut self, frame: &Frame) -> Result<Vec<Bbox>> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();

        let motion = self.last_hash.is_some_and(|prev| prev != current_hash);

        self.last_hash = Some(current_hash);

        if motion {
            Ok(vec![Bbox {
                cx: 0.5,
                cy: 0.5,
                w: 1.0,
                h: 1.0,
                confidence: 0.85,
                class_id: 0,
            }])
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn frame(value: u8) -> Frame {
        Frame::new(vec![value; 16], 4, 4, PixelFormat::Gray8).unwrap()
    }

    #[test]
    fn stub_detector_reports_changes() {
        let mut detector = StubDetector::new();

        assert!(detector.predict(&frame(1)).unwrap().is_empty());

        let boxes = detector.predict(&frame(2)).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].confidence, 0.85);

        assert!(detector.predict(&frame(2)).unwrap().is_empty());
    }
}
