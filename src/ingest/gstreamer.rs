//! GStreamer-backed streams (feature: rtsp-gstreamer).
//!
//! One pipeline per connection, ending in an RGB appsink that keeps only the
//! newest buffer. Errors and EOS on the bus, or a stalled sink, surface as read
//! errors so the frame source tears the pipeline down and reconnects.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;

use super::VideoStream;
use crate::frame::{Frame, PixelFormat};

pub(crate) struct GstreamerStream {
    uri: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_timeout: Duration,
}

impl GstreamerStream {
    pub(crate) fn open(uri: &str, width: u32, height: u32, target_fps: u32) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "{} ! videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={} ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            source_element(uri),
            width,
            height
        );
        let pipeline = gstreamer::parse::launch(&description)
            .with_context(|| format!("build pipeline for {}", uri))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("pipeline for {} is not a Pipeline", uri))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("set pipeline for {} to Playing", uri))?;

        let base_ms = if target_fps == 0 {
            2_000
        } else {
            (1000 / target_fps).saturating_mul(20)
        };

        Ok(Self {
            uri: uri.to_string(),
            pipeline,
            appsink,
            frame_timeout: Duration::from_millis(base_ms.max(2_000) as u64),
        })
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Err(anyhow!("{} reached end of stream", self.uri)),
                _ => {}
            }
        }
        Ok(())
    }
}

fn source_element(uri: &str) -> String {
    if uri.starts_with("rtsp://") {
        format!("rtspsrc location={} latency=0 ! decodebin", uri)
    } else if uri.starts_with("/dev/video") {
        format!("v4l2src device={} ! decodebin", uri)
    } else if uri.contains("://") {
        format!("uridecodebin uri={}", uri)
    } else {
        format!("filesrc location={} ! decodebin", uri)
    }
}

impl VideoStream for GstreamerStream {
    fn read_frame(&mut self) -> Result<Frame> {
        self.check_bus()?;

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout.as_millis() as u64);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("{} stalled", self.uri))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Frame::new(pixels, width, height, PixelFormat::Rgb8)
    }
}

impl Drop for GstreamerStream {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop pipeline for {}: {}", self.uri, err);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("buffer shorter than frame")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).context("buffer row is out of bounds")?);
    }

    Ok((pixels, width, height))
}
