mod backend;
mod backends;
mod result;

use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub use backend::ObjectDetector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::{TractYolo, YoloConfig};
pub use result::{non_max_suppression, Bbox, PixelRect};

/// Which detector to build and how.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorConfig {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub iou: f32,
    pub n_classes: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: "stub".to_string(),
            model_path: None,
            width: 640,
            height: 480,
            confidence: 0.5,
            iou: 0.45,
            n_classes: 1,
        }
    }
}

/// Build the configured detector backend.
pub fn build_detector(config: &DetectorConfig) -> Result<Box<dyn ObjectDetector>> {
    match config.backend.as_str() {
        "stub" => Ok(Box::new(StubDetector::new())),
        "tract" => build_tract(config),
        other => Err(anyhow!("unknown detector backend {other:?}")),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(config: &DetectorConfig) -> Result<Box<dyn ObjectDetector>> {
    let path = config
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector.model_path is required for the tract backend"))?;
    let detector = TractYolo::new(
        path,
        YoloConfig {
            width: config.width,
            height: config.height,
            confidence: config.confidence,
            iou: config.iou,
            n_classes: config.n_classes,
        },
    )?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_config: &DetectorConfig) -> Result<Box<dyn ObjectDetector>> {
    Err(anyhow!(
        "tract backend requested but camwatch was built without the backend-tract feature"
    ))
}
