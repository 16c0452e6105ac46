//! Tamper / obscured-view detection.

mod baseline;
mod detector;
pub mod features;

pub use baseline::{blend, BaselineStack};
pub use detector::{Phase, TamperConfig, TamperDetector, TamperStatus};
pub use features::{Descriptor, FeatureExtractor, Features, Keypoint, OrbExtractor};
