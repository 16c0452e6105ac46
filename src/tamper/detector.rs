//! Obscured-view detection over keypoint matches against a baseline image.
//!
//! Three phases:
//! 1. `CollectingBaseline`: every `init_every`-th frame is stacked; a full stack
//!    is averaged into the baseline image.
//! 2. `ValidatingBaseline`: the baseline must share enough matches with the
//!    frame that completed the stack, otherwise collection starts over.
//! 3. `Monitoring`: every `check_every`-th frame is matched against the
//!    baseline; a match count below `threshold` times the expected count means
//!    obscured. Every `update_every`-th frame, while not obscured, the expected
//!    count and the baseline image drift toward the current scene.
//!
//! Cadences count frames passed to `step`, not wall-clock time.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;

use super::baseline::{blend, BaselineStack};
use super::features::{FeatureExtractor, Features, OrbExtractor};
use crate::frame::Frame;

/// Configuration for a tamper detector.
#[derive(Clone, Debug)]
pub struct TamperConfig {
    /// Camera label used in log lines.
    pub camera: String,
    /// Obscured when `matches / expected` drops below this.
    pub threshold: f32,
    /// Working resolution; frames are converted to gray and resized to it.
    pub width: u32,
    pub height: u32,
    /// Frames averaged into the baseline.
    pub init_number: usize,
    pub init_every: u64,
    pub check_every: u64,
    pub update_every: u64,
    /// Validation needs `matches >= ratio * min(baseline_kpts, frame_kpts)`.
    pub init_matching_ratio: f32,
    /// EMA weight of the latest match count.
    pub update_matching_count_ratio: f32,
    /// EMA weight of the current frame when refreshing the baseline image.
    pub update_base_img_ratio: f32,
}

impl Default for TamperConfig {
    fn default() -> Self {
        Self {
            camera: "0".to_string(),
            threshold: 0.7,
            width: 426,
            height: 240,
            init_number: 10,
            init_every: 3,
            check_every: 3,
            update_every: 15,
            init_matching_ratio: 0.6,
            update_matching_count_ratio: 0.4,
            update_base_img_ratio: 0.8,
        }
    }
}

impl TamperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("tamper working size must be non-zero"));
        }
        if self.init_number == 0 {
            return Err(anyhow!("tamper init_number must be at least 1"));
        }
        if self.init_every == 0 || self.check_every == 0 || self.update_every == 0 {
            return Err(anyhow!(
                "tamper init_every, check_every and update_every must be at least 1"
            ));
        }
        for (name, value) in [
            ("threshold", self.threshold),
            ("init_matching_ratio", self.init_matching_ratio),
            ("update_matching_count_ratio", self.update_matching_count_ratio),
            ("update_base_img_ratio", self.update_base_img_ratio),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("tamper {} must be in (0, 1], got {}", name, value));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    CollectingBaseline,
    ValidatingBaseline,
    Monitoring,
}

/// Externally visible tamper state.
///
/// "Not ready yet" and "obscured" are distinct here even though both report
/// `obscured = true` from `step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TamperStatus {
    CollectingBaseline { collected: usize, required: usize },
    ValidatingBaseline,
    Clear,
    /// `no_keypoints` is set when the frame produced no keypoints at all.
    Obscured { no_keypoints: bool },
    /// Value supplied from outside instead of the detector.
    Overridden { obscured: bool },
    /// Tamper checking switched off.
    Disabled,
}

impl TamperStatus {
    pub fn is_obscured(&self) -> bool {
        match self {
            TamperStatus::Clear | TamperStatus::Disabled => false,
            TamperStatus::Overridden { obscured } => *obscured,
            _ => true,
        }
    }
}

pub struct TamperDetector<E = OrbExtractor> {
    config: TamperConfig,
    extractor: E,
    phase: Phase,
    stack: BaselineStack,
    baseline: Option<GrayImage>,
    baseline_features: Features,
    expected_matches: f32,
    last_matches: usize,
    last_frame_empty: bool,
    obscured: bool,
    counter: u64,
}

impl TamperDetector<OrbExtractor> {
    pub fn with_orb(config: TamperConfig) -> Result<Self> {
        Self::new(config, OrbExtractor::default())
    }
}

impl<E: FeatureExtractor> TamperDetector<E> {
    pub fn new(config: TamperConfig, extractor: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            stack: BaselineStack::new(config.init_number),
            config,
            extractor,
            phase: Phase::CollectingBaseline,
            baseline: None,
            baseline_features: Features::default(),
            expected_matches: 0.0,
            last_matches: 0,
            last_frame_empty: false,
            obscured: true,
            counter: 0,
        })
    }

    /// Process one frame. Returns the obscured flag (true until a baseline is validated).
    pub fn step(&mut self, frame: &Frame) -> bool {
        let gray = frame.to_gray();
        let gray = if gray.dimensions() == (self.config.width, self.config.height) {
            gray
        } else {
            imageops::resize(&gray, self.config.width, self.config.height, FilterType::Triangle)
        };
        self.step_gray(gray)
    }

    /// Process a frame already converted to gray at the working size.
    pub fn step_gray(&mut self, image: GrayImage) -> bool {
        match self.phase {
            Phase::CollectingBaseline => self.collect(image),
            Phase::ValidatingBaseline => self.validate(&image),
            Phase::Monitoring => {
                if self.counter % self.config.check_every == 0 {
                    self.check(&image);
                }
                if !self.obscured && self.counter % self.config.update_every == 0 {
                    self.update(&image);
                }
            }
        }
        self.counter += 1;
        self.obscured
    }

    pub fn is_obscured(&self) -> bool {
        self.obscured
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> TamperStatus {
        match self.phase {
            Phase::CollectingBaseline => TamperStatus::CollectingBaseline {
                collected: self.stack.len(),
                required: self.stack.capacity(),
            },
            Phase::ValidatingBaseline => TamperStatus::ValidatingBaseline,
            Phase::Monitoring if self.obscured => TamperStatus::Obscured {
                no_keypoints: self.last_frame_empty,
            },
            Phase::Monitoring => TamperStatus::Clear,
        }
    }

    pub fn expected_match_count(&self) -> f32 {
        self.expected_matches
    }

    pub fn last_match_count(&self) -> usize {
        self.last_matches
    }

    /// Most recent baseline image. A rejected one stays until the next stack
    /// completes.
    pub fn baseline(&self) -> Option<&GrayImage> {
        self.baseline.as_ref()
    }

    pub fn frames_processed(&self) -> u64 {
        self.counter
    }

    pub fn config(&self) -> &TamperConfig {
        &self.config
    }

    fn collect(&mut self, image: GrayImage) {
        if self.counter % self.config.init_every != 0 {
            return;
        }
        let completes = self.stack.len() + 1 == self.stack.capacity();
        let current = completes.then(|| image.clone());
        match self.stack.push(image) {
            Ok(collected) => log::info!(
                "camera {}: images in baseline stack: {} out of {}",
                self.config.camera,
                collected,
                self.stack.capacity()
            ),
            Err(err) => {
                log::warn!("camera {}: {}, starting again", self.config.camera, err);
                self.stack.clear();
                return;
            }
        }

        let Some(current) = current else {
            return;
        };
        self.baseline = self.stack.take_mean();
        log::info!("camera {}: baseline image created", self.config.camera);
        self.phase = Phase::ValidatingBaseline;
        self.validate(&current);
    }

    fn validate(&mut self, frame: &GrayImage) {
        let Some(baseline) = self.baseline.as_ref() else {
            self.restart_collection();
            return;
        };
        let baseline_features = self.extractor.detect_and_describe(baseline);
        let frame_features = self.extractor.detect_and_describe(frame);
        if baseline_features.is_empty() || frame_features.is_empty() {
            self.restart_collection();
            return;
        }

        let matches = self
            .extractor
            .match_count(&baseline_features, &frame_features);
        let required = self.config.init_matching_ratio
            * baseline_features.len().min(frame_features.len()) as f32;
        if (matches as f32) < required {
            self.restart_collection();
            return;
        }

        self.baseline_features = baseline_features;
        self.expected_matches = matches as f32;
        self.last_matches = matches;
        self.last_frame_empty = false;
        self.obscured = false;
        self.phase = Phase::Monitoring;
        log::info!(
            "camera {}: initialization done ({} matches)",
            self.config.camera,
            matches
        );
    }

    fn restart_collection(&mut self) {
        log::warn!(
            "camera {}: bad initialization, starting again",
            self.config.camera
        );
        self.stack.clear();
        self.phase = Phase::CollectingBaseline;
    }

    fn check(&mut self, frame: &GrayImage) {
        let features = self.extractor.detect_and_describe(frame);
        log::debug!(
            "camera {}: {} frame keypoints, {} baseline keypoints",
            self.config.camera,
            features.len(),
            self.baseline_features.len()
        );
        if features.is_empty() {
            self.last_matches = 0;
            self.last_frame_empty = true;
            self.obscured = true;
        } else {
            self.last_matches = self
                .extractor
                .match_count(&self.baseline_features, &features);
            self.last_frame_empty = false;
            self.obscured = self.match_ratio() < self.config.threshold;
        }
        log::info!(
            "camera {}: number of matches: {} out of {} ({:.2}%)",
            self.config.camera,
            self.last_matches,
            self.expected_matches as u64,
            self.match_ratio() * 100.0
        );
        log::info!(
            "camera {}: {}",
            self.config.camera,
            if self.obscured {
                "is obscured"
            } else {
                "good condition"
            }
        );
    }

    fn match_ratio(&self) -> f32 {
        if self.expected_matches > 0.0 {
            self.last_matches as f32 / self.expected_matches
        } else {
            0.0
        }
    }

    fn update(&mut self, frame: &GrayImage) {
        let alpha = self.config.update_matching_count_ratio;
        self.expected_matches =
            alpha * self.last_matches as f32 + (1.0 - alpha) * self.expected_matches;

        let Some(baseline) = self.baseline.as_ref() else {
            return;
        };
        match blend(baseline, frame, self.config.update_base_img_ratio) {
            Ok(blended) => {
                self.baseline_features = self.extractor.detect_and_describe(&blended);
                self.baseline = Some(blended);
                log::info!("camera {}: baseline image updated", self.config.camera);
            }
            Err(err) => log::warn!(
                "camera {}: baseline update skipped: {}",
                self.config.camera,
                err
            ),
        }
    }
}
