use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorConfig;
use crate::ingest::{redacted_uri, CaptureConfig, DefaultOpener};
use crate::monitor::MonitorConfig;
use crate::record::RecorderConfig;
use crate::tamper::TamperConfig;

const DEFAULT_SOURCE: &str = "stub://camera0";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 25;
const DEFAULT_VERBOSE: u8 = 1;
const DEFAULT_OUTDIR: &str = "recordings";
const DEFAULT_PERSON_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_FILE_LENGTH_SECS: u64 = 600;
const DEFAULT_RECORD_FPS: u32 = 10;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CamwatchConfigFile {
    source: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    reconnect_backoff_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    verbose: Option<u8>,
    print_fps: Option<bool>,
    tamper: Option<TamperConfigFile>,
    recording: Option<RecordingConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TamperConfigFile {
    enabled: Option<bool>,
    threshold: Option<f32>,
    size_w: Option<u32>,
    size_h: Option<u32>,
    init_number: Option<usize>,
    init_every: Option<u64>,
    check_every: Option<u64>,
    update_every: Option<u64>,
    init_matching_ratio: Option<f32>,
    update_matching_count_ratio: Option<f32>,
    update_base_img_ratio: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecordingConfigFile {
    enabled: Option<bool>,
    outdir: Option<PathBuf>,
    person_timeout_secs: Option<u64>,
    max_file_length_secs: Option<u64>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    iou: Option<f32>,
    n_classes: Option<usize>,
}

/// Agent configuration: file values, then environment overrides, then validation.
#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub source: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub reconnect_backoff: Duration,
    pub poll_interval: Duration,
    /// 0: warnings only, 1: info logs, 2: debug logs.
    pub verbose: u8,
    pub print_fps: bool,
    pub tamper_enabled: bool,
    pub tamper: TamperConfig,
    pub recording_enabled: bool,
    pub recording: RecorderConfig,
    pub detector: DetectorConfig,
}

impl CamwatchConfig {
    /// Load from `CAMWATCH_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`load`](Self::load) with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamwatchConfigFile) -> Self {
        let tamper = file.tamper.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let source = file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let frame_width = file.frame_width.unwrap_or(DEFAULT_FRAME_WIDTH);
        let frame_height = file.frame_height.unwrap_or(DEFAULT_FRAME_HEIGHT);

        let tamper_defaults = TamperConfig::default();
        let tamper_config = TamperConfig {
            camera: redacted_uri(&source),
            threshold: tamper.threshold.unwrap_or(tamper_defaults.threshold),
            width: tamper.size_w.unwrap_or(tamper_defaults.width),
            height: tamper.size_h.unwrap_or(tamper_defaults.height),
            init_number: tamper.init_number.unwrap_or(tamper_defaults.init_number),
            init_every: tamper.init_every.unwrap_or(tamper_defaults.init_every),
            check_every: tamper.check_every.unwrap_or(tamper_defaults.check_every),
            update_every: tamper.update_every.unwrap_or(tamper_defaults.update_every),
            init_matching_ratio: tamper
                .init_matching_ratio
                .unwrap_or(tamper_defaults.init_matching_ratio),
            update_matching_count_ratio: tamper
                .update_matching_count_ratio
                .unwrap_or(tamper_defaults.update_matching_count_ratio),
            update_base_img_ratio: tamper
                .update_base_img_ratio
                .unwrap_or(tamper_defaults.update_base_img_ratio),
        };

        let recorder = RecorderConfig {
            outdir: recording
                .outdir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTDIR)),
            timeout: Duration::from_secs(
                recording
                    .person_timeout_secs
                    .unwrap_or(DEFAULT_PERSON_TIMEOUT_SECS),
            ),
            max_file_length: Duration::from_secs(
                recording
                    .max_file_length_secs
                    .unwrap_or(DEFAULT_MAX_FILE_LENGTH_SECS),
            ),
            fps: recording.fps.unwrap_or(DEFAULT_RECORD_FPS),
        };

        let detector_defaults = DetectorConfig::default();
        let detector_config = DetectorConfig {
            backend: detector
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            model_path: detector.model_path,
            width: frame_width,
            height: frame_height,
            confidence: detector.confidence.unwrap_or(detector_defaults.confidence),
            iou: detector.iou.unwrap_or(detector_defaults.iou),
            n_classes: detector.n_classes.unwrap_or(detector_defaults.n_classes),
        };

        Self {
            source,
            frame_width,
            frame_height,
            reconnect_backoff: Duration::from_secs(
                file.reconnect_backoff_secs
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF_SECS),
            ),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            verbose: file.verbose.unwrap_or(DEFAULT_VERBOSE),
            print_fps: file.print_fps.unwrap_or(false),
            tamper_enabled: tamper.enabled.unwrap_or(true),
            tamper: tamper_config,
            recording_enabled: recording.enabled.unwrap_or(true),
            recording: recorder,
            detector: detector_config,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("CAMWATCH_SOURCE") {
            if !source.trim().is_empty() {
                self.set_source(source);
            }
        }
        if let Ok(outdir) = std::env::var("CAMWATCH_OUTDIR") {
            if !outdir.trim().is_empty() {
                self.recording.outdir = PathBuf::from(outdir);
            }
        }
        if let Ok(verbose) = std::env::var("CAMWATCH_VERBOSE") {
            self.verbose = verbose
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_VERBOSE must be 0, 1 or 2"))?;
        }
        if let Ok(record) = std::env::var("CAMWATCH_RECORD") {
            self.recording_enabled = parse_bool("CAMWATCH_RECORD", &record)?;
        }
        if let Ok(check) = std::env::var("CAMWATCH_TAMPER_CHECK") {
            self.tamper_enabled = parse_bool("CAMWATCH_TAMPER_CHECK", &check)?;
        }
        Ok(())
    }

    /// Change the stream identifier (and the camera label in tamper logs).
    pub fn set_source(&mut self, source: String) {
        self.tamper.camera = redacted_uri(&source);
        self.source = source;
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(anyhow!("frame size must be non-zero"));
        }
        if self.reconnect_backoff.is_zero() {
            return Err(anyhow!("reconnect_backoff_secs must be greater than zero"));
        }
        if self.verbose > 2 {
            return Err(anyhow!("verbose must be 0, 1 or 2, got {}", self.verbose));
        }
        if self.tamper_enabled {
            self.tamper.validate()?;
        }
        if self.recording_enabled {
            self.recording.validate()?;
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!("detector.confidence must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.iou) {
            return Err(anyhow!("detector.iou must be in [0, 1]"));
        }
        if self.detector.n_classes == 0 {
            return Err(anyhow!("detector.n_classes must be at least 1"));
        }
        Ok(())
    }

    /// Default `env_logger` filter for the configured verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            uri: self.source.clone(),
            reconnect_backoff: self.reconnect_backoff,
            ..CaptureConfig::default()
        }
    }

    pub fn opener(&self) -> DefaultOpener {
        DefaultOpener {
            width: self.frame_width,
            height: self.frame_height,
            target_fps: self.recording.fps,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            poll_interval: self.poll_interval,
            print_fps: self.print_fps,
            ..MonitorConfig::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean, got {:?}", name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CamwatchConfig::from_file(CamwatchConfigFile::default());
        assert_eq!(cfg.source, DEFAULT_SOURCE);
        assert_eq!((cfg.frame_width, cfg.frame_height), (640, 480));
        assert_eq!(cfg.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(cfg.tamper.init_number, 10);
        assert_eq!((cfg.tamper.width, cfg.tamper.height), (426, 240));
        assert_eq!(cfg.recording.timeout, Duration::from_secs(60));
        assert_eq!(cfg.recording.max_file_length, Duration::from_secs(600));
        assert!(cfg.tamper_enabled && cfg.recording_enabled);
        assert_eq!(cfg.log_filter(), "info");
        cfg.validate().unwrap();
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "Yes").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn disabled_sections_skip_validation() {
        let mut cfg = CamwatchConfig::from_file(CamwatchConfigFile::default());
        cfg.tamper.threshold = 0.0;
        cfg.tamper_enabled = false;
        cfg.validate().unwrap();
        cfg.tamper_enabled = true;
        assert!(cfg.validate().is_err());
    }
}
