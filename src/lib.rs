//! camwatch: unattended camera monitoring.
//!
//! The agent keeps a video source alive across dropouts, watches for the view
//! being covered or turned away, and records video while an object detector
//! reports activity.
//!
//! # Module Structure
//!
//! - `frame`: shared frame type and pixel conversions
//! - `ingest`: stream openers and the reconnecting background `FrameSource`
//! - `tamper`: keypoint-based obscured-view detection
//! - `detect`: object detector seam and backends
//! - `record`: signal-gated, duration-bounded segment recording
//! - `monitor`: the per-tick loop tying the above together
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod record;
pub mod shutdown;
pub mod tamper;

pub use config::CamwatchConfig;
pub use detect::{build_detector, Bbox, DetectorConfig, ObjectDetector};
pub use frame::{Frame, PixelFormat};
pub use ingest::{CaptureConfig, DefaultOpener, FrameRead, FrameSource, LatestFrame};
pub use monitor::{Monitor, MonitorConfig, TickReport};
pub use record::{RecordOutcome, RecorderConfig, SegmentRecorder};
pub use shutdown::ShutdownSignal;
pub use tamper::{TamperConfig, TamperDetector, TamperStatus};
