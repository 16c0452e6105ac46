//! Per-tick control loop.
//!
//! One tick: take the latest frame from the source, run the object detector,
//! feed the tamper detector (or the external override), and pass the frame to
//! the recorder with "something was detected" as its signal. A tick whose read
//! failed does nothing at all, so the tick counter and every cadence derived
//! from it only advance on real frames.

use std::time::{Duration, Instant};

use crate::detect::{Bbox, ObjectDetector};
use crate::frame::Frame;
use crate::ingest::LatestFrame;
use crate::record::{RecordOutcome, SegmentRecorder};
use crate::shutdown::ShutdownSignal;
use crate::tamper::{FeatureExtractor, OrbExtractor, TamperDetector, TamperStatus};

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    /// Size frames are scaled to before detection and recording.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Wait between ticks in [`Monitor::run`].
    pub poll_interval: Duration,
    pub print_fps: bool,
    pub fps_period: Duration,
    pub health_log_period: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            poll_interval: Duration::from_millis(25),
            print_fps: false,
            fps_period: Duration::from_secs(1),
            health_log_period: Duration::from_secs(5),
        }
    }
}

/// Everything one tick produced.
#[derive(Clone, Debug)]
pub struct TickReport {
    /// Tick index, starting at 0.
    pub tick: u64,
    pub boxes: Vec<Bbox>,
    /// Time from capture to the start of this tick.
    pub frame_age: Duration,
    pub obscured: bool,
    pub tamper: TamperStatus,
    /// `None` when recording is disabled or the recorder failed this tick.
    pub recording: Option<RecordOutcome>,
}

struct FpsMeter {
    period: Duration,
    window_start: Option<Instant>,
    frames: u32,
}

impl FpsMeter {
    fn new(period: Duration) -> Self {
        Self {
            period,
            window_start: None,
            frames: 0,
        }
    }

    /// Count a frame; returns the rate once per elapsed period.
    fn tick(&mut self, now: Instant) -> Option<f64> {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed <= self.period {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.window_start = Some(now);
        self.frames = 0;
        Some(fps)
    }
}

pub struct Monitor<E = OrbExtractor> {
    config: MonitorConfig,
    detector: Box<dyn ObjectDetector>,
    tamper: Option<TamperDetector<E>>,
    recorder: Option<SegmentRecorder>,
    tamper_override: Option<bool>,
    status: TamperStatus,
    ticks: u64,
    fps: FpsMeter,
}

impl<E: FeatureExtractor> Monitor<E> {
    pub fn new(
        config: MonitorConfig,
        detector: Box<dyn ObjectDetector>,
        tamper: Option<TamperDetector<E>>,
        recorder: Option<SegmentRecorder>,
    ) -> Self {
        let status = match &tamper {
            Some(tamper) => tamper.status(),
            None => TamperStatus::Disabled,
        };
        Self {
            fps: FpsMeter::new(config.fps_period),
            config,
            detector,
            tamper,
            recorder,
            tamper_override: None,
            status,
            ticks: 0,
        }
    }

    /// Poll the source once. `None` when the latest read failed.
    pub fn tick(&mut self, source: &impl LatestFrame) -> Option<TickReport> {
        let read = source.read();
        if !read.success {
            return None;
        }
        let frame = read.frame?;
        Some(self.process_at(&frame, Instant::now()))
    }

    /// Run one tick on `frame` with an explicit clock reading.
    pub fn process_at(&mut self, frame: &Frame, now: Instant) -> TickReport {
        let frame_age = now.saturating_duration_since(frame.captured_at());
        let resized;
        let frame = if frame.width == self.config.frame_width
            && frame.height == self.config.frame_height
        {
            frame
        } else {
            resized = frame.resized(self.config.frame_width, self.config.frame_height);
            &resized
        };

        let boxes = match self.detector.predict(frame) {
            Ok(boxes) => boxes,
            Err(err) => {
                log::warn!("{} detector failed: {:#}", self.detector.name(), err);
                Vec::new()
            }
        };

        self.status = match (self.tamper_override, self.tamper.as_mut()) {
            (Some(obscured), _) => TamperStatus::Overridden { obscured },
            (None, Some(tamper)) => {
                tamper.step(frame);
                tamper.status()
            }
            (None, None) => TamperStatus::Disabled,
        };

        let recording = match self.recorder.as_mut() {
            Some(recorder) => match recorder.record_at(frame, !boxes.is_empty(), now) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    log::warn!("recording failed: {:#}", err);
                    None
                }
            },
            None => None,
        };

        let tick = self.ticks;
        self.ticks += 1;

        if self.config.print_fps {
            if let Some(fps) = self.fps.tick(now) {
                log::info!("FPS: {:.2}", fps);
            }
        }

        TickReport {
            tick,
            boxes,
            frame_age,
            obscured: self.status.is_obscured(),
            tamper: self.status,
            recording,
        }
    }

    /// Tick until `shutdown` fires, then close any open recording.
    pub fn run(&mut self, source: &impl LatestFrame, shutdown: &ShutdownSignal) {
        if let Err(err) = self.detector.warm_up() {
            log::warn!("{} detector warm-up failed: {:#}", self.detector.name(), err);
        }
        let mut last_health_log = Instant::now();
        let mut last_status = self.status;

        while !shutdown.is_triggered() {
            if let Some(report) = self.tick(source) {
                if report.tamper.is_obscured() != last_status.is_obscured() {
                    if report.obscured {
                        log::warn!("camera view obscured ({:?})", report.tamper);
                    } else {
                        log::info!("camera view clear");
                    }
                }
                last_status = report.tamper;
            }

            if last_health_log.elapsed() >= self.config.health_log_period {
                if let Some(stats) = source.stats() {
                    log::info!(
                        "capture health={} frames={} reconnects={} uri={}",
                        source.is_healthy(),
                        stats.frames_captured,
                        stats.reconnect_attempts,
                        stats.uri
                    );
                }
                last_health_log = Instant::now();
            }

            if shutdown.wait_timeout(self.config.poll_interval) {
                break;
            }
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.close();
        }
        log::info!("monitor stopped after {} ticks", self.ticks);
    }

    /// Replace the tamper detector's verdict with `obscured`, or hand control
    /// back to the detector with `None`.
    pub fn set_tamper_override(&mut self, obscured: Option<bool>) {
        self.tamper_override = obscured;
    }

    pub fn is_obscured(&self) -> bool {
        self.status.is_obscured()
    }

    pub fn tamper_status(&self) -> TamperStatus {
        self.status
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tamper_detector(&self) -> Option<&TamperDetector<E>> {
        self.tamper.as_ref()
    }

    pub fn recorder(&self) -> Option<&SegmentRecorder> {
        self.recorder.as_ref()
    }
}
