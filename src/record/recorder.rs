use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use super::writer::{MjpegWriterFactory, SegmentWriter, WriterFactory};
use crate::frame::Frame;

/// Local time in segment names, `DD-MM-YYYY-HH-MM-SS`.
const STAMP_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

#[derive(Clone, Debug, PartialEq)]
pub struct RecorderConfig {
    pub outdir: PathBuf,
    /// Keep recording this long after the last positive signal.
    pub timeout: Duration,
    /// Upper bound on the duration of one segment.
    pub max_file_length: Duration,
    pub fps: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("recordings"),
            timeout: Duration::from_secs(60),
            max_file_length: Duration::from_secs(600),
            fps: 10,
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.outdir.as_os_str().is_empty() {
            return Err(anyhow!("recording outdir must not be empty"));
        }
        if self.max_file_length.is_zero() {
            return Err(anyhow!("recording max_file_length must be greater than zero"));
        }
        if self.fps == 0 {
            return Err(anyhow!("recording fps must be greater than zero"));
        }
        Ok(())
    }
}

/// What a call to [`SegmentRecorder::record`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Nothing written and no session open.
    Idle,
    /// Frame appended; `rotated` when the session then hit `max_file_length` and was closed.
    Written { rotated: bool },
    /// An open session was closed for inactivity; the frame was dropped.
    Closed,
}

struct Session {
    writer: Box<dyn SegmentWriter>,
    path: PathBuf,
    created_at: Instant,
}

/// Signal-gated segment recorder. Holds at most one open session.
pub struct SegmentRecorder {
    config: RecorderConfig,
    factory: Box<dyn WriterFactory>,
    hostname: String,
    session: Option<Session>,
    last_signal: Option<Instant>,
    segments_opened: u64,
}

impl SegmentRecorder {
    /// Create the recorder and its output directory.
    pub fn new(config: RecorderConfig, factory: Box<dyn WriterFactory>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.outdir).with_context(|| {
            format!(
                "create recording output directory {}",
                config.outdir.display()
            )
        })?;
        Ok(Self {
            config,
            factory,
            hostname: hostname(),
            session: None,
            last_signal: None,
            segments_opened: 0,
        })
    }

    pub fn with_mjpeg(config: RecorderConfig) -> Result<Self> {
        Self::new(config, Box::new(MjpegWriterFactory::default()))
    }

    pub fn record(&mut self, frame: &Frame, signal: bool) -> Result<RecordOutcome> {
        self.record_at(frame, signal, Instant::now())
    }

    /// [`record`](Self::record) with an explicit clock reading.
    pub fn record_at(&mut self, frame: &Frame, signal: bool, now: Instant) -> Result<RecordOutcome> {
        if signal {
            self.last_signal = Some(now);
        }

        let active = self
            .last_signal
            .is_some_and(|last| now.saturating_duration_since(last) <= self.config.timeout);
        if !active {
            return Ok(if self.close() {
                RecordOutcome::Closed
            } else {
                RecordOutcome::Idle
            });
        }

        if self.session.is_none() {
            self.open(frame, now)?;
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(RecordOutcome::Idle);
        };
        if let Err(err) = session.writer.write(frame) {
            let path = session.path.clone();
            self.close();
            return Err(err.context(format!("write to segment {}", path.display())));
        }

        let rotated =
            now.saturating_duration_since(session.created_at) >= self.config.max_file_length;
        if rotated {
            self.close();
        }
        Ok(RecordOutcome::Written { rotated })
    }

    /// Close the open session, if any. Returns whether one was open.
    pub fn close(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        let frames = session.writer.frames_written();
        match session.writer.finish() {
            Ok(()) => log::info!(
                "recording closed: {} ({} frames)",
                session.path.display(),
                frames
            ),
            Err(err) => log::warn!(
                "recording {} closed with error: {:#}",
                session.path.display(),
                err
            ),
        }
        true
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    pub fn segments_opened(&self) -> u64 {
        self.segments_opened
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    fn open(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        let path = self.next_path();
        let writer = self
            .factory
            .create(&path, frame.width, frame.height, self.config.fps)?;
        log::info!("recording started: {}", path.display());
        self.session = Some(Session {
            writer,
            path,
            created_at: now,
        });
        self.segments_opened += 1;
        Ok(())
    }

    fn next_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format(STAMP_FORMAT).to_string();
        self.segment_path(&stamp)
    }

    /// `{outdir}/{hostname}-{stamp}.{ext}`, suffixed `-N` if taken.
    fn segment_path(&self, stamp: &str) -> PathBuf {
        let stem = format!("{}-{}", self.hostname, stamp);
        let ext = self.factory.extension();
        let mut path = self.config.outdir.join(format!("{stem}.{ext}"));
        let mut n = 1;
        while path.exists() {
            path = self.config.outdir.join(format!("{stem}-{n}.{ext}"));
            n += 1;
        }
        path
    }
}

impl Drop for SegmentRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(target_os = "linux")]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
        if !name.is_empty() {
            return sanitize(&name);
        }
    }
    fallback_hostname()
}

#[cfg(not(target_os = "linux"))]
fn hostname() -> String {
    fallback_hostname()
}

fn fallback_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .map(|name| sanitize(name.trim()))
        .unwrap_or_else(|| "localhost".to_string())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn frame() -> Frame {
        Frame::new(vec![90; 16 * 16 * 3], 16, 16, PixelFormat::Rgb8).unwrap()
    }

    fn recorder(dir: &Path) -> SegmentRecorder {
        SegmentRecorder::with_mjpeg(RecorderConfig {
            outdir: dir.join("out"),
            timeout: Duration::from_secs(60),
            max_file_length: Duration::from_secs(600),
            fps: 10,
        })
        .unwrap()
    }

    #[test]
    fn creates_outdir_and_stays_idle_without_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(dir.path());
        assert!(dir.path().join("out").is_dir());

        let outcome = rec.record(&frame(), false).unwrap();
        assert_eq!(outcome, RecordOutcome::Idle);
        assert!(!rec.is_recording());
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
    }

    #[test]
    fn session_survives_timeout_and_closes_after() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(dir.path());
        let t0 = Instant::now();

        assert_eq!(
            rec.record_at(&frame(), true, t0).unwrap(),
            RecordOutcome::Written { rotated: false }
        );
        let path = rec.current_path().unwrap().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let stem = name.strip_suffix(".avi").unwrap();
        let stamp = stem.strip_prefix(&format!("{}-", hostname())).unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).is_ok());
        assert_eq!(stamp.len(), "31-12-2026-23-59-59".len());

        let outcome = rec
            .record_at(&frame(), false, t0 + Duration::from_secs(60))
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Written { rotated: false });
        assert!(rec.is_recording());

        let outcome = rec
            .record_at(&frame(), false, t0 + Duration::from_millis(60_001))
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Closed);
        assert!(!rec.is_recording());
        assert!(path.is_file());

        let outcome = rec
            .record_at(&frame(), false, t0 + Duration::from_secs(61))
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Idle);
    }

    #[test]
    fn continuous_signal_rotates_at_max_file_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(dir.path());
        let t0 = Instant::now();

        let mut first_path = None;
        for secs in (0..600).step_by(10) {
            let outcome = rec
                .record_at(&frame(), true, t0 + Duration::from_secs(secs))
                .unwrap();
            assert_eq!(outcome, RecordOutcome::Written { rotated: false });
            first_path.get_or_insert_with(|| rec.current_path().unwrap().to_path_buf());
        }

        let outcome = rec
            .record_at(&frame(), true, t0 + Duration::from_secs(600))
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Written { rotated: true });
        assert!(!rec.is_recording());

        rec.record_at(&frame(), true, t0 + Duration::from_secs(610))
            .unwrap();
        let second_path = rec.current_path().unwrap().to_path_buf();
        assert_ne!(first_path.unwrap(), second_path);
        assert_eq!(rec.segments_opened(), 2);
    }

    #[test]
    fn taken_names_get_a_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path());
        let stamp = "01-02-2026-03-04-05";
        let host = hostname();

        let first = rec.segment_path(stamp);
        assert_eq!(
            first,
            dir.path().join("out").join(format!("{host}-{stamp}.avi"))
        );
        std::fs::write(&first, b"").unwrap();

        let second = rec.segment_path(stamp);
        assert_eq!(
            second,
            dir.path().join("out").join(format!("{host}-{stamp}-1.avi"))
        );
        std::fs::write(&second, b"").unwrap();

        let third = rec.segment_path(stamp);
        assert_eq!(third.file_name().unwrap(), format!("{host}-{stamp}-2.avi").as_str());
    }

    struct InMemory {
        fail: bool,
        frames: u64,
    }

    impl SegmentWriter for InMemory {
        fn write(&mut self, _frame: &Frame) -> Result<()> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.frames += 1;
            Ok(())
        }

        fn frames_written(&self) -> u64 {
            self.frames
        }

        fn finish(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    /// The first writer it hands out fails every write.
    struct FirstWriterFails {
        created: u32,
    }

    impl WriterFactory for FirstWriterFails {
        fn extension(&self) -> &str {
            "bin"
        }

        fn create(
            &mut self,
            _path: &Path,
            _width: u32,
            _height: u32,
            _fps: u32,
        ) -> Result<Box<dyn SegmentWriter>> {
            self.created += 1;
            Ok(Box::new(InMemory {
                fail: self.created == 1,
                frames: 0,
            }))
        }
    }

    #[test]
    fn write_error_closes_session_and_next_signal_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig {
            outdir: dir.path().join("out"),
            ..RecorderConfig::default()
        };
        let mut rec =
            SegmentRecorder::new(config, Box::new(FirstWriterFails { created: 0 })).unwrap();
        let t0 = Instant::now();

        assert!(rec.record_at(&frame(), true, t0).is_err());
        assert!(!rec.is_recording());
        assert_eq!(rec.segments_opened(), 1);

        let outcome = rec
            .record_at(&frame(), true, t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Written { rotated: false });
        assert!(rec.is_recording());
        assert_eq!(rec.segments_opened(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(dir.path());
        rec.record(&frame(), true).unwrap();
        assert!(rec.close());
        assert!(!rec.close());
    }

    #[test]
    fn uncreatable_outdir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let config = RecorderConfig {
            outdir: blocker.join("sub"),
            ..RecorderConfig::default()
        };
        assert!(SegmentRecorder::with_mjpeg(config).is_err());
    }

    #[test]
    fn rejects_zero_max_file_length() {
        let config = RecorderConfig {
            max_file_length: Duration::ZERO,
            ..RecorderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
