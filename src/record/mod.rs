//! Activity-gated segment recording.
//!
//! A [`SegmentRecorder`] opens a segment when the signal goes high, keeps
//! writing until `timeout` passes without a signal, and never lets one segment
//! run past `max_file_length`.

mod recorder;
mod writer;

pub use recorder::{RecordOutcome, RecorderConfig, SegmentRecorder};
pub use writer::{MjpegWriter, MjpegWriterFactory, SegmentWriter, WriterFactory};
