use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::{Frame, PixelFormat};

const DEFAULT_JPEG_QUALITY: u8 = 85;

// RIFF/AVI 1.0 layout: fixed 224-byte header up to and including the `movi`
// fourcc, then one `00dc` chunk per frame, then the `idx1` index.
const HEADER_LEN: usize = 224;
const RIFF_SIZE_AT: u64 = 4;
const TOTAL_FRAMES_AT: u64 = 48;
const STREAM_LENGTH_AT: u64 = 140;
const MOVI_SIZE_AT: u64 = 216;
const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;

/// Sink for the frames of one recording session.
pub trait SegmentWriter: Send {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    fn frames_written(&self) -> u64;

    /// Flush and close the output.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens a new [`SegmentWriter`] per session.
pub trait WriterFactory: Send {
    /// File extension without the dot.
    fn extension(&self) -> &str;

    /// Create a writer at `path`. The path must not exist yet.
    fn create(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn SegmentWriter>>;
}

/// Motion-JPEG in an AVI container. The frame rate goes into the main and
/// stream headers; frame counts and sizes are patched in on finish.
#[derive(Clone, Debug)]
pub struct MjpegWriterFactory {
    pub quality: u8,
}

impl Default for MjpegWriterFactory {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl WriterFactory for MjpegWriterFactory {
    fn extension(&self) -> &str {
        "avi"
    }

    fn create(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn SegmentWriter>> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("create segment file {}", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(&avi_header(width, height, fps))
            .context("write avi header")?;
        log::debug!(
            "mjpeg writer {} ({}x{} @ {} fps, quality {})",
            path.display(),
            width,
            height,
            fps,
            self.quality
        );
        Ok(Box::new(MjpegWriter {
            out,
            width,
            height,
            quality: self.quality,
            movi_bytes: 0,
            index: Vec::new(),
        }))
    }
}

pub struct MjpegWriter {
    out: BufWriter<File>,
    width: u32,
    height: u32,
    quality: u8,
    /// Bytes written after the `movi` fourcc.
    movi_bytes: u32,
    /// (offset from the `movi` fourcc, chunk size) per frame.
    index: Vec<(u32, u32)>,
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn avi_header(width: u32, height: u32, fps: u32) -> Vec<u8> {
    let fps = fps.max(1);
    let frame_bytes = width.saturating_mul(height).saturating_mul(3);
    let mut h = Vec::with_capacity(HEADER_LEN);

    h.extend_from_slice(b"RIFF");
    put_u32(&mut h, 0);
    h.extend_from_slice(b"AVI ");
    h.extend_from_slice(b"LIST");
    put_u32(&mut h, 192);
    h.extend_from_slice(b"hdrl");

    h.extend_from_slice(b"avih");
    put_u32(&mut h, 56);
    put_u32(&mut h, 1_000_000 / fps);
    put_u32(&mut h, frame_bytes.saturating_mul(fps));
    put_u32(&mut h, 0);
    put_u32(&mut h, AVIF_HASINDEX);
    put_u32(&mut h, 0); // total frames
    put_u32(&mut h, 0);
    put_u32(&mut h, 1);
    put_u32(&mut h, frame_bytes);
    put_u32(&mut h, width);
    put_u32(&mut h, height);
    for _ in 0..4 {
        put_u32(&mut h, 0);
    }

    h.extend_from_slice(b"LIST");
    put_u32(&mut h, 116);
    h.extend_from_slice(b"strl");

    h.extend_from_slice(b"strh");
    put_u32(&mut h, 56);
    h.extend_from_slice(b"vids");
    h.extend_from_slice(b"MJPG");
    put_u32(&mut h, 0);
    put_u16(&mut h, 0);
    put_u16(&mut h, 0);
    put_u32(&mut h, 0);
    put_u32(&mut h, 1); // scale
    put_u32(&mut h, fps); // rate
    put_u32(&mut h, 0);
    put_u32(&mut h, 0); // length
    put_u32(&mut h, frame_bytes);
    put_u32(&mut h, u32::MAX);
    put_u32(&mut h, 0);
    put_u16(&mut h, 0);
    put_u16(&mut h, 0);
    put_u16(&mut h, u16::try_from(width).unwrap_or(u16::MAX));
    put_u16(&mut h, u16::try_from(height).unwrap_or(u16::MAX));

    h.extend_from_slice(b"strf");
    put_u32(&mut h, 40);
    put_u32(&mut h, 40);
    put_u32(&mut h, width);
    put_u32(&mut h, height);
    put_u16(&mut h, 1);
    put_u16(&mut h, 24);
    h.extend_from_slice(b"MJPG");
    put_u32(&mut h, frame_bytes);
    for _ in 0..4 {
        put_u32(&mut h, 0);
    }

    h.extend_from_slice(b"LIST");
    put_u32(&mut h, 0); // movi size
    h.extend_from_slice(b"movi");
    h
}

impl MjpegWriter {
    fn patch(&mut self, at: u64, value: u32) -> Result<()> {
        self.out
            .seek(SeekFrom::Start(at))
            .context("seek in segment file")?;
        self.out
            .write_all(&value.to_le_bytes())
            .context("patch avi header")?;
        Ok(())
    }
}

impl SegmentWriter for MjpegWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let resized;
        let frame = if frame.width == self.width && frame.height == self.height {
            frame
        } else {
            resized = frame.resized(self.width, self.height);
            &resized
        };
        let color = match frame.format {
            PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
            PixelFormat::Gray8 => ExtendedColorType::L8,
        };

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode(frame.pixels(), frame.width, frame.height, color)
            .context("encode jpeg frame")?;

        let size = u32::try_from(jpeg.len()).context("jpeg frame too large")?;
        let movi_bytes = size
            .checked_add(8 + (size & 1))
            .and_then(|chunk| self.movi_bytes.checked_add(chunk))
            .context("segment exceeds the avi size limit")?;

        let mut chunk = Vec::with_capacity(jpeg.len() + 9);
        chunk.extend_from_slice(b"00dc");
        put_u32(&mut chunk, size);
        chunk.extend_from_slice(&jpeg);
        if size & 1 == 1 {
            chunk.push(0);
        }
        self.out
            .write_all(&chunk)
            .context("write frame chunk")?;

        self.index.push((4 + self.movi_bytes, size));
        self.movi_bytes = movi_bytes;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.index.len() as u64
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        let frames = u32::try_from(self.index.len()).context("too many frames")?;
        let mut idx = Vec::with_capacity(8 + 16 * self.index.len());
        idx.extend_from_slice(b"idx1");
        put_u32(&mut idx, 16 * frames);
        for &(offset, size) in &self.index {
            idx.extend_from_slice(b"00dc");
            put_u32(&mut idx, AVIIF_KEYFRAME);
            put_u32(&mut idx, offset);
            put_u32(&mut idx, size);
        }
        self.out.write_all(&idx).context("write avi index")?;

        let riff_size = (HEADER_LEN as u32 - 8)
            .checked_add(self.movi_bytes)
            .and_then(|size| size.checked_add(idx.len() as u32))
            .context("segment exceeds the avi size limit")?;
        self.patch(RIFF_SIZE_AT, riff_size)?;
        self.patch(TOTAL_FRAMES_AT, frames)?;
        self.patch(STREAM_LENGTH_AT, frames)?;
        self.patch(MOVI_SIZE_AT, 4 + self.movi_bytes)?;

        self.out.flush().context("flush segment file")?;
        self.out
            .get_ref()
            .sync_all()
            .context("sync segment file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    /// JPEG payloads of the `00dc` chunks in the `movi` list.
    fn frame_chunks(bytes: &[u8]) -> Vec<&[u8]> {
        let movi_end = 220 + u32_at(bytes, MOVI_SIZE_AT as usize) as usize;
        let mut chunks = Vec::new();
        let mut at = HEADER_LEN;
        while at < movi_end {
            assert_eq!(&bytes[at..at + 4], b"00dc");
            let size = u32_at(bytes, at + 4) as usize;
            chunks.push(&bytes[at + 8..at + 8 + size]);
            at += 8 + size + (size & 1);
        }
        chunks
    }

    fn write_segment(path: &Path, fps: u32) -> Vec<u8> {
        let mut writer = MjpegWriterFactory::default()
            .create(path, 32, 24, fps)
            .unwrap();
        for shade in [10u8, 240] {
            let frame = Frame::from_rgb(RgbImage::from_pixel(32, 24, Rgb([shade, shade, shade])));
            writer.write(&frame).unwrap();
        }
        writer.finish().unwrap();
        std::fs::read(path).unwrap()
    }

    #[test]
    fn writes_one_jpeg_chunk_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.avi");
        let mut factory = MjpegWriterFactory::default();
        let mut writer = factory.create(&path, 32, 24, 10).unwrap();

        for shade in [10u8, 120, 240] {
            let frame = Frame::from_rgb(RgbImage::from_pixel(32, 24, Rgb([shade, shade, shade])));
            writer.write(&frame).unwrap();
        }
        assert_eq!(writer.frames_written(), 3);
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(u32_at(&bytes, RIFF_SIZE_AT as usize) as usize, bytes.len() - 8);
        assert_eq!(u32_at(&bytes, TOTAL_FRAMES_AT as usize), 3);
        assert_eq!(u32_at(&bytes, STREAM_LENGTH_AT as usize), 3);

        let chunks = frame_chunks(&bytes);
        assert_eq!(chunks.len(), 3);
        let first = image::load_from_memory(chunks[0]).unwrap();
        assert_eq!(first.dimensions(), (32, 24));

        let idx_at = 220 + u32_at(&bytes, MOVI_SIZE_AT as usize) as usize;
        assert_eq!(&bytes[idx_at..idx_at + 4], b"idx1");
        assert_eq!(u32_at(&bytes, idx_at + 4), 48);
        assert_eq!(u32_at(&bytes, idx_at + 16), 4);
    }

    #[test]
    fn frame_rate_is_stored_in_headers() {
        let dir = tempfile::tempdir().unwrap();
        let slow = write_segment(&dir.path().join("slow.avi"), 10);
        let fast = write_segment(&dir.path().join("fast.avi"), 30);

        // avih microseconds per frame, strh rate over scale
        assert_eq!(u32_at(&slow, 32), 100_000);
        assert_eq!(u32_at(&slow, 128), 1);
        assert_eq!(u32_at(&slow, 132), 10);
        assert_eq!(u32_at(&fast, 32), 33_333);
        assert_eq!(u32_at(&fast, 132), 30);
        assert_ne!(slow, fast);
    }

    #[test]
    fn frames_are_scaled_to_segment_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.avi");
        let mut writer = MjpegWriterFactory::default()
            .create(&path, 16, 16, 10)
            .unwrap();
        let frame = Frame::new(vec![128; 64 * 48], 64, 48, PixelFormat::Gray8).unwrap();
        writer.write(&frame).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let decoded = image::load_from_memory(frame_chunks(&bytes)[0]).unwrap();
        assert_eq!(decoded.dimensions(), (16, 16));
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.avi");
        std::fs::write(&path, b"existing").unwrap();
        assert!(MjpegWriterFactory::default()
            .create(&path, 16, 16, 10)
            .is_err());
    }
}
