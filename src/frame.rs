//! Frame container shared between the capture thread and the monitor loop.
//!
//! - `Frame`: immutable pixel buffer with dimensions, format and capture metadata.
//! - `PixelFormat`: the two layouts the pipeline handles (packed RGB, 8-bit gray).
//!
//! Frames are handed around as `Arc<Frame>`. Nothing mutates a frame after
//! construction; consumers that need a different size or layout build a new one.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb8,
    /// 8-bit luminance, 1 byte per pixel.
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Decoded video frame.
///
/// Deliberately not `Clone`: sharing goes through `Arc<Frame>`, copies are explicit.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonic capture instant.
    captured_at: Instant,
    /// Capture order assigned by the frame source (0 for frames built elsewhere).
    sequence: u64,
}

impl Frame {
    /// Build a frame, checking that the buffer matches the declared geometry.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame must have non-zero dimensions"));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} bytes for {}x{} {:?}, received {}",
                expected,
                width,
                height,
                format,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            captured_at: Instant::now(),
            sequence: 0,
        })
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Rgb8,
            captured_at: Instant::now(),
            sequence: 0,
        }
    }

    pub fn from_gray(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Gray8,
            captured_at: Instant::now(),
            sequence: 0,
        }
    }

    /// Stamp the capture sequence number. Called by the frame source.
    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Luminance copy of this frame.
    pub fn to_gray(&self) -> GrayImage {
        match self.format {
            PixelFormat::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.clone())
                .unwrap_or_else(|| unreachable!("gray frame buffer size checked at construction")),
            PixelFormat::Rgb8 => imageops::grayscale(&self.rgb_view()),
        }
    }

    /// Copy of this frame scaled to `width`x`height`. Capture metadata is preserved.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        let data = if width == self.width && height == self.height {
            self.data.clone()
        } else {
            match self.format {
                PixelFormat::Rgb8 => {
                    imageops::resize(&self.rgb_view(), width, height, FilterType::Triangle)
                        .into_raw()
                }
                PixelFormat::Gray8 => {
                    imageops::resize(&self.gray_view(), width, height, FilterType::Triangle)
                        .into_raw()
                }
            }
        };
        Frame {
            data,
            width,
            height,
            format: self.format,
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }

    /// Packed RGB bytes, expanding gray frames.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        }
    }

    fn rgb_view(&self) -> ImageBuffer<Rgb<u8>, &[u8]> {
        // Geometry was validated at construction.
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
            .unwrap_or_else(|| unreachable!("rgb frame buffer size checked at construction"))
    }

    fn gray_view(&self) -> ImageBuffer<Luma<u8>, &[u8]> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
            .unwrap_or_else(|| unreachable!("gray frame buffer size checked at construction"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, PixelFormat::Rgb8).is_err());
        assert!(Frame::new(vec![0u8; 48], 4, 4, PixelFormat::Rgb8).is_ok());
        assert!(Frame::new(Vec::new(), 0, 4, PixelFormat::Gray8).is_err());
    }

    #[test]
    fn gray_conversion_of_uniform_rgb_keeps_level() {
        let frame = Frame::new(vec![90u8; 8 * 6 * 3], 8, 6, PixelFormat::Rgb8).unwrap();
        let gray = frame.to_gray();
        assert_eq!(gray.dimensions(), (8, 6));
        assert!(gray.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn resize_preserves_format_and_sequence() {
        let frame = Frame::new(vec![7u8; 16 * 16], 16, 16, PixelFormat::Gray8)
            .unwrap()
            .with_sequence(42);
        let small = frame.resized(8, 4);
        assert_eq!((small.width, small.height), (8, 4));
        assert_eq!(small.format, PixelFormat::Gray8);
        assert_eq!(small.pixels().len(), 32);
        assert_eq!(small.sequence(), 42);
    }

    #[test]
    fn gray_frames_expand_to_rgb() {
        let frame = Frame::new(vec![1, 2], 2, 1, PixelFormat::Gray8).unwrap();
        assert_eq!(frame.to_rgb_bytes(), vec![1, 1, 1, 2, 2, 2]);
    }
}
