//! Synthetic stream for `stub://` identifiers.
//!
//! Produces a static, high-contrast block texture (so the tamper detector finds
//! corners to match) with a small bright "object" that wanders across the scene
//! every few hundred frames (so the stub detector has something to report).

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::VideoStream;
use crate::frame::{Frame, PixelFormat};

const BLOCK: u32 = 16;
const OBJECT_PERIOD: u64 = 300;
const OBJECT_FRAMES: u64 = 60;

pub struct SyntheticStream {
    name: String,
    width: u32,
    height: u32,
    frame_interval: Duration,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    background: Vec<u8>,
}

impl SyntheticStream {
    pub fn new(uri: &str, width: u32, height: u32, target_fps: u32) -> Self {
        let seed = uri
            .bytes()
            .fold(0xcafe_f00d_u64, |acc, b| acc.rotate_left(5) ^ b as u64);
        let mut rng = StdRng::seed_from_u64(seed);
        let blocks_x = width.div_ceil(BLOCK);
        let blocks_y = height.div_ceil(BLOCK);
        let levels: Vec<u8> = (0..blocks_x * blocks_y)
            .map(|_| if rng.gen_bool(0.5) { 220 } else { 30 })
            .collect();

        let mut background = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let level = levels[((y / BLOCK) * blocks_x + x / BLOCK) as usize];
                let idx = ((y * width + x) * 3) as usize;
                background[idx..idx + 3].copy_from_slice(&[level, level, level]);
            }
        }

        let frame_interval = if target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / target_fps as u64)
        };

        log::info!("SyntheticStream: opened {} ({}x{})", uri, width, height);
        Self {
            name: uri.to_string(),
            width,
            height,
            frame_interval,
            last_frame_at: None,
            frame_count: 0,
            background,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn paint_object(&self, pixels: &mut [u8]) {
        let phase = self.frame_count % OBJECT_PERIOD;
        if phase >= OBJECT_FRAMES {
            return;
        }
        let size = (self.width.min(self.height) / 6).max(1);
        let span = self.width.saturating_sub(size).max(1);
        let x0 = (phase as u32 * span / OBJECT_FRAMES as u32).min(span);
        let y0 = self.height.saturating_sub(size) / 2;
        for y in y0..(y0 + size).min(self.height) {
            for x in x0..(x0 + size).min(self.width) {
                let idx = ((y * self.width + x) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&[200, 40, 40]);
            }
        }
    }
}

impl VideoStream for SyntheticStream {
    fn read_frame(&mut self) -> Result<Frame> {
        // Pace like a real camera so the capture thread does not spin.
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
        self.frame_count += 1;

        let mut pixels = self.background.clone();
        self.paint_object(&mut pixels);
        Frame::new(pixels, self.width, self.height, PixelFormat::Rgb8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_stream_produces_sized_frames() -> Result<()> {
        let mut stream = SyntheticStream::new("stub://test", 64, 48, 0);
        let frame = stream.read_frame()?;
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.format, PixelFormat::Rgb8);
        assert_eq!(stream.name(), "stub://test");
        Ok(())
    }

    #[test]
    fn synthetic_object_moves_then_disappears() -> Result<()> {
        let mut stream = SyntheticStream::new("stub://test", 96, 64, 0);
        let first = stream.read_frame()?;
        let second = stream.read_frame()?;
        assert_ne!(first.pixels(), second.pixels());

        for _ in 2..OBJECT_FRAMES + 1 {
            stream.read_frame()?;
        }
        let idle_a = stream.read_frame()?;
        let idle_b = stream.read_frame()?;
        assert_eq!(idle_a.pixels(), idle_b.pixels());
        Ok(())
    }
}
