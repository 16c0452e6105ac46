//! Baseline image construction.

use anyhow::{anyhow, Result};
use image::GrayImage;

/// Bounded stack of grayscale frames averaged into the baseline image.
#[derive(Debug)]
pub struct BaselineStack {
    frames: Vec<GrayImage>,
    capacity: usize,
}

impl BaselineStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame. All frames must share the dimensions of the first one.
    pub fn push(&mut self, frame: GrayImage) -> Result<usize> {
        if self.is_full() {
            return Err(anyhow!("baseline stack already holds {} frames", self.capacity));
        }
        if let Some(first) = self.frames.first() {
            if first.dimensions() != frame.dimensions() {
                return Err(anyhow!(
                    "baseline frame is {:?}, stack holds {:?}",
                    frame.dimensions(),
                    first.dimensions()
                ));
            }
        }
        self.frames.push(frame);
        Ok(self.frames.len())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Per-pixel mean of the stacked frames, rounded to 8 bits. Empties the stack.
    pub fn take_mean(&mut self) -> Option<GrayImage> {
        let first = self.frames.first()?;
        let (width, height) = first.dimensions();
        let mut sums = vec![0u32; first.as_raw().len()];
        for frame in &self.frames {
            for (sum, &value) in sums.iter_mut().zip(frame.as_raw()) {
                *sum += value as u32;
            }
        }
        let count = self.frames.len() as u32;
        let pixels = sums
            .into_iter()
            .map(|sum| ((sum + count / 2) / count) as u8)
            .collect();
        self.frames.clear();
        GrayImage::from_raw(width, height, pixels)
    }
}

/// `ratio * frame + (1 - ratio) * base`, per pixel.
pub fn blend(base: &GrayImage, frame: &GrayImage, ratio: f32) -> Result<GrayImage> {
    if base.dimensions() != frame.dimensions() {
        return Err(anyhow!(
            "cannot blend {:?} frame into {:?} baseline",
            frame.dimensions(),
            base.dimensions()
        ));
    }
    let pixels = base
        .as_raw()
        .iter()
        .zip(frame.as_raw())
        .map(|(&b, &f)| {
            (ratio * f as f32 + (1.0 - ratio) * b as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        })
        .collect();
    let (width, height) = base.dimensions();
    GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("blended buffer does not match {}x{}", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn constant(value: u8) -> GrayImage {
        GrayImage::from_pixel(6, 4, Luma([value]))
    }

    #[test]
    fn mean_of_constant_frames_is_their_average() {
        let mut stack = BaselineStack::new(3);
        for value in [10, 20, 30] {
            stack.push(constant(value)).unwrap();
        }
        assert!(stack.is_full());
        let mean = stack.take_mean().unwrap();
        assert!(mean.pixels().all(|p| p.0[0] == 20));
        assert!(stack.is_empty());
    }

    #[test]
    fn mean_of_identical_frames_is_idempotent() {
        let mut stack = BaselineStack::new(4);
        for _ in 0..4 {
            stack.push(constant(137)).unwrap();
        }
        assert_eq!(stack.take_mean().unwrap(), constant(137));
    }

    #[test]
    fn mean_rounds_to_nearest() {
        let mut stack = BaselineStack::new(2);
        stack.push(constant(10)).unwrap();
        stack.push(constant(13)).unwrap();
        // 11.5 rounds up.
        assert!(stack.take_mean().unwrap().pixels().all(|p| p.0[0] == 12));
    }

    #[test]
    fn stack_rejects_overflow_and_mismatched_frames() {
        let mut stack = BaselineStack::new(1);
        assert!(stack.take_mean().is_none());
        stack.push(constant(1)).unwrap();
        assert!(stack.push(constant(1)).is_err());
        stack.clear();
        stack.push(constant(1)).unwrap();

        let mut stack = BaselineStack::new(2);
        stack.push(constant(1)).unwrap();
        assert!(stack.push(GrayImage::new(3, 3)).is_err());
    }

    #[test]
    fn blend_weights_frame_by_ratio() {
        let blended = blend(&constant(100), &constant(200), 0.8).unwrap();
        assert!(blended.pixels().all(|p| p.0[0] == 180));
        assert!(blend(&constant(1), &GrayImage::new(2, 2), 0.5).is_err());
    }
}
