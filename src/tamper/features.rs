//! Keypoint extraction and descriptor matching.
//!
//! `FeatureExtractor` is the seam the tamper detector depends on. `OrbExtractor`
//! is the built-in implementation:
//! - FAST-9 corners on the raw image, 3x3 non-max suppression, strongest
//!   `max_features` kept
//! - 256-bit BRIEF descriptors sampled from a Gaussian-smoothed copy over a fixed
//!   31x31 pattern
//! - brute-force Hamming matching with cross-check (a pair counts only when each
//!   descriptor is the other's nearest neighbour)

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::OnceLock;

pub const DESCRIPTOR_BYTES: usize = 32;
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

const PATCH_RADIUS: i32 = 15;
const BORDER: u32 = PATCH_RADIUS as u32 + 1;
const ARC_LENGTH: usize = 9;
const PATTERN_SEED: u64 = 0x0b1e_c7ed;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    /// Corner response; larger is stronger.
    pub score: u32,
}

/// Keypoints and their descriptors, index-aligned.
#[derive(Clone, Debug, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Feature detection and matching used by the tamper detector.
pub trait FeatureExtractor: Send {
    fn detect_and_describe(&self, image: &GrayImage) -> Features;

    /// Number of one-to-one correspondences between two feature sets.
    fn match_count(&self, a: &Features, b: &Features) -> usize;
}

#[derive(Clone, Debug)]
pub struct OrbExtractor {
    pub fast_threshold: u8,
    pub max_features: usize,
    pub blur_sigma: f32,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_features: 500,
            blur_sigma: 2.0,
        }
    }
}

impl FeatureExtractor for OrbExtractor {
    fn detect_and_describe(&self, image: &GrayImage) -> Features {
        let keypoints = self.detect(image);
        if keypoints.is_empty() {
            return Features::default();
        }
        let smoothed = image::imageops::blur(image, self.blur_sigma);
        let descriptors = keypoints
            .iter()
            .map(|kp| describe(&smoothed, kp))
            .collect();
        Features {
            keypoints,
            descriptors,
        }
    }

    fn match_count(&self, a: &Features, b: &Features) -> usize {
        cross_check_matches(&a.descriptors, &b.descriptors)
    }
}

impl OrbExtractor {
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        let (width, height) = image.dimensions();
        if width <= 2 * BORDER || height <= 2 * BORDER {
            return Vec::new();
        }

        let mut scores = vec![0u32; (width * height) as usize];
        for y in BORDER..height - BORDER {
            for x in BORDER..width - BORDER {
                if let Some(score) = fast_score(image, x, y, self.fast_threshold) {
                    scores[(y * width + x) as usize] = score;
                }
            }
        }

        let mut keypoints = Vec::new();
        for y in BORDER..height - BORDER {
            for x in BORDER..width - BORDER {
                let idx = (y * width + x) as usize;
                let score = scores[idx];
                if score > 0 && is_local_max(&scores, width, x, y, score) {
                    keypoints.push(Keypoint { x, y, score });
                }
            }
        }

        // Stable sort keeps raster order among equal scores.
        keypoints.sort_by(|a, b| b.score.cmp(&a.score));
        keypoints.truncate(self.max_features);
        keypoints
    }
}

fn fast_score(image: &GrayImage, x: u32, y: u32, threshold: u8) -> Option<u32> {
    let data = image.as_raw();
    let width = image.width() as i32;
    let at = |dx: i32, dy: i32| -> i16 {
        data[((y as i32 + dy) * width + x as i32 + dx) as usize] as i16
    };

    let center = at(0, 0);
    let t = threshold as i16;
    let mut states = [0i8; 16];
    let mut score = 0u32;
    for (i, &(dx, dy)) in CIRCLE.iter().enumerate() {
        let diff = at(dx, dy) - center;
        if diff > t {
            states[i] = 1;
            score += (diff - t) as u32;
        } else if diff < -t {
            states[i] = -1;
            score += (-diff - t) as u32;
        }
    }

    (has_arc(&states, 1) || has_arc(&states, -1)).then_some(score.max(1))
}

fn has_arc(states: &[i8; 16], want: i8) -> bool {
    let mut run = 0;
    for i in 0..states.len() * 2 {
        if states[i % states.len()] == want {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn is_local_max(scores: &[u32], width: u32, x: u32, y: u32, score: u32) -> bool {
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = (x as i32 + dx) as u32;
            let ny = (y as i32 + dy) as u32;
            let neighbour = scores[(ny * width + nx) as usize];
            // Ties go to the neighbour earlier in raster order.
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if neighbour > score || (earlier && neighbour == score) {
                return false;
            }
        }
    }
    true
}

fn pattern() -> &'static [[(i32, i32); 2]] {
    static PATTERN: OnceLock<Vec<[(i32, i32); 2]>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut sample = move || {
            // Triangular distribution concentrates tests near the keypoint.
            let a: i32 = rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS);
            let b: i32 = rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS);
            (a + b) / 2
        };
        (0..DESCRIPTOR_BYTES * 8)
            .map(|_| [(sample(), sample()), (sample(), sample())])
            .collect()
    })
}

fn describe(smoothed: &GrayImage, kp: &Keypoint) -> Descriptor {
    let data = smoothed.as_raw();
    let width = smoothed.width() as i32;
    let at = |(dx, dy): (i32, i32)| -> u8 {
        data[((kp.y as i32 + dy) * width + kp.x as i32 + dx) as usize]
    };

    let mut descriptor = [0u8; DESCRIPTOR_BYTES];
    for (bit, [p, q]) in pattern().iter().enumerate() {
        if at(*p) < at(*q) {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}

pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn nearest(query: &Descriptor, train: &[Descriptor]) -> Option<usize> {
    train
        .iter()
        .enumerate()
        .min_by_key(|(_, candidate)| hamming(query, candidate))
        .map(|(idx, _)| idx)
}

/// Count mutual nearest neighbours between two descriptor sets.
pub fn cross_check_matches(a: &[Descriptor], b: &[Descriptor]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let backward: Vec<Option<usize>> = b.iter().map(|d| nearest(d, a)).collect();
    a.iter()
        .enumerate()
        .filter(|(i, d)| nearest(d, b).is_some_and(|j| backward[j] == Some(*i)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn block_texture(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let cells: Vec<u8> = (0..(width / 8 + 1) * (height / 8 + 1))
            .map(|_| if rng.gen_bool(0.5) { 230 } else { 20 })
            .collect();
        GrayImage::from_fn(width, height, |x, y| {
            Luma([cells[((y / 8) * (width / 8 + 1) + x / 8) as usize]])
        })
    }

    #[test]
    fn uniform_image_has_no_keypoints() {
        let extractor = OrbExtractor::default();
        let black = GrayImage::new(128, 96);
        assert!(extractor.detect_and_describe(&black).is_empty());
    }

    #[test]
    fn textured_image_matches_itself() {
        let extractor = OrbExtractor::default();
        let image = block_texture(160, 120, 7);
        let features = extractor.detect_and_describe(&image);
        assert!(!features.is_empty());
        assert_eq!(features.keypoints.len(), features.descriptors.len());
        assert!(features.len() <= extractor.max_features);

        let matches = extractor.match_count(&features, &features);
        assert!(matches > 0);
        assert!(matches <= features.len());
    }

    #[test]
    fn keypoints_respect_feature_cap() {
        let extractor = OrbExtractor {
            max_features: 5,
            ..OrbExtractor::default()
        };
        let features = extractor.detect_and_describe(&block_texture(160, 120, 3));
        assert!(features.len() <= 5);
        let scores: Vec<u32> = features.keypoints.iter().map(|k| k.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn cross_check_is_one_to_one() {
        let a = [[0u8; 32], [0xff; 32]];
        let b = [[0u8; 32], [0x01; 32], [0xfe; 32]];
        // [0;32] <-> [0;32] and [0xff;32] <-> [0xfe;32]; [0x01;32] has no partner.
        assert_eq!(cross_check_matches(&a, &b), 2);
        assert_eq!(cross_check_matches(&b, &a), 2);
        assert_eq!(cross_check_matches(&a, &[]), 0);
    }

    #[test]
    fn hamming_counts_differing_bits() {
        let mut b = [0u8; 32];
        b[0] = 0b1011;
        b[31] = 0x80;
        assert_eq!(hamming(&[0u8; 32], &b), 4);
    }
}
