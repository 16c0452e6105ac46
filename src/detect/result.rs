/// Detected object. Coordinates are normalized to the frame (0..1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bbox {
    /// Box center.
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class_id: u32,
}

/// Pixel-space rectangle: top-left corner plus size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bbox {
    /// Rectangle in a `frame_width`x`frame_height` image.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelRect {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        PixelRect {
            x: ((self.cx - self.w / 2.0) * fw) as i32,
            y: ((self.cy - self.h / 2.0) * fh) as i32,
            width: (self.w * fw).max(0.0) as u32,
            height: (self.h * fh).max(0.0) as u32,
        }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection over union of two boxes.
    pub fn iou(&self, other: &Bbox) -> f32 {
        let left = (self.cx - self.w / 2.0).max(other.cx - other.w / 2.0);
        let right = (self.cx + self.w / 2.0).min(other.cx + other.w / 2.0);
        let top = (self.cy - self.h / 2.0).max(other.cy - other.h / 2.0);
        let bottom = (self.cy + self.h / 2.0).min(other.cy + other.h / 2.0);
        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Greedy per-class non-max suppression. Highest confidence wins.
pub fn non_max_suppression(mut boxes: Vec<Bbox>, iou_threshold: f32) -> Vec<Bbox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Bbox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(cx: f32, cy: f32, confidence: f32, class_id: u32) -> Bbox {
        Bbox {
            cx,
            cy,
            w: 0.2,
            h: 0.2,
            confidence,
            class_id,
        }
    }

    #[test]
    fn to_pixels_converts_center_format() {
        let rect = Bbox {
            cx: 0.5,
            cy: 0.5,
            w: 0.5,
            h: 0.25,
            confidence: 0.9,
            class_id: 0,
        }
        .to_pixels(640, 480);
        assert_eq!(
            rect,
            PixelRect {
                x: 160,
                y: 180,
                width: 320,
                height: 120
            }
        );
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = bbox(0.5, 0.5, 0.9, 0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&bbox(0.1, 0.1, 0.9, 0)), 0.0);
    }

    #[test]
    fn nms_keeps_best_overlapping_box_per_class() {
        let boxes = vec![
            bbox(0.5, 0.5, 0.6, 0),
            bbox(0.51, 0.5, 0.9, 0),
            bbox(0.5, 0.5, 0.8, 1),
            bbox(0.1, 0.1, 0.3, 0),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert!(kept.iter().all(|b| b.confidence != 0.6));
    }
}
