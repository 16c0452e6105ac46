use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::{non_max_suppression, Bbox};
use crate::frame::Frame;

/// Settings for the YOLO backend.
#[derive(Clone, Debug)]
pub struct YoloConfig {
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub iou: f32,
    pub n_classes: usize,
}

/// Tract-based YOLO (anchor-free, single output head) detector.
///
/// The model is validated when loaded: exactly one input and one output, input
/// of f32 elements shaped [1, 3, H, W] matching the frame size, output shaped
/// [1, 4 + classes, boxes]. A mismatch is a load error, not a runtime one.
pub struct TractYolo {
    model: TypedRunnableModel<TypedModel>,
    config: YoloConfig,
    n_boxes: usize,
}

/// Number of predictions produced by a three-scale head (strides 8, 16, 32).
fn expected_boxes(width: u32, height: u32) -> usize {
    let cells = (width as usize * height as usize) / 64;
    cells + cells / 4 + cells / 16
}

impl TractYolo {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, config: YoloConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        log::info!("setting up model {}", model_path.display());
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .into_typed()
            .context("failed to type ONNX model")?;

        if model.inputs.len() != 1 {
            return Err(anyhow!(
                "number of input nodes must be 1, but got {}",
                model.inputs.len()
            ));
        }
        if model.outputs.len() != 1 {
            return Err(anyhow!(
                "number of output nodes must be 1, but got {}",
                model.outputs.len()
            ));
        }

        let input = model.input_fact(0).context("read model input fact")?;
        if input.datum_type != f32::datum_type() {
            return Err(anyhow!(
                "data type of model input must be float32, got {:?}",
                input.datum_type
            ));
        }
        let input_shape = input
            .shape
            .as_concrete()
            .ok_or_else(|| anyhow!("model input shape must be fixed, got {:?}", input.shape))?;
        if input_shape.len() != 4 {
            return Err(anyhow!(
                "input shape of model must be 4-dim, but got {}-dim",
                input_shape.len()
            ));
        }
        let wanted = [1, 3, config.height as usize, config.width as usize];
        if input_shape != wanted {
            return Err(anyhow!(
                "provided input size WH is [{}, {}], but model input is {:?}; batch and channels must be 1 and 3",
                config.width,
                config.height,
                input_shape
            ));
        }

        let n_boxes = expected_boxes(config.width, config.height);
        let box_width = 4 + config.n_classes;
        let output = model.output_fact(0).context("read model output fact")?;
        let output_shape = output.shape.as_concrete();
        if output_shape != Some(&[1, box_width, n_boxes][..]) {
            return Err(anyhow!(
                "output shape of model must be [1, {}, {}], but got {:?}",
                box_width,
                n_boxes,
                output.shape
            ));
        }

        let model = model
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!("all model checks passed");

        Ok(Self {
            model,
            config,
            n_boxes,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.config.width,
                self.config.height
            ));
        }

        let pixels = frame.to_rgb_bytes();
        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| pixels[(y * width + x) * 3 + channel] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Bbox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let width = self.config.width as f32;
        let height = self.config.height as f32;
        let mut candidates = Vec::new();
        for n in 0..self.n_boxes {
            let (class_id, confidence) = (0..self.config.n_classes)
                .map(|c| (c, view[[0, 4 + c, n]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if confidence <= self.config.confidence {
                continue;
            }
            candidates.push(Bbox {
                cx: (view[[0, 0, n]] / width).clamp(0.0, 1.0),
                cy: (view[[0, 1, n]] / height).clamp(0.0, 1.0),
                w: (view[[0, 2, n]] / width).clamp(0.0, 1.0),
                h: (view[[0, 3, n]] / height).clamp(0.0, 1.0),
                confidence: confidence.min(1.0),
                class_id: class_id as u32,
            });
        }

        Ok(non_max_suppression(candidates, self.config.iou))
    }
}

impl ObjectDetector for TractYolo {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&mut self, frame: &Frame) -> Result<Vec<Bbox>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_count_matches_three_scale_head() {
        assert_eq!(expected_boxes(640, 640), 8400);
        assert_eq!(expected_boxes(320, 320), 2100);
    }

    #[test]
    fn missing_model_is_a_load_error() {
        let config = YoloConfig {
            width: 640,
            height: 640,
            confidence: 0.5,
            iou: 0.45,
            n_classes: 1,
        };
        assert!(TractYolo::new("/nonexistent/model.onnx", config).is_err());
    }
}
