#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const MODEL_INPUT: u32 = 640;
/// COCO class index for "person".
const PERSON_CLASS: usize = 0;

/// Tract-based YOLOv8 person detector.
///
/// Loads a local ONNX export (`[1, 3, 640, 640]` in, `[1, 4 + classes, anchors]` out),
/// keeps person boxes above the confidence threshold and applies greedy NMS.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, MODEL_INPUT as usize, MODEL_INPUT as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            confidence_threshold: 0.5,
            iou_threshold: 0.7,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(frame.image(), MODEL_INPUT, MODEL_INPUT, FilterType::Triangle);
        let side = MODEL_INPUT as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn extract_boxes(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("YOLO output must be three-dimensional")?;
        let shape = view.shape().to_vec();
        if shape[1] <= 4 + PERSON_CLASS {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }

        let sx = frame.width() as f32 / MODEL_INPUT as f32;
        let sy = frame.height() as f32 / MODEL_INPUT as f32;
        let mut candidates = Vec::new();
        for anchor in 0..shape[2] {
            let score = view[[0, 4 + PERSON_CLASS, anchor]];
            if score < self.confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, anchor]] * sx;
            let cy = view[[0, 1, anchor]] * sy;
            let w = view[[0, 2, anchor]] * sx;
            let h = view[[0, 3, anchor]] * sy;
            candidates.push(Detection::person(BoundingBox::centered(cx, cy, w, h), score));
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_boxes(outputs, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_highest_of_overlapping_boxes() {
        let a = Detection::person(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9);
        let b = Detection::person(BoundingBox::new(1.0, 0.0, 11.0, 10.0), 0.8);
        let c = Detection::person(BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0.6);
        let kept = non_max_suppression(vec![b, c.clone(), a.clone()], 0.7);
        assert_eq!(kept, vec![a, c]);
    }
}
