#![cfg(feature = "backend-tract")]

use std::path::Path;

use eduvision_common::error::{EduvisionError, EduvisionResult};
use eduvision_common::frame::Frame;
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::model::{BoundingBox, Detection, DetectionModel};

/// Scores below this never leave the model; the engine applies the real threshold.
const CANDIDATE_FLOOR: f32 = 0.1;
const PAD_VALUE: f32 = 144.0 / 255.0;
const BOX_FIELDS: usize = 4;

/// YOLOv8 detector exported to ONNX, run on tract.
///
/// Expects a square `[1, 3, S, S]` input and a `[1, 4 + classes, anchors]`
/// output. Frames are letterboxed into the input; boxes are mapped back to
/// frame pixels and de-duplicated with NMS.
pub struct TractYoloModel {
    plan: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    iou_threshold: f32,
}

impl TractYoloModel {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(model_path: &Path, input_size: u32, iou_threshold: f32) -> EduvisionResult<Self> {
        let size = input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .and_then(|m| {
                m.with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))
            })
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| {
                EduvisionError::detection(format!(
                    "Failed to load ONNX model {}: {e}",
                    model_path.display()
                ))
            })?;

        tracing::info!(
            model = %model_path.display(),
            input_size,
            "Detection model loaded"
        );

        Ok(Self {
            plan,
            input_size,
            iou_threshold,
        })
    }

    fn build_input(&self, frame: &Frame) -> (Tensor, f32) {
        let (w0, h0) = (frame.width() as f32, frame.height() as f32);
        let side = self.input_size as f32;
        let ratio = (side / w0).min(side / h0);
        let w1 = ((w0 * ratio).round() as u32).clamp(1, self.input_size);
        let h1 = ((h0 * ratio).round() as u32).clamp(1, self.input_size);
        let resized = imageops::resize(&frame.image, w1, h1, FilterType::Triangle);

        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            if x < w1 as usize && y < h1 as usize {
                resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
            } else {
                PAD_VALUE
            }
        });
        (input.into_tensor(), ratio)
    }
}

impl DetectionModel for TractYoloModel {
    fn name(&self) -> &'static str {
        "tract-yolov8"
    }

    fn infer(&mut self, frame: &Frame) -> EduvisionResult<Vec<Detection>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let (input, ratio) = self.build_input(frame);
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| EduvisionError::detection(format!("ONNX inference failed: {e}")))?;
        let output = outputs
            .first()
            .ok_or_else(|| EduvisionError::detection("Model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| EduvisionError::detection(format!("Model output was not f32: {e}")))?;

        let shape = view.shape();
        if shape.len() != 3 || shape[1] <= BOX_FIELDS {
            return Err(EduvisionError::detection(format!(
                "Unexpected output shape {shape:?}"
            )));
        }
        let (fields, anchors) = (shape[1], shape[2]);
        let mut data = Vec::with_capacity(fields * anchors);
        for f in 0..fields {
            for a in 0..anchors {
                data.push(view[[0, f, a]]);
            }
        }

        let candidates = decode_yolov8(
            &data,
            fields,
            anchors,
            ratio,
            (frame.width() as f32, frame.height() as f32),
        );
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Decode a field-major `[4 + classes, anchors]` prediction block.
///
/// Each anchor keeps its best-scoring class. Coordinates are divided by the
/// letterbox `ratio` and clamped to `frame` (width, height).
pub(crate) fn decode_yolov8(
    data: &[f32],
    fields: usize,
    anchors: usize,
    ratio: f32,
    frame: (f32, f32),
) -> Vec<Detection> {
    let at = |f: usize, a: usize| data[f * anchors + a];
    let mut out = Vec::new();

    for a in 0..anchors {
        let Some((class_id, confidence)) = (BOX_FIELDS..fields)
            .map(|f| (f - BOX_FIELDS, at(f, a)))
            .reduce(|best, x| if x.1 > best.1 { x } else { best })
        else {
            continue;
        };
        if confidence < CANDIDATE_FLOOR {
            continue;
        }

        let cx = at(0, a) / ratio;
        let cy = at(1, a) / ratio;
        let w = at(2, a) / ratio;
        let h = at(3, a) / ratio;
        let bbox = BoundingBox::new(
            (cx - w / 2.0).clamp(0.0, frame.0),
            (cy - h / 2.0).clamp(0.0, frame.1),
            (cx + w / 2.0).clamp(0.0, frame.0),
            (cy + h / 2.0).clamp(0.0, frame.1),
        );
        out.push(Detection::new(bbox, confidence, class_id as u32));
    }
    out
}

/// Greedy class-agnostic NMS, highest confidence first.
pub(crate) fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_picks_best_class_and_rescales() {
        // Two anchors, two classes. Field-major layout.
        let data = vec![
            100.0, 10.0, // cx
            100.0, 10.0, // cy
            40.0, 4.0, // w
            20.0, 4.0, // h
            0.9, 0.05, // class 0
            0.2, 0.02, // class 1
        ];
        let dets = decode_yolov8(&data, 6, 2, 0.5, (640.0, 480.0));
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert_eq!(d.class_id, 0);
        assert!((d.confidence - 0.9).abs() < 1e-6);
        assert_eq!(d.bbox, BoundingBox::new(160.0, 180.0, 240.0, 220.0));
    }

    #[test]
    fn nms_keeps_highest_of_overlapping_boxes() {
        let a = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 0);
        let b = Detection::new(BoundingBox::new(1.0, 1.0, 10.0, 10.0), 0.8, 2);
        let c = Detection::new(BoundingBox::new(30.0, 30.0, 40.0, 40.0), 0.8, 0);
        let kept = non_max_suppression(vec![b, a, c], 0.45);
        assert_eq!(kept, vec![a, c]);
    }
}
