#![cfg(feature = "backend-tract")]

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::decode::DecodedFrame;
use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::backends::coco::class_name;
use crate::detect::result::{BoundingBox, Detection};

const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;

/// Tract-based backend for YOLOv8-family ONNX exports.
///
/// The model is loaded from a local file once; inference runs on the CPU and
/// performs no network I/O or disk writes. Expected output layout is
/// `[1, 4 + classes, anchors]` with centre-format boxes in input pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    iou_threshold: f32,
}

/// A candidate box before suppression, in model input coordinates.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    class_id: usize,
    score: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk with a square `input_size` input.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default NMS overlap threshold.
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &DecodedFrame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn detect(&mut self, frame: &DecodedFrame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [batch, attributes, anchors]")?;
        let candidates = extract_candidates(view, confidence_threshold)?;
        let kept = non_max_suppression(candidates, self.iou_threshold);
        Ok(kept
            .iter()
            .map(|c| to_detection(c, self.input_size, frame.width(), frame.height()))
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up inference failed")?;
        Ok(())
    }
}

/// Decode a `[1, 4 + classes, anchors]` YOLOv8 head into corner-format boxes.
///
/// Each anchor keeps its best-scoring class; anchors below `threshold` or with
/// a non-positive width or height are skipped.
fn extract_candidates(
    view: tract_ndarray::ArrayView3<f32>,
    threshold: f32,
) -> Result<Vec<Candidate>> {
    let (_, attributes, anchors) = view.dim();
    if attributes <= 4 {
        return Err(anyhow!(
            "model output has {} attributes per anchor; expected box + class scores",
            attributes
        ));
    }

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..attributes)
            .map(|row| (row - 4, view[[0, row, anchor]]))
            .fold((0, f32::NEG_INFINITY), |best, next| {
                if next.1 > best.1 {
                    next
                } else {
                    best
                }
            });
        if !score.is_finite() || score < threshold {
            continue;
        }
        let cx = view[[0, 0, anchor]];
        let cy = view[[0, 1, anchor]];
        let w = view[[0, 2, anchor]];
        let h = view[[0, 3, anchor]];
        if w <= 0.0 || h <= 0.0 {
            continue;
        }
        candidates.push(Candidate {
            class_id,
            score,
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        });
    }
    Ok(candidates)
}

/// Map a candidate from the square model input back onto a `width` x `height` frame.
fn to_detection(candidate: &Candidate, input_size: u32, width: u32, height: u32) -> Detection {
    let scale_x = width as f32 / input_size as f32;
    let scale_y = height as f32 / input_size as f32;
    let x1 = (candidate.x1 * scale_x).clamp(0.0, width as f32);
    let y1 = (candidate.y1 * scale_y).clamp(0.0, height as f32);
    let x2 = (candidate.x2 * scale_x).clamp(0.0, width as f32);
    let y2 = (candidate.y2 * scale_y).clamp(0.0, height as f32);
    Detection::new(class_name(candidate.class_id), candidate.score.clamp(0.0, 1.0)).with_box(
        BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        },
    )
}

/// Per-class greedy suppression. Output is ordered by descending score.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && intersection_over_union(k, &candidate) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
            if kept.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    kept
}

fn intersection_over_union(a: &Candidate, b: &Candidate) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = ix * iy;
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(class_id: usize, score: f32, x1: f32) -> Candidate {
        Candidate {
            class_id,
            score,
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
        }
    }

    #[test]
    fn suppression_keeps_best_of_overlapping_same_class() {
        let kept = non_max_suppression(
            vec![
                candidate(0, 0.6, 1.0),
                candidate(0, 0.9, 0.0),
                candidate(43, 0.7, 0.0),
                candidate(0, 0.8, 50.0),
            ],
            0.45,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7]);
    }

    /// Builds a `[1, 4 + 3, anchors]` head from per-anchor `[cx, cy, w, h, s0, s1, s2]`.
    fn head(anchors: &[[f32; 7]]) -> tract_ndarray::Array3<f32> {
        tract_ndarray::Array3::from_shape_fn((1, 7, anchors.len()), |(_, row, anchor)| {
            anchors[anchor][row]
        })
    }

    #[test]
    fn head_decoding_picks_best_class_and_skips_weak_or_degenerate() {
        let output = head(&[
            [100.0, 100.0, 40.0, 20.0, 0.1, 0.8, 0.3],
            [50.0, 50.0, 10.0, 10.0, 0.2, 0.3, 0.1],
            [10.0, 10.0, 0.0, 10.0, 0.9, 0.0, 0.0],
            [10.0, 10.0, 10.0, -1.0, 0.0, 0.0, 0.95],
        ]);
        let candidates = extract_candidates(output.view(), 0.5).unwrap();
        assert_eq!(candidates.len(), 1);
        let kept = candidates[0];
        assert_eq!(kept.class_id, 1);
        assert_eq!(kept.score, 0.8);
        assert_eq!((kept.x1, kept.y1, kept.x2, kept.y2), (80.0, 90.0, 120.0, 110.0));
    }

    #[test]
    fn head_without_class_rows_is_rejected() {
        let output = tract_ndarray::Array3::<f32>::zeros((1, 4, 2));
        assert!(extract_candidates(output.view(), 0.5).is_err());
    }

    #[test]
    fn boxes_scale_back_to_non_square_frame() {
        let candidate = Candidate {
            class_id: 43,
            score: 0.8,
            x1: 80.0,
            y1: 90.0,
            x2: 120.0,
            y2: 110.0,
        };
        let detection = to_detection(&candidate, 640, 320, 480);
        assert_eq!(detection.label, "knife");
        assert_eq!(detection.confidence, 0.8);
        assert_eq!(
            detection.bbox,
            Some(BoundingBox {
                x: 40.0,
                y: 67.5,
                width: 20.0,
                height: 15.0,
            })
        );
    }

    #[test]
    fn boxes_are_clamped_to_the_frame() {
        let candidate = Candidate {
            class_id: 0,
            score: 0.6,
            x1: -10.0,
            y1: 600.0,
            x2: 700.0,
            y2: 700.0,
        };
        let detection = to_detection(&candidate, 640, 320, 320);
        assert_eq!(detection.label, "person");
        assert_eq!(
            detection.bbox,
            Some(BoundingBox {
                x: 0.0,
                y: 300.0,
                width: 320.0,
                height: 20.0,
            })
        );
    }

    #[test]
    fn disjoint_boxes_have_zero_overlap() {
        let a = candidate(0, 0.5, 0.0);
        let b = candidate(0, 0.5, 20.0);
        assert_eq!(intersection_over_union(&a, &b), 0.0);
        assert!((intersection_over_union(&a, &a) - 1.0).abs() < f32::EPSILON);
    }
}
