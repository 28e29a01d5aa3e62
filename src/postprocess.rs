//! Confidence filtering, non-maximum suppression and rescaling.
//!
//! Everything here is a pure function of its inputs: identical raw detections
//! and parameters always produce an identical `DetectionSet`, in the same
//! order.

use std::cmp::Ordering;

use crate::detect::{Detection, DetectionSet, PixelBox, RawDetection};
use crate::preprocess::Letterbox;

/// Upper bound on candidates entering suppression.
pub const MAX_NMS_CANDIDATES: usize = 30_000;

#[derive(Clone, Debug, PartialEq)]
pub struct NmsParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Suppress across classes instead of per class.
    pub class_agnostic: bool,
    /// Keep only these class ids, when set.
    pub classes: Option<Vec<usize>>,
}

impl Default for NmsParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 1000,
            class_agnostic: false,
            classes: None,
        }
    }
}

/// Greedy suppression in model-input space.
///
/// Candidates below the confidence threshold are dropped before any overlap
/// test. Survivors are ordered by descending confidence; equal confidences keep
/// their raw order. A candidate is suppressed when it overlaps an already kept
/// box of the same class (any class when agnostic) by more than the IoU
/// threshold. At most `max_detections` are kept.
pub fn non_max_suppression(raw: &[RawDetection], params: &NmsParams) -> Vec<RawDetection> {
    let mut candidates: Vec<RawDetection> = raw
        .iter()
        .filter(|d| d.is_well_formed() && d.confidence >= params.confidence_threshold)
        .filter(|d| {
            params
                .classes
                .as_ref()
                .map_or(true, |allowed| allowed.contains(&d.class_id))
        })
        .copied()
        .collect();

    // Stable sort: equal confidences keep their position in the raw output.
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    candidates.truncate(MAX_NMS_CANDIDATES);

    let mut kept: Vec<RawDetection> = Vec::new();
    'candidates: for candidate in candidates {
        if kept.len() >= params.max_detections {
            break;
        }
        for existing in &kept {
            let same_group = params.class_agnostic || existing.class_id == candidate.class_id;
            if same_group && candidate.iou(existing) > params.iou_threshold {
                continue 'candidates;
            }
        }
        kept.push(candidate);
    }
    kept
}

/// Map a model-space detection onto the source frame: undo padding and gain,
/// clamp to `[0, width] x [0, height]`, round to whole pixels.
pub fn rescale(detection: &RawDetection, letterbox: &Letterbox) -> Detection {
    let (x1, y1) = letterbox.to_source(detection.x1, detection.y1);
    let (x2, y2) = letterbox.to_source(detection.x2, detection.y2);
    let max_x = letterbox.source_width as f32;
    let max_y = letterbox.source_height as f32;
    let clamp = |value: f32, max: f32| value.clamp(0.0, max).round() as u32;

    Detection {
        bbox: PixelBox {
            x1: clamp(x1, max_x),
            y1: clamp(y1, max_y),
            x2: clamp(x2, max_x),
            y2: clamp(y2, max_y),
        },
        confidence: detection.confidence.clamp(0.0, 1.0),
        class_id: detection.class_id,
    }
}

/// Suppress, then rescale into source-frame pixels.
pub fn postprocess(
    raw: &[RawDetection],
    params: &NmsParams,
    letterbox: &Letterbox,
) -> DetectionSet {
    DetectionSet::new(
        non_max_suppression(raw, params)
            .iter()
            .map(|d| rescale(d, letterbox))
            .collect(),
    )
}
