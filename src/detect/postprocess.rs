//! YOLO-style output decoding shared by tensor backends.

use crate::config::InferenceParams;
use crate::detect::result::{BoundingBox, RawDetection};

/// Decode a `[4 + num_classes, num_anchors]` prediction matrix (channel-major,
/// as exported by YOLOv8 heads) into raw detections above the confidence
/// threshold.
pub fn decode_channel_major(
    data: &[f32],
    num_classes: usize,
    num_anchors: usize,
    params: &InferenceParams,
) -> Vec<RawDetection> {
    let channels = 4 + num_classes;
    if data.len() < channels * num_anchors {
        return Vec::new();
    }
    let at = |channel: usize, anchor: usize| data[channel * num_anchors + anchor];

    let mut out = Vec::new();
    for anchor in 0..num_anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }
        out.push(RawDetection {
            bbox: BoundingBox::from_center(
                at(0, anchor),
                at(1, anchor),
                at(2, anchor),
                at(3, anchor),
            ),
            confidence: best_score,
            class_index: best_class,
        });
    }
    out
}

/// Class-aware greedy non-maximum suppression, capped at `max_detections`.
pub fn non_max_suppression(
    mut detections: Vec<RawDetection>,
    params: &InferenceParams,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for candidate in detections {
        if keep.len() >= params.max_detections {
            break;
        }
        let suppressed = keep.iter().any(|kept| {
            kept.class_index == candidate.class_index
                && kept.bbox.iou(&candidate.bbox) > params.iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
