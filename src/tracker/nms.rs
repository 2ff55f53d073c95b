//! Class-aware non-maximum suppression.

use std::collections::BTreeMap;

use super::rect::Rect;

/// One decoded network output row that passed the confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCandidate {
    pub class_id: usize,
    pub confidence: f32,
    /// Box in frame pixels.
    pub rect: Rect,
}

impl DetectionCandidate {
    pub fn new(class_id: usize, confidence: f32, rect: Rect) -> Self {
        Self {
            class_id,
            confidence,
            rect,
        }
    }
}

/// Greedy non-maximum suppression, run independently for each class.
///
/// Within a class, candidates are visited by descending confidence; a candidate survives unless
/// it overlaps an already kept one by more than the IoU threshold.
#[derive(Debug, Clone)]
pub struct NonMaxSuppression {
    score_threshold: f32,
    iou_threshold: f32,
    by_class: BTreeMap<usize, Vec<DetectionCandidate>>,
}

impl NonMaxSuppression {
    pub const DEFAULT_IOU_THRESHOLD: f32 = 0.4;

    pub fn new(score_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            score_threshold,
            iou_threshold,
            by_class: BTreeMap::new(),
        }
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    /// Suppresses overlapping candidates and returns the survivors grouped by class id.
    pub fn process(&mut self, candidates: &[DetectionCandidate]) -> Vec<DetectionCandidate> {
        for group in self.by_class.values_mut() {
            group.clear();
        }
        for c in candidates {
            if c.confidence >= self.score_threshold {
                self.by_class.entry(c.class_id).or_default().push(*c);
            }
        }

        let mut kept = Vec::new();
        for group in self.by_class.values_mut() {
            // Ascending, so the most confident candidate is popped first.
            group.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));
            while let Some(seed) = group.pop() {
                group.retain(|other| seed.rect.iou(&other.rect) <= self.iou_threshold);
                kept.push(seed);
            }
        }
        kept
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new(0.0, Self::DEFAULT_IOU_THRESHOLD)
    }
}
