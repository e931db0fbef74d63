//! Classification of raw detections into true positives, false positives and
//! false negatives at an operating confidence threshold

use crate::detection::{Detection, Outcome};
use tracing::{debug, warn};

/// Result of matching one image's detections
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Row indices of true positives
    pub true_positives: Vec<usize>,
    /// Row indices of false positives
    pub false_positives: Vec<usize>,
    /// Row indices of true positives that fell below the threshold
    pub false_negatives: Vec<usize>,
    /// Detections to explain, ordered TP ++ FP ++ FN
    pub work_list: Vec<Detection>,
    pub ground_truth_count: usize,
}

impl MatchResult {
    /// Row indices in work-list order
    #[must_use]
    pub fn work_indices(&self) -> Vec<usize> {
        self.true_positives
            .iter()
            .chain(&self.false_positives)
            .chain(&self.false_negatives)
            .copied()
            .collect()
    }

    /// Every ground-truth box is accounted for by a TP or FN
    #[must_use]
    pub fn covers_ground_truth(&self) -> bool {
        self.true_positives.len() + self.false_negatives.len() == self.ground_truth_count
    }

    /// Outcome of the detection at a work-list position
    #[must_use]
    pub fn outcome_at(&self, position: usize) -> Outcome {
        let tp = self.true_positives.len();
        let fp = self.false_positives.len();
        let fn_ = self.false_negatives.len();
        if position < tp {
            Outcome::TruePositive
        } else if position < tp + fp {
            Outcome::FalsePositive
        } else if position < tp + fp + fn_ {
            Outcome::FalseNegative
        } else {
            Outcome::Unknown
        }
    }
}

/// Detection matcher at a fixed confidence threshold
#[derive(Debug, Clone, Copy)]
pub struct DetectionMatcher {
    confidence_threshold: f32,
}

impl DetectionMatcher {
    #[must_use]
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    #[must_use]
    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Classify detection rows and build the work list
    ///
    /// A TP at or below the threshold becomes an FN and its outcome code is rewritten.
    /// FPs at or below the threshold and rows that decode to neither TP nor FP are dropped.
    #[must_use]
    pub fn match_detections(&self, rows: &[Detection], ground_truth_count: usize) -> MatchResult {
        let mut result = MatchResult {
            ground_truth_count,
            ..Default::default()
        };

        for (index, row) in rows.iter().enumerate() {
            match row.decode() {
                Outcome::TruePositive if row.confidence > self.confidence_threshold => {
                    result.true_positives.push(index);
                }
                Outcome::TruePositive => result.false_negatives.push(index),
                Outcome::FalsePositive if row.confidence > self.confidence_threshold => {
                    result.false_positives.push(index);
                }
                _ => {}
            }
        }

        let mut work_list = Vec::with_capacity(
            result.true_positives.len() + result.false_positives.len() + result.false_negatives.len(),
        );
        work_list.extend(result.true_positives.iter().map(|&i| rows[i].clone()));
        work_list.extend(result.false_positives.iter().map(|&i| rows[i].clone()));
        work_list.extend(result.false_negatives.iter().map(|&i| {
            let mut missed = rows[i].clone();
            missed.mark_false_negative();
            missed
        }));
        result.work_list = work_list;

        if !result.covers_ground_truth() {
            warn!(
                "Some FNs are not covered due to low probability: TP+FN = {}, expected G = {}",
                result.true_positives.len() + result.false_negatives.len(),
                ground_truth_count
            );
        }

        debug!(
            "Matched {} rows: TP={}, FP={}, FN={}",
            rows.len(),
            result.true_positives.len(),
            result.false_positives.len(),
            result.false_negatives.len()
        );

        result
    }
}
