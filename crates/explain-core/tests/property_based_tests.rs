//! Property-Based Tests
//!
//! Invariants of path sampling, batched evaluation and matching, checked over
//! generated sample counts, batch sizes and detection sets.

use e2x_core::detection::{Detection, OutcomeCode};
use e2x_core::network::{GradientNetwork, NetworkError, TargetIndex};
use e2x_core::sampler::linear_path;
use e2x_core::segmentation::uniform;
use e2x_core::{DetectionMatcher, PathStrategy, PerturbationBatchEvaluator, SegmentSampler};
use e2x_common::BoundingBox;
use ndarray::{Array4, ArrayView4, Axis};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Gradient of every row is the row itself
struct Echo;

impl GradientNetwork for Echo {
    type State = Array4<f32>;

    fn input_shape(&self) -> (usize, usize, usize) {
        (1, 2, 2)
    }

    fn num_classes(&self) -> usize {
        21
    }

    fn forward(&mut self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>, NetworkError> {
        Ok(batch.to_owned())
    }

    fn backward(&mut self, state: &Array4<f32>, _: TargetIndex) -> Result<Array4<f32>, NetworkError> {
        Ok(state.clone())
    }
}

// ============================================================================
// Path Sampling Properties
// ============================================================================

/// Property: every column is a permutation of the linear path, with mean 0.5
#[test]
fn proptest_columns_are_permutations() {
    proptest!(|(samples in 2usize..64, segments in 1usize..40, seed in any::<u64>(), shared in any::<bool>())| {
        let strategy = if shared { PathStrategy::Shared } else { PathStrategy::Independent };
        let matrix = SegmentSampler::new(samples)
            .with_strategy(strategy)
            .sample(segments, &mut StdRng::seed_from_u64(seed));

        let base = linear_path(samples);
        for s in 0..segments {
            let mut column = matrix.column(s).to_vec();
            column.sort_by(f32::total_cmp);
            prop_assert_eq!(&column, &base);
            let mean = matrix.column(s).sum() / samples as f32;
            prop_assert!((mean - 0.5).abs() < 1e-4, "column mean {} should be 0.5", mean);
        }
    });
}

// ============================================================================
// Batch Alignment Properties
// ============================================================================

/// Property: response slice s corresponds to sample s for any batch size
#[test]
fn proptest_responses_align_with_samples() {
    proptest!(|(samples in 1usize..48, batch_size in 1usize..70)| {
        let input = Array4::from_shape_fn((samples, 1, 2, 2), |(s, _, h, w)| (s * 4 + h * 2 + w) as f32);
        let target = TargetIndex { label: 1, instance: 0, num_classes: 21 };

        let responses = PerturbationBatchEvaluator::new(batch_size)
            .unwrap()
            .evaluate(&mut Echo, input.view(), target)
            .unwrap();

        prop_assert_eq!(responses.num_samples(), samples);
        for s in 0..samples {
            prop_assert_eq!(responses.sample(s), input.index_axis(Axis(0), s));
        }
    });
}

// ============================================================================
// Matching Properties
// ============================================================================

fn outcome_code() -> impl Strategy<Value = OutcomeCode> {
    prop_oneof![
        Just(OutcomeCode::TRUE_POSITIVE),
        Just(OutcomeCode::FALSE_POSITIVE),
        Just(OutcomeCode::FALSE_NEGATIVE),
        Just(OutcomeCode { tp: 0.0, fp: 0.0 }),
    ]
}

/// Property: the work list is TP ++ FP ++ FN and never longer than the input
#[test]
fn proptest_work_list_order() {
    proptest!(|(rows in prop::collection::vec((outcome_code(), 0.0f32..1.0), 0..30), threshold in 0.0f32..1.0)| {
        let detections: Vec<Detection> = rows
            .iter()
            .enumerate()
            .map(|(i, &(outcome, confidence))| Detection {
                image_id: 0.0,
                label: 1,
                confidence,
                outcome,
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                instance_index: i,
            })
            .collect();

        let matched = DetectionMatcher::new(threshold).match_detections(&detections, 0);
        let expected_len = matched.true_positives.len()
            + matched.false_positives.len()
            + matched.false_negatives.len();
        prop_assert_eq!(matched.work_list.len(), expected_len);
        prop_assert!(expected_len <= detections.len());

        let indices = matched.work_indices();
        for (position, detection) in matched.work_list.iter().enumerate() {
            prop_assert_eq!(detection.instance_index, indices[position]);
        }
        for &i in &matched.true_positives {
            prop_assert!(detections[i].confidence > threshold);
        }
        for &i in &matched.false_negatives {
            prop_assert!(detections[i].confidence <= threshold);
        }
    });
}

// ============================================================================
// Uniform Segmentation Properties
// ============================================================================

/// Property: uniform segmentation is deterministic and labels every pixel
#[test]
fn proptest_uniform_deterministic() {
    proptest!(|(height in 4usize..80, width in 4usize..80, segments in 1usize..16)| {
        let a = uniform(height, width, segments).unwrap();
        let b = uniform(height, width, segments).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.segment_sizes().iter().sum::<usize>(), height * width);
    });
}
