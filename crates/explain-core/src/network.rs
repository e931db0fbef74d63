//! Detector capabilities consumed by the explanation pipeline
//!
//! The pipeline never binds to a concrete network. It talks to two capabilities:
//! - [`DetectionEvaluator`]: runs the evaluation network on one image and returns the
//!   raw detection rows, already classified against ground truth.
//! - [`GradientNetwork`]: runs a forward pass on a batch and returns an explicit state,
//!   then computes the gradient of one detection's score with respect to the batch.

use crate::detection::{Detection, GroundTruthBox};
use ndarray::{Array4, ArrayView3, ArrayView4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Forward pass failed: {0}")]
    Forward(String),

    #[error("Backward pass failed: {0}")]
    Backward(String),

    #[error("Device out of memory")]
    OutOfMemory,

    #[error("Invalid network input: {0}")]
    InvalidInput(String),
}

/// Backward target: one class score of one detection instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIndex {
    pub label: u32,
    pub instance: usize,
    /// Class count including background
    pub num_classes: usize,
}

impl TargetIndex {
    #[must_use]
    pub fn for_detection(detection: &Detection, num_classes: usize) -> Self {
        Self {
            label: detection.label,
            instance: detection.instance_index,
            num_classes,
        }
    }

    /// Flat index into the network's `instances x classes` score output
    #[must_use]
    pub fn encode(&self) -> usize {
        self.num_classes * self.instance + self.label as usize
    }
}

/// Evaluation network: detections for one image, matched against its ground truth
pub trait DetectionEvaluator {
    /// `input` is one network blob in `C x H x W` layout
    fn evaluate(
        &mut self,
        input: ArrayView3<'_, f32>,
        ground_truth: &[GroundTruthBox],
    ) -> Result<Vec<Detection>, NetworkError>;
}

/// Gradient network with explicit per-batch state
pub trait GradientNetwork {
    /// Whatever the backward pass needs from the forward pass
    type State;

    /// Expected per-sample input layout `(C, H, W)`
    fn input_shape(&self) -> (usize, usize, usize);

    /// Class count including background
    fn num_classes(&self) -> usize;

    /// Run the forward pass on a `B x C x H x W` batch
    fn forward(&mut self, batch: ArrayView4<'_, f32>) -> Result<Self::State, NetworkError>;

    /// Gradient of the target score with respect to every batch row, `B x C x H x W`
    fn backward(
        &mut self,
        state: &Self::State,
        target: TargetIndex,
    ) -> Result<Array4<f32>, NetworkError>;
}

impl<T: DetectionEvaluator + ?Sized> DetectionEvaluator for &mut T {
    fn evaluate(
        &mut self,
        input: ArrayView3<'_, f32>,
        ground_truth: &[GroundTruthBox],
    ) -> Result<Vec<Detection>, NetworkError> {
        (**self).evaluate(input, ground_truth)
    }
}

impl<T: GradientNetwork + ?Sized> GradientNetwork for &mut T {
    type State = T::State;

    fn input_shape(&self) -> (usize, usize, usize) {
        (**self).input_shape()
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn forward(&mut self, batch: ArrayView4<'_, f32>) -> Result<Self::State, NetworkError> {
        (**self).forward(batch)
    }

    fn backward(
        &mut self,
        state: &Self::State,
        target: TargetIndex,
    ) -> Result<Array4<f32>, NetworkError> {
        (**self).backward(state, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::OutcomeCode;
    use e2x_common::BoundingBox;

    #[test]
    fn test_target_index_encoding() {
        let detection = Detection {
            image_id: 0.0,
            label: 15,
            confidence: 0.9,
            outcome: OutcomeCode::TRUE_POSITIVE,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            instance_index: 3,
        };
        let target = TargetIndex::for_detection(&detection, 21);
        assert_eq!(target.encode(), 21 * 3 + 15);
    }

    #[test]
    fn test_target_index_first_instance() {
        let target = TargetIndex {
            label: 4,
            instance: 0,
            num_classes: 21,
        };
        assert_eq!(target.encode(), 4);
    }
}
