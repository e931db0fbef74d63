//! Batched forward/backward evaluation of perturbed inputs
//!
//! Samples are packed into batches of a fixed size. The network always sees full
//! batches: the trailing batch of `K mod B` samples is zero-padded and the gradients
//! of the padding rows are discarded. Responses are written back at their sample
//! position, so the output never depends on the batch size.

use crate::error::ExplainError;
use crate::network::{GradientNetwork, TargetIndex};
use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis};
use std::ops::Range;
use std::time::Instant;
use tracing::debug;

/// Backward responses for every sample (`K x C x H x W`)
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBuffer {
    responses: Array4<f32>,
}

impl ResponseBuffer {
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.responses.shape()[0]
    }

    #[must_use]
    pub fn sample(&self, index: usize) -> ArrayView3<'_, f32> {
        self.responses.index_axis(Axis(0), index)
    }

    #[must_use]
    pub fn as_array(&self) -> &Array4<f32> {
        &self.responses
    }

    /// Sum of responses across samples (`C x H x W`)
    #[must_use]
    pub fn sum_over_samples(&self) -> Array3<f32> {
        self.responses.sum_axis(Axis(0))
    }
}

/// Split `0..num_samples` into consecutive batches of at most `batch_size`
#[must_use]
pub fn batch_ranges(num_samples: usize, batch_size: usize) -> Vec<Range<usize>> {
    (0..num_samples)
        .step_by(batch_size.max(1))
        .map(|start| start..(start + batch_size).min(num_samples))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct PerturbationBatchEvaluator {
    batch_size: usize,
}

impl PerturbationBatchEvaluator {
    pub fn new(batch_size: usize) -> Result<Self, ExplainError> {
        if batch_size == 0 {
            return Err(ExplainError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Evaluate all perturbed samples (`K x C x H x W`) against one target
    ///
    /// Network failures propagate without retry; nothing is returned for a
    /// partially evaluated detection.
    pub fn evaluate<N: GradientNetwork + ?Sized>(
        &self,
        network: &mut N,
        perturbed: ArrayView4<'_, f32>,
        target: TargetIndex,
    ) -> Result<ResponseBuffer, ExplainError> {
        let start = Instant::now();
        let (num_samples, channels, height, width) = perturbed.dim();
        let batch_shape = (self.batch_size, channels, height, width);

        let mut responses = Array4::zeros((num_samples, channels, height, width));
        let mut batch = Array4::<f32>::zeros(batch_shape);

        let ranges = batch_ranges(num_samples, self.batch_size);
        for range in &ranges {
            let filled = range.len();
            batch
                .slice_mut(s![..filled, .., .., ..])
                .assign(&perturbed.slice(s![range.clone(), .., .., ..]));
            if filled < self.batch_size {
                batch.slice_mut(s![filled.., .., .., ..]).fill(0.0);
            }

            let state = network.forward(batch.view())?;
            let gradients = network.backward(&state, target)?;
            if gradients.dim() != batch_shape {
                return Err(ExplainError::ShapeMismatch {
                    what: "backward output",
                    expected: vec![self.batch_size, channels, height, width],
                    actual: gradients.shape().to_vec(),
                });
            }

            responses
                .slice_mut(s![range.clone(), .., .., ..])
                .assign(&gradients.slice(s![..filled, .., .., ..]));
        }

        debug!(
            "Evaluated {} samples in {} batches of {} ({:.3}s)",
            num_samples,
            ranges.len(),
            self.batch_size,
            start.elapsed().as_secs_f64()
        );

        Ok(ResponseBuffer { responses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkError;
    use ndarray::Array4;

    /// Gradient of each row equals the row itself, scaled by the target index
    struct EchoNetwork {
        forward_calls: usize,
        batch_sizes: Vec<usize>,
        fail_on_call: Option<usize>,
    }

    impl EchoNetwork {
        fn new() -> Self {
            Self {
                forward_calls: 0,
                batch_sizes: Vec::new(),
                fail_on_call: None,
            }
        }
    }

    impl GradientNetwork for EchoNetwork {
        type State = Array4<f32>;

        fn input_shape(&self) -> (usize, usize, usize) {
            (2, 3, 3)
        }

        fn num_classes(&self) -> usize {
            21
        }

        fn forward(&mut self, batch: ArrayView4<'_, f32>) -> Result<Self::State, NetworkError> {
            self.forward_calls += 1;
            self.batch_sizes.push(batch.shape()[0]);
            if self.fail_on_call == Some(self.forward_calls) {
                return Err(NetworkError::OutOfMemory);
            }
            Ok(batch.to_owned())
        }

        fn backward(
            &mut self,
            state: &Self::State,
            target: TargetIndex,
        ) -> Result<Array4<f32>, NetworkError> {
            Ok(state.mapv(|v| v * target.encode() as f32))
        }
    }

    fn samples(k: usize) -> Array4<f32> {
        Array4::from_shape_fn((k, 2, 3, 3), |(s, c, h, w)| (s * 100 + c * 10 + h * 3 + w) as f32)
    }

    fn target() -> TargetIndex {
        TargetIndex {
            label: 2,
            instance: 0,
            num_classes: 21,
        }
    }

    #[test]
    fn test_batch_ranges() {
        assert_eq!(batch_ranges(32, 16), vec![0..16, 16..32]);
        assert_eq!(batch_ranges(32, 10), vec![0..10, 10..20, 20..30, 30..32]);
        assert_eq!(batch_ranges(5, 16), vec![0..5]);
        assert!(batch_ranges(0, 4).is_empty());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(
            PerturbationBatchEvaluator::new(0),
            Err(ExplainError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_partial_batch_alignment() {
        let input = samples(32);
        let mut network = EchoNetwork::new();
        let responses = PerturbationBatchEvaluator::new(10)
            .unwrap()
            .evaluate(&mut network, input.view(), target())
            .unwrap();

        assert_eq!(network.forward_calls, 4);
        assert_eq!(network.batch_sizes, vec![10, 10, 10, 10]);
        assert_eq!(responses.num_samples(), 32);
        for s in 0..32 {
            assert_eq!(
                responses.sample(s),
                input.index_axis(Axis(0), s).mapv(|v| v * 2.0)
            );
        }
    }

    #[test]
    fn test_batch_size_is_not_observable() {
        let input = samples(32);
        let evaluate = |batch_size| {
            PerturbationBatchEvaluator::new(batch_size)
                .unwrap()
                .evaluate(&mut EchoNetwork::new(), input.view(), target())
                .unwrap()
        };
        let reference = evaluate(16);
        assert_eq!(evaluate(10), reference);
        assert_eq!(evaluate(7), reference);
        assert_eq!(evaluate(64), reference);
    }

    #[test]
    fn test_fewer_samples_than_batch() {
        let input = samples(3);
        let mut network = EchoNetwork::new();
        let responses = PerturbationBatchEvaluator::new(8)
            .unwrap()
            .evaluate(&mut network, input.view(), target())
            .unwrap();
        assert_eq!(network.forward_calls, 1);
        assert_eq!(responses.num_samples(), 3);
        assert_eq!(responses.sample(2)[[1, 2, 2]], (200 + 10 + 8) as f32 * 2.0);
    }

    #[test]
    fn test_failure_propagates_without_retry() {
        let input = samples(32);
        let mut network = EchoNetwork::new();
        network.fail_on_call = Some(2);
        let result = PerturbationBatchEvaluator::new(16)
            .unwrap()
            .evaluate(&mut network, input.view(), target());

        assert!(matches!(
            result,
            Err(ExplainError::Network(NetworkError::OutOfMemory))
        ));
        assert_eq!(network.forward_calls, 2);
    }

    #[test]
    fn test_wrong_gradient_shape_rejected() {
        struct Truncating;
        impl GradientNetwork for Truncating {
            type State = ();
            fn input_shape(&self) -> (usize, usize, usize) {
                (2, 3, 3)
            }
            fn num_classes(&self) -> usize {
                21
            }
            fn forward(&mut self, _: ArrayView4<'_, f32>) -> Result<(), NetworkError> {
                Ok(())
            }
            fn backward(&mut self, _: &(), _: TargetIndex) -> Result<Array4<f32>, NetworkError> {
                Ok(Array4::zeros((1, 2, 3, 3)))
            }
        }

        let input = samples(4);
        let result = PerturbationBatchEvaluator::new(4)
            .unwrap()
            .evaluate(&mut Truncating, input.view(), target());
        assert!(matches!(result, Err(ExplainError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_sum_over_samples() {
        let input = samples(4);
        let responses = PerturbationBatchEvaluator::new(3)
            .unwrap()
            .evaluate(&mut EchoNetwork::new(), input.view(), target())
            .unwrap();
        let summed = responses.sum_over_samples();
        assert_eq!(summed.shape(), &[2, 3, 3]);
        // samples 0..4 at (0, 0, 0): (0 + 100 + 200 + 300) * 2
        assert_eq!(summed[[0, 0, 0]], 1200.0);
    }
}
