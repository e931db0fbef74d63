//! Reduction of per-sample responses to a per-segment saliency map

use crate::error::ExplainError;
use crate::evaluator::ResponseBuffer;
use crate::segmentation::SegmentationMap;
use ndarray::{Array2, ArrayView3, Axis};

/// Saliency for one detection, constant over each segment
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    /// `H x W`, every pixel carries its segment's score
    pixels: Array2<f32>,
    /// Score per dense segment index
    segment_scores: Vec<f32>,
}

impl SaliencyMap {
    #[must_use]
    pub fn pixels(&self) -> &Array2<f32> {
        &self.pixels
    }

    #[must_use]
    pub fn segment_scores(&self) -> &[f32] {
        &self.segment_scores
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    /// Smallest and largest segment score, `(0, 0)` for an empty map
    #[must_use]
    pub fn score_range(&self) -> (f32, f32) {
        self.segment_scores
            .iter()
            .fold(None, |range: Option<(f32, f32)>, &s| match range {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            })
            .unwrap_or((0.0, 0.0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SaliencyAggregator;

impl SaliencyAggregator {
    /// Gradient x input summed over samples and channels, then summed per segment
    ///
    /// `image` is the unperturbed network input, `C x H x W`.
    pub fn aggregate(
        &self,
        responses: &ResponseBuffer,
        image: ArrayView3<'_, f32>,
        segmentation: &SegmentationMap,
    ) -> Result<SaliencyMap, ExplainError> {
        let summed = responses.sum_over_samples();
        if summed.dim() != image.dim() {
            return Err(ExplainError::ShapeMismatch {
                what: "responses",
                expected: image.shape().to_vec(),
                actual: summed.shape().to_vec(),
            });
        }

        let dense = segmentation.dense_index();
        let (_, height, width) = image.dim();
        if dense.dim() != (height, width) {
            return Err(ExplainError::ShapeMismatch {
                what: "segmentation",
                expected: vec![height, width],
                actual: dense.shape().to_vec(),
            });
        }

        let attribution = (summed * &image).sum_axis(Axis(0));

        let mut segment_scores = vec![0.0f32; segmentation.num_segments()];
        for (&segment, &value) in dense.iter().zip(attribution.iter()) {
            segment_scores[segment] += value;
        }

        let pixels = dense.mapv(|segment| segment_scores[segment]);

        Ok(SaliencyMap {
            pixels,
            segment_scores,
        })
    }
}
