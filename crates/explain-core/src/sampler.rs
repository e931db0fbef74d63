//! Perturbation-path sampling
//!
//! Every segment gets its own path: a random permutation of `K` magnitudes evenly
//! spaced over `[0, 1]`. Across the `K` samples each segment therefore visits every
//! perturbation level exactly once, independently of the other segments.

use crate::segmentation::SegmentationMap;
use ndarray::{Array2, Array3, Array4, ArrayView1, ArrayView3};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How paths of different segments relate to each other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStrategy {
    /// One independent permutation per segment
    #[default]
    Independent,
    /// A single permutation shared by all segments
    Shared,
}

/// `K` values evenly spaced over `[0, 1]`, endpoints included
#[must_use]
pub fn linear_path(num_samples: usize) -> Vec<f32> {
    match num_samples {
        0 => Vec::new(),
        1 => vec![0.0],
        n => {
            let last = (n - 1) as f64;
            (0..n).map(|i| (i as f64 / last) as f32).collect()
        }
    }
}

/// Per-sample, per-segment perturbation magnitudes (`K x S`)
#[derive(Debug, Clone, PartialEq)]
pub struct PathMagnitudeMatrix {
    magnitudes: Array2<f32>,
}

impl PathMagnitudeMatrix {
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.magnitudes.nrows()
    }

    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.magnitudes.ncols()
    }

    /// Path of one segment across all samples
    #[must_use]
    pub fn column(&self, segment: usize) -> ArrayView1<'_, f32> {
        self.magnitudes.column(segment)
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<f32> {
        &self.magnitudes
    }

    /// Paint every pixel with its segment's magnitude, per sample
    #[must_use]
    pub fn expand(&self, segmentation: &SegmentationMap) -> PerSampleMask {
        let dense = segmentation.dense_index();
        let (height, width) = dense.dim();
        let mask = Array3::from_shape_fn((self.num_samples(), height, width), |(k, h, w)| {
            self.magnitudes[[k, dense[[h, w]]]]
        });
        PerSampleMask { mask }
    }
}

/// Per-pixel magnitudes for every sample (`K x H x W`)
#[derive(Debug, Clone, PartialEq)]
pub struct PerSampleMask {
    mask: Array3<f32>,
}

impl PerSampleMask {
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.mask.shape()[0]
    }

    #[must_use]
    pub fn as_array(&self) -> &Array3<f32> {
        &self.mask
    }

    /// Scale `image` (`C x H x W`) by each sample's mask, giving `K x C x H x W`
    #[must_use]
    pub fn perturb(&self, image: ArrayView3<'_, f32>) -> Array4<f32> {
        let (channels, height, width) = image.dim();
        Array4::from_shape_fn(
            (self.num_samples(), channels, height, width),
            |(k, c, h, w)| image[[c, h, w]] * self.mask[[k, h, w]],
        )
    }
}

/// Draws perturbation paths for a fixed sample count
#[derive(Debug, Clone, Copy)]
pub struct SegmentSampler {
    num_samples: usize,
    strategy: PathStrategy,
}

impl SegmentSampler {
    #[must_use]
    pub fn new(num_samples: usize) -> Self {
        Self {
            num_samples,
            strategy: PathStrategy::default(),
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: PathStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Build the `K x S` magnitude matrix for `num_segments` segments
    pub fn sample<R: Rng + ?Sized>(&self, num_segments: usize, rng: &mut R) -> PathMagnitudeMatrix {
        let base = linear_path(self.num_samples);
        let mut magnitudes = Array2::zeros((self.num_samples, num_segments));

        let shared = match self.strategy {
            PathStrategy::Shared => {
                let mut path = base.clone();
                path.shuffle(rng);
                Some(path)
            }
            PathStrategy::Independent => None,
        };

        for mut column in magnitudes.columns_mut() {
            let path = match &shared {
                Some(path) => path.clone(),
                None => {
                    let mut path = base.clone();
                    path.shuffle(rng);
                    path
                }
            };
            column.assign(&ArrayView1::from(path.as_slice()));
        }

        PathMagnitudeMatrix { magnitudes }
    }
}
