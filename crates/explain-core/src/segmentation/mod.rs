//! Image segmentation into perturbation regions
//!
//! Four methods are supported:
//! - `slic`: k-means superpixels in Lab space
//! - `quickshift`: mode seeking on a joint colour/position density
//! - `felzenszwalb`: graph-based merging of pixel neighbourhoods
//! - `uniform`: a fixed rectangular grid, no randomness and no image content
//!
//! All methods take an RGB image in `[0, 1]`, shaped `H x W x 3`.

mod felzenszwalb;
mod quickshift;
mod slic;
mod uniform;

pub use felzenszwalb::felzenszwalb;
pub use quickshift::quickshift;
pub use slic::slic;
pub use uniform::{uniform, uniform_cell_size};

use crate::error::ExplainError;
use ndarray::{Array2, ArrayView3};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Supported segmentation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMethod {
    Slic,
    Quickshift,
    Felzenszwalb,
    Uniform,
}

impl SegmentationMethod {
    pub const ALL: [SegmentationMethod; 4] = [
        SegmentationMethod::Slic,
        SegmentationMethod::Quickshift,
        SegmentationMethod::Felzenszwalb,
        SegmentationMethod::Uniform,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SegmentationMethod::Slic => "slic",
            SegmentationMethod::Quickshift => "quickshift",
            SegmentationMethod::Felzenszwalb => "felzenszwalb",
            SegmentationMethod::Uniform => "uniform",
        }
    }

    /// Whether repeated runs on the same image always give the same labels
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        matches!(self, SegmentationMethod::Uniform)
    }
}

impl fmt::Display for SegmentationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SegmentationMethod {
    type Err = ExplainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ExplainError::UnknownSegmentationMethod(s.to_string()))
    }
}

/// Per-method tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    /// SLIC colour/space trade-off
    pub slic_compactness: f32,
    /// SLIC k-means iterations
    pub slic_max_iter: usize,
    /// Quickshift density kernel width (pixels)
    pub quickshift_kernel_size: f32,
    /// Quickshift cut-off distance for parent links
    pub quickshift_max_dist: f32,
    /// Quickshift colour weight
    pub quickshift_ratio: f32,
    /// Felzenszwalb merge scale
    pub felzenszwalb_scale: f32,
    /// Felzenszwalb pre-smoothing sigma
    pub felzenszwalb_sigma: f32,
    /// Felzenszwalb minimum component size
    pub felzenszwalb_min_size: usize,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            slic_compactness: 10.0,
            slic_max_iter: 10,
            quickshift_kernel_size: 4.0,
            quickshift_max_dist: 200.0,
            quickshift_ratio: 0.2,
            felzenszwalb_scale: 1.0,
            felzenszwalb_sigma: 0.8,
            felzenszwalb_min_size: 20,
        }
    }
}

/// Segment id per pixel, with distinct ids mapped to dense column indices
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMap {
    labels: Array2<u32>,
    segment_ids: Vec<u32>,
    dense: Array2<usize>,
}

impl SegmentationMap {
    /// Build from raw labels; ids need not be contiguous
    #[must_use]
    pub fn new(labels: Array2<u32>) -> Self {
        let mut segment_ids: Vec<u32> = labels.iter().copied().collect();
        segment_ids.sort_unstable();
        segment_ids.dedup();

        let dense = labels.mapv(|id| segment_ids.partition_point(|&s| s < id));

        Self {
            labels,
            segment_ids,
            dense,
        }
    }

    /// Number of distinct segment ids
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segment_ids.len()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.labels.nrows()
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.labels.ncols()
    }

    /// Raw segment ids as produced by the segmenter
    #[must_use]
    pub fn labels(&self) -> &Array2<u32> {
        &self.labels
    }

    /// Distinct ids in ascending order; position is the dense index
    #[must_use]
    pub fn segment_ids(&self) -> &[u32] {
        &self.segment_ids
    }

    /// Dense segment index (0..S) per pixel
    #[must_use]
    pub fn dense_index(&self) -> &Array2<usize> {
        &self.dense
    }

    /// Pixel count per dense segment index
    #[must_use]
    pub fn segment_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_segments()];
        for &s in &self.dense {
            sizes[s] += 1;
        }
        sizes
    }
}

/// Produces a segmentation for one image
pub trait Segmenter {
    fn segment(&self, rgb01: ArrayView3<'_, f32>) -> Result<SegmentationMap, ExplainError>;
}

/// Segmenter dispatching on [`SegmentationMethod`]
#[derive(Debug, Clone)]
pub struct MethodSegmenter {
    pub method: SegmentationMethod,
    pub num_segments: usize,
    pub params: SegmentationParams,
}

impl MethodSegmenter {
    #[must_use]
    pub fn new(method: SegmentationMethod, num_segments: usize, params: SegmentationParams) -> Self {
        Self {
            method,
            num_segments,
            params,
        }
    }
}

impl Segmenter for MethodSegmenter {
    fn segment(&self, rgb01: ArrayView3<'_, f32>) -> Result<SegmentationMap, ExplainError> {
        let shape = rgb01.shape();
        if shape[2] != 3 {
            return Err(ExplainError::ShapeMismatch {
                what: "segmentation input",
                expected: vec![shape[0], shape[1], 3],
                actual: shape.to_vec(),
            });
        }

        let p = &self.params;
        let map = match self.method {
            SegmentationMethod::Slic => {
                slic(rgb01, self.num_segments, p.slic_compactness, p.slic_max_iter)?
            }
            SegmentationMethod::Quickshift => quickshift(
                rgb01,
                p.quickshift_kernel_size,
                p.quickshift_max_dist,
                p.quickshift_ratio,
            )?,
            SegmentationMethod::Felzenszwalb => felzenszwalb(
                rgb01,
                p.felzenszwalb_scale,
                p.felzenszwalb_sigma,
                p.felzenszwalb_min_size,
            )?,
            SegmentationMethod::Uniform => uniform(shape[0], shape[1], self.num_segments)?,
        };

        debug!(
            "{} segmentation produced {} segments",
            self.method,
            map.num_segments()
        );
        Ok(map)
    }
}

/// Relabel 4-connected components of `labels`, folding components smaller than
/// `min_size` into the previously labelled neighbour they touch first
pub(crate) fn enforce_connectivity(labels: &Array2<usize>, min_size: usize) -> Array2<u32> {
    let (height, width) = labels.dim();
    let mut out = Array2::from_elem((height, width), u32::MAX);
    let mut next_label = 0u32;
    let mut queue = VecDeque::new();
    let mut component = Vec::new();

    for y in 0..height {
        for x in 0..width {
            if out[[y, x]] != u32::MAX {
                continue;
            }

            // neighbour label assigned earlier in raster order
            let adjacent = [(y, x.wrapping_sub(1)), (y.wrapping_sub(1), x)]
                .into_iter()
                .filter(|&(ny, nx)| ny < height && nx < width)
                .map(|(ny, nx)| out[[ny, nx]])
                .find(|&l| l != u32::MAX);

            let source = labels[[y, x]];
            component.clear();
            queue.push_back((y, x));
            out[[y, x]] = next_label;

            while let Some((cy, cx)) = queue.pop_front() {
                component.push((cy, cx));
                let neighbours = [
                    (cy.wrapping_sub(1), cx),
                    (cy + 1, cx),
                    (cy, cx.wrapping_sub(1)),
                    (cy, cx + 1),
                ];
                for (ny, nx) in neighbours {
                    if ny < height && nx < width && out[[ny, nx]] == u32::MAX && labels[[ny, nx]] == source
                    {
                        out[[ny, nx]] = next_label;
                        queue.push_back((ny, nx));
                    }
                }
            }

            match adjacent {
                Some(merge_into) if component.len() < min_size => {
                    for &(cy, cx) in &component {
                        out[[cy, cx]] = merge_into;
                    }
                }
                _ => next_label += 1,
            }
        }
    }

    out
}

/// Map arbitrary usize labels to `0..n` in order of first appearance
pub(crate) fn compact_labels(labels: &Array2<usize>) -> Array2<u32> {
    let mut mapping = std::collections::HashMap::new();
    let mut out = Array2::zeros(labels.dim());
    for ((y, x), &l) in labels.indexed_iter() {
        let next = mapping.len() as u32;
        out[[y, x]] = *mapping.entry(l).or_insert(next);
    }
    out
}
