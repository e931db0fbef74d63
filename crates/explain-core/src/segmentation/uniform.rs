//! Rectangular grid segmentation
//!
//! Cell side `p = floor(sqrt(H * W / n))`, `WW = floor(W / p)` cells per band, and
//! pixel `(h, w)` gets id `floor(w / p) + WW * floor(h / p)`.
//!
//! Columns at or beyond `WW * p` compute `floor(w / p) == WW` and therefore alias the
//! first cell of the next band.

use super::SegmentationMap;
use crate::error::ExplainError;
use ndarray::Array2;

/// Cell side and cells per band for an `height x width` image
pub fn uniform_cell_size(
    height: usize,
    width: usize,
    num_segments: usize,
) -> Result<(usize, usize), ExplainError> {
    if num_segments == 0 {
        return Err(ExplainError::InvalidConfig(
            "uniform segmentation needs at least one segment".to_string(),
        ));
    }

    let p = integer_sqrt(height * width / num_segments);
    if p == 0 {
        return Err(ExplainError::InvalidConfig(format!(
            "{num_segments} segments exceed the {height}x{width} image"
        )));
    }

    Ok((p, width / p))
}

pub fn uniform(
    height: usize,
    width: usize,
    num_segments: usize,
) -> Result<SegmentationMap, ExplainError> {
    let (p, ww) = uniform_cell_size(height, width, num_segments)?;
    let labels = Array2::from_shape_fn((height, width), |(h, w)| (w / p + ww * (h / p)) as u32);
    Ok(SegmentationMap::new(labels))
}

/// Largest `r` with `r * r <= n`
fn integer_sqrt(n: usize) -> usize {
    let mut r = (n as f64).sqrt() as usize;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    r
}
