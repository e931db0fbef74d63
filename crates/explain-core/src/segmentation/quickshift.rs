//! Quickshift mode seeking in the joint `(ratio * Lab, y, x)` space

use super::slic::rgb_to_lab;
use super::{compact_labels, SegmentationMap};
use crate::error::ExplainError;
use ndarray::{Array2, ArrayView3};

pub fn quickshift(
    rgb01: ArrayView3<'_, f32>,
    kernel_size: f32,
    max_dist: f32,
    ratio: f32,
) -> Result<SegmentationMap, ExplainError> {
    if kernel_size <= 0.0 {
        return Err(ExplainError::InvalidConfig(format!(
            "quickshift kernel size must be positive, got {kernel_size}"
        )));
    }

    let (height, width, _) = rgb01.dim();
    let features = rgb_to_lab(rgb01).mapv(|v| v * ratio);
    let window = (3.0 * kernel_size).ceil() as usize;
    let inv_kernel = -0.5 / (kernel_size * kernel_size);

    let sq_dist = |y: usize, x: usize, ny: usize, nx: usize| -> f32 {
        let mut d = 0.0;
        for c in 0..3 {
            let diff = features[[y, x, c]] - features[[ny, nx, c]];
            d += diff * diff;
        }
        let dy = y as f32 - ny as f32;
        let dx = x as f32 - nx as f32;
        d + dy * dy + dx * dx
    };
    let span = |v: usize, len: usize| v.saturating_sub(window)..(v + window + 1).min(len);

    let mut density = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut total = 0.0;
            for ny in span(y, height) {
                for nx in span(x, width) {
                    total += (sq_dist(y, x, ny, nx) * inv_kernel).exp();
                }
            }
            density[[y, x]] = total;
        }
    }

    // ties in density are broken by flat index so parent links never cycle
    let higher = |y: usize, x: usize, ny: usize, nx: usize| {
        let (d, nd) = (density[[y, x]], density[[ny, nx]]);
        nd > d || (nd == d && ny * width + nx > y * width + x)
    };

    let max_sq = max_dist * max_dist;
    let mut parent: Vec<usize> = (0..height * width).collect();
    for y in 0..height {
        for x in 0..width {
            let mut closest = f32::INFINITY;
            for ny in span(y, height) {
                for nx in span(x, width) {
                    if higher(y, x, ny, nx) {
                        let d = sq_dist(y, x, ny, nx);
                        if d < closest {
                            closest = d;
                            parent[y * width + x] = ny * width + nx;
                        }
                    }
                }
            }
            if closest > max_sq {
                parent[y * width + x] = y * width + x;
            }
        }
    }

    let roots = Array2::from_shape_fn((height, width), |(y, x)| {
        let mut node = y * width + x;
        while parent[node] != node {
            node = parent[node];
        }
        node
    });

    Ok(SegmentationMap::new(compact_labels(&roots)))
}
