//! SLIC superpixels: localized k-means over `(L, a, b, y, x)`

use super::{enforce_connectivity, SegmentationMap};
use crate::error::ExplainError;
use ndarray::{Array2, Array3, ArrayView3};
use palette::{FromColor, Lab, Srgb};

#[derive(Debug, Clone, Copy, Default)]
struct Center {
    l: f32,
    a: f32,
    b: f32,
    y: f32,
    x: f32,
}

/// Convert an RGB `[0, 1]` image to CIE Lab
pub(crate) fn rgb_to_lab(rgb01: ArrayView3<'_, f32>) -> Array3<f32> {
    let (height, width, _) = rgb01.dim();
    let mut lab = Array3::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            let srgb = Srgb::new(rgb01[[y, x, 0]], rgb01[[y, x, 1]], rgb01[[y, x, 2]]);
            let color: Lab = Lab::from_color(srgb.into_linear());
            lab[[y, x, 0]] = color.l;
            lab[[y, x, 1]] = color.a;
            lab[[y, x, 2]] = color.b;
        }
    }
    lab
}

pub fn slic(
    rgb01: ArrayView3<'_, f32>,
    num_segments: usize,
    compactness: f32,
    max_iter: usize,
) -> Result<SegmentationMap, ExplainError> {
    if num_segments == 0 {
        return Err(ExplainError::InvalidConfig(
            "slic needs at least one segment".to_string(),
        ));
    }

    let (height, width, _) = rgb01.dim();
    if height == 0 || width == 0 {
        return Ok(SegmentationMap::new(Array2::zeros((height, width))));
    }

    let lab = rgb_to_lab(rgb01);
    let step = ((height * width) as f32 / num_segments as f32).sqrt().max(1.0);
    let spatial_weight = (compactness / step).powi(2);

    let mut centers = Vec::new();
    let mut cy = step / 2.0;
    while cy < height as f32 {
        let mut cx = step / 2.0;
        while cx < width as f32 {
            let (y, x) = (cy as usize, cx as usize);
            centers.push(Center {
                l: lab[[y, x, 0]],
                a: lab[[y, x, 1]],
                b: lab[[y, x, 2]],
                y: cy,
                x: cx,
            });
            cx += step;
        }
        cy += step;
    }

    let mut assignment = Array2::from_elem((height, width), usize::MAX);
    let mut distance = Array2::from_elem((height, width), f32::INFINITY);
    let window = step.ceil() as isize;

    for _ in 0..max_iter.max(1) {
        distance.fill(f32::INFINITY);

        for (k, c) in centers.iter().enumerate() {
            let y0 = (c.y as isize - window).max(0) as usize;
            let y1 = ((c.y as isize + window) as usize).min(height - 1);
            let x0 = (c.x as isize - window).max(0) as usize;
            let x1 = ((c.x as isize + window) as usize).min(width - 1);

            for y in y0..=y1 {
                for x in x0..=x1 {
                    let dl = lab[[y, x, 0]] - c.l;
                    let da = lab[[y, x, 1]] - c.a;
                    let db = lab[[y, x, 2]] - c.b;
                    let dy = y as f32 - c.y;
                    let dx = x as f32 - c.x;
                    let d = dl * dl + da * da + db * db + spatial_weight * (dy * dy + dx * dx);
                    if d < distance[[y, x]] {
                        distance[[y, x]] = d;
                        assignment[[y, x]] = k;
                    }
                }
            }
        }

        // pixels outside every window join the spatially nearest center
        for ((y, x), k) in assignment.indexed_iter_mut() {
            if distance[[y, x]].is_infinite() {
                *k = nearest_center(&centers, y as f32, x as f32);
            }
        }

        let mut sums = vec![Center::default(); centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for ((y, x), &k) in assignment.indexed_iter() {
            let s = &mut sums[k];
            s.l += lab[[y, x, 0]];
            s.a += lab[[y, x, 1]];
            s.b += lab[[y, x, 2]];
            s.y += y as f32;
            s.x += x as f32;
            counts[k] += 1;
        }
        for ((center, sum), &n) in centers.iter_mut().zip(&sums).zip(&counts) {
            if n > 0 {
                let n = n as f32;
                *center = Center {
                    l: sum.l / n,
                    a: sum.a / n,
                    b: sum.b / n,
                    y: sum.y / n,
                    x: sum.x / n,
                };
            }
        }
    }

    let min_size = ((step * step) / 4.0) as usize;
    Ok(SegmentationMap::new(enforce_connectivity(&assignment, min_size)))
}

fn nearest_center(centers: &[Center], y: f32, x: f32) -> usize {
    centers
        .iter()
        .enumerate()
        .map(|(k, c)| (k, (c.y - y).powi(2) + (c.x - x).powi(2)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(k, _)| k)
}
