//! Felzenszwalb-Huttenlocher graph segmentation on an 8-connected pixel grid

use super::{compact_labels, SegmentationMap};
use crate::error::ExplainError;
use image::{ImageBuffer, Rgb};
use ndarray::{Array2, ArrayView3};

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Join two roots, returning the new root
    fn union(&mut self, a: usize, b: usize) -> usize {
        let (root, child) = if self.rank[a] < self.rank[b] {
            (b, a)
        } else {
            (a, b)
        };
        self.parent[child] = root;
        self.size[root] += self.size[child];
        if self.rank[a] == self.rank[b] {
            self.rank[root] += 1;
        }
        root
    }
}

/// Segment an RGB `[0, 1]` image
///
/// `scale` is expressed on the 0-255 intensity range; larger values give larger
/// segments.
pub fn felzenszwalb(
    rgb01: ArrayView3<'_, f32>,
    scale: f32,
    sigma: f32,
    min_size: usize,
) -> Result<SegmentationMap, ExplainError> {
    if scale <= 0.0 {
        return Err(ExplainError::InvalidConfig(format!(
            "felzenszwalb scale must be positive, got {scale}"
        )));
    }

    let (height, width, _) = rgb01.dim();
    let smoothed = smooth(rgb01, sigma);
    let k = scale / 255.0;

    let pixel = |y: usize, x: usize| -> [f32; 3] {
        let p = smoothed.get_pixel(x as u32, y as u32);
        [p[0], p[1], p[2]]
    };
    let dissimilarity = |a: [f32; 3], b: [f32; 3]| -> f32 {
        a.iter()
            .zip(&b)
            .map(|(u, v)| (u - v) * (u - v))
            .sum::<f32>()
            .sqrt()
    };

    let mut edges = Vec::with_capacity(height * width * 4);
    for y in 0..height {
        for x in 0..width {
            let here = pixel(y, x);
            let index = y * width + x;
            let mut push = |ny: usize, nx: usize| {
                edges.push((dissimilarity(here, pixel(ny, nx)), index, ny * width + nx));
            };
            if x + 1 < width {
                push(y, x + 1);
            }
            if y + 1 < height {
                push(y + 1, x);
                if x + 1 < width {
                    push(y + 1, x + 1);
                }
                if x > 0 {
                    push(y + 1, x - 1);
                }
            }
        }
    }
    edges.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut forest = DisjointSet::new(height * width);
    let mut threshold = vec![k; height * width];

    for &(weight, a, b) in &edges {
        let (ra, rb) = (forest.find(a), forest.find(b));
        if ra != rb && weight <= threshold[ra] && weight <= threshold[rb] {
            let root = forest.union(ra, rb);
            threshold[root] = weight + k / forest.size[root] as f32;
        }
    }

    for &(_, a, b) in &edges {
        let (ra, rb) = (forest.find(a), forest.find(b));
        if ra != rb && (forest.size[ra] < min_size || forest.size[rb] < min_size) {
            forest.union(ra, rb);
        }
    }

    let roots = Array2::from_shape_fn((height, width), |(y, x)| forest.find(y * width + x));
    Ok(SegmentationMap::new(compact_labels(&roots)))
}

fn smooth(rgb01: ArrayView3<'_, f32>, sigma: f32) -> ImageBuffer<Rgb<f32>, Vec<f32>> {
    let (height, width, _) = rgb01.dim();
    let image = ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (y, x) = (y as usize, x as usize);
        Rgb([rgb01[[y, x, 0]], rgb01[[y, x, 1]], rgb01[[y, x, 2]]])
    });
    if sigma > 0.0 {
        imageproc::filter::gaussian_blur_f32(&image, sigma)
    } else {
        image
    }
}
