//! Debug mode - segment one image and show the regions that would be perturbed

use anyhow::{Context as _, Result};
use clap::Args;
use e2x_core::dataset::{blob_to_rgb01, image_to_blob, DEFAULT_BGR_MEAN};
use e2x_core::{MethodSegmenter, SegmentationMap, SegmentationParams, Segmenter};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Args, Debug)]
pub struct SegmentCommand {
    /// Input image
    #[arg(value_name = "IMAGE")]
    input: PathBuf,

    /// Segmentation method: slic, quickshift, felzenszwalb or uniform
    #[arg(long, default_value = "slic")]
    segmentation: String,

    /// Number of segments (M)
    #[arg(long, default_value = "200")]
    num_segments: usize,

    /// Resize to a square network input first
    #[arg(long)]
    size: Option<u32>,

    /// Write the image painted with per-segment mean colours
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl SegmentCommand {
    pub fn execute(self) -> Result<()> {
        let method = self.segmentation.parse().context("Invalid segmentation method")?;

        let mut image = image::open(&self.input)
            .with_context(|| format!("Failed to open {}", self.input.display()))?
            .to_rgb8();
        if let Some(size) = self.size {
            image = image::imageops::resize(&image, size, size, FilterType::Triangle);
        }
        let rgb01 = blob_to_rgb01(image_to_blob(&image, DEFAULT_BGR_MEAN).view(), DEFAULT_BGR_MEAN);

        let start = Instant::now();
        let segmenter = MethodSegmenter::new(method, self.num_segments, SegmentationParams::default());
        let map = segmenter.segment(rgb01.view())?;

        let sizes = map.segment_sizes();
        info!(
            "{}: {} segments in {:.3}s (smallest {} px, largest {} px)",
            method,
            map.num_segments(),
            start.elapsed().as_secs_f64(),
            sizes.iter().min().copied().unwrap_or(0),
            sizes.iter().max().copied().unwrap_or(0)
        );

        if let Some(output) = &self.output {
            paint_mean_colours(&image, &map)
                .save(output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Saved {}", output.display());
        }
        Ok(())
    }
}

fn paint_mean_colours(image: &RgbImage, map: &SegmentationMap) -> RgbImage {
    let dense = map.dense_index();
    let mut sums = vec![[0u64; 3]; map.num_segments()];
    let mut counts = vec![0u64; map.num_segments()];
    for (x, y, pixel) in image.enumerate_pixels() {
        let segment = dense[[y as usize, x as usize]];
        for c in 0..3 {
            sums[segment][c] += u64::from(pixel[c]);
        }
        counts[segment] += 1;
    }

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let segment = dense[[y as usize, x as usize]];
        let n = counts[segment].max(1);
        Rgb(sums[segment].map(|s| (s / n) as u8))
    })
}
