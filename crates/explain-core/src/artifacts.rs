//! Persisted explanation results
//!
//! Each explained detection produces two files sharing one stem:
//! - `<stem>.png`: the input image with the detection box next to a saliency overlay
//! - `<stem>.json`: the raw saliency map, per-segment scores and the detection record
//!
//! The PNG marks a finished result. It is written after the JSON dump, and its
//! presence is what makes a rerun skip the detection.

use crate::aggregator::SaliencyMap;
use crate::detection::{Detection, Outcome};
use crate::error::ExplainError;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

/// Directory layout of persisted results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLayout {
    directory: PathBuf,
}

impl ResultLayout {
    /// `<root>/results_<method>/<dataset>/<net>_<segmentation>_<segments>_<samples>`
    #[must_use]
    pub fn new(
        results_root: &Path,
        method: &str,
        dataset: &str,
        net_name: &str,
        segmentation: &str,
        num_segments: usize,
        num_samples: usize,
    ) -> Self {
        let directory = results_root
            .join(format!("results_{method}"))
            .join(dataset)
            .join(format!("{net_name}_{segmentation}_{num_segments}_{num_samples}"));
        Self { directory }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Artifact stem for the detection at `position` in an image's work list
    #[must_use]
    pub fn stem(&self, file_name: &str, position: usize) -> PathBuf {
        self.directory.join(format!("{file_name}_{position}"))
    }
}

/// `<stem>.<extension>`; file stems may themselves contain dots
#[must_use]
pub fn artifact_path(stem: &Path, extension: &str) -> PathBuf {
    let mut path = stem.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

/// Everything needed to persist one explanation
#[derive(Debug, Clone)]
pub struct ExplanationArtifact<'a> {
    pub stem: PathBuf,
    pub file_name: &'a str,
    pub position: usize,
    pub outcome: Outcome,
    pub class_name: &'a str,
    pub detection: &'a Detection,
    pub saliency: &'a SaliencyMap,
    /// Unperturbed input, for display
    pub image: &'a RgbImage,
}

/// Raw numeric dump written next to the PNG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaliencyDump {
    pub file_name: String,
    pub position: usize,
    pub outcome: Outcome,
    pub class_name: String,
    pub detection: Detection,
    pub detection_row: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub segment_scores: Vec<f32>,
    /// Row-major `height x width` saliency values
    pub saliency: Vec<f32>,
}

impl SaliencyDump {
    #[must_use]
    pub fn from_artifact(artifact: &ExplanationArtifact<'_>) -> Self {
        let row = artifact.detection.to_row();
        Self {
            file_name: artifact.file_name.to_string(),
            position: artifact.position,
            outcome: artifact.outcome,
            class_name: artifact.class_name.to_string(),
            detection: artifact.detection.clone(),
            detection_row: row.to_vec(),
            height: artifact.saliency.height(),
            width: artifact.saliency.width(),
            segment_scores: artifact.saliency.segment_scores().to_vec(),
            saliency: artifact.saliency.pixels().iter().copied().collect(),
        }
    }
}

/// Destination for finished explanations
pub trait ArtifactSink {
    /// Whether a finished result exists for `stem`
    fn exists(&self, stem: &Path) -> bool;

    fn persist(&mut self, artifact: &ExplanationArtifact<'_>) -> Result<(), ExplainError>;
}

impl<T: ArtifactSink + ?Sized> ArtifactSink for &mut T {
    fn exists(&self, stem: &Path) -> bool {
        (**self).exists(stem)
    }

    fn persist(&mut self, artifact: &ExplanationArtifact<'_>) -> Result<(), ExplainError> {
        (**self).persist(artifact)
    }
}

/// Writes `<stem>.png` and `<stem>.json`
#[derive(Debug, Clone, Copy, Default)]
pub struct PngJsonWriter;

impl ArtifactSink for PngJsonWriter {
    fn exists(&self, stem: &Path) -> bool {
        artifact_path(stem, "png").exists()
    }

    fn persist(&mut self, artifact: &ExplanationArtifact<'_>) -> Result<(), ExplainError> {
        if let Some(parent) = artifact.stem.parent() {
            fs::create_dir_all(parent)?;
        }

        let json_path = artifact_path(&artifact.stem, "json");
        let dump = SaliencyDump::from_artifact(artifact);
        fs::write(&json_path, serde_json::to_vec(&dump)?)?;

        let png_path = artifact_path(&artifact.stem, "png");
        render_panel(artifact.image, artifact.saliency, artifact.detection).save(&png_path)?;

        debug!("Saved {}", png_path.display());
        Ok(())
    }
}

/// Diverging colour for a saliency value normalized to `[-1, 1]`
fn diverging(value: f32) -> [f32; 3] {
    let v = value.clamp(-1.0, 1.0);
    if v >= 0.0 {
        [255.0, 255.0 * (1.0 - v), 255.0 * (1.0 - v)]
    } else {
        [255.0 * (1.0 + v), 255.0 * (1.0 + v), 255.0]
    }
}

/// Saliency blended over a grayscale copy of `image`
#[must_use]
pub fn render_overlay(image: &RgbImage, saliency: &SaliencyMap) -> RgbImage {
    let (lo, hi) = saliency.score_range();
    let scale = lo.abs().max(hi.abs());
    let pixels = saliency.pixels();

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let gray = 0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2]);
        let value = pixels
            .get((y as usize, x as usize))
            .map_or(0.0, |&v| if scale > 0.0 { v / scale } else { 0.0 });
        let color = diverging(value);
        let alpha = 0.3 + 0.5 * value.abs().min(1.0);
        Rgb(color.map(|c| (gray * (1.0 - alpha) + c * alpha).round().clamp(0.0, 255.0) as u8))
    })
}

fn draw_box(canvas: &mut RgbImage, detection: &Detection, x_offset: u32, width: u32, height: u32) {
    let (x0, y0, x1, y1) = detection.bbox.to_pixels(width, height);
    for t in 0..BOX_THICKNESS {
        let w = (x1.saturating_sub(x0)).saturating_sub(2 * t).max(1);
        let h = (y1.saturating_sub(y0)).saturating_sub(2 * t).max(1);
        let rect = Rect::at((x0 + x_offset + t) as i32, (y0 + t) as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }
}

/// Input with the detection box on the left, saliency overlay on the right
#[must_use]
pub fn render_panel(image: &RgbImage, saliency: &SaliencyMap, detection: &Detection) -> RgbImage {
    let (width, height) = image.dimensions();
    let overlay = render_overlay(image, saliency);

    let mut canvas = RgbImage::new(width * 2, height);
    image::imageops::replace(&mut canvas, image, 0, 0);
    image::imageops::replace(&mut canvas, &overlay, i64::from(width), 0);

    draw_box(&mut canvas, detection, 0, width, height);
    draw_box(&mut canvas, detection, width, width, height);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{OutcomeCode, DETECTION_ROW_WIDTH};
    use crate::evaluator::PerturbationBatchEvaluator;
    use crate::aggregator::SaliencyAggregator;
    use crate::network::{GradientNetwork, NetworkError, TargetIndex};
    use crate::segmentation::SegmentationMap;
    use e2x_common::BoundingBox;
    use ndarray::{array, Array3, Array4, ArrayView4};
    use tempfile::TempDir;

    struct Identity;

    impl GradientNetwork for Identity {
        type State = Array4<f32>;
        fn input_shape(&self) -> (usize, usize, usize) {
            (1, 2, 2)
        }
        fn num_classes(&self) -> usize {
            2
        }
        fn forward(&mut self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>, NetworkError> {
            Ok(batch.mapv(|_| 1.0))
        }
        fn backward(&mut self, state: &Array4<f32>, _: TargetIndex) -> Result<Array4<f32>, NetworkError> {
            Ok(state.clone())
        }
    }

    fn saliency() -> SaliencyMap {
        let image: Array3<f32> = array![[[1.0, -1.0], [2.0, 0.0]]];
        let input = Array4::zeros((1, 1, 2, 2));
        let target = TargetIndex {
            label: 1,
            instance: 0,
            num_classes: 2,
        };
        let responses = PerturbationBatchEvaluator::new(1)
            .unwrap()
            .evaluate(&mut Identity, input.view(), target)
            .unwrap();
        SaliencyAggregator
            .aggregate(&responses, image.view(), &SegmentationMap::new(array![[0, 1], [0, 1]]))
            .unwrap()
    }

    fn detection() -> Detection {
        Detection {
            image_id: 0.0,
            label: 1,
            confidence: 0.8,
            outcome: OutcomeCode::TRUE_POSITIVE,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            instance_index: 0,
        }
    }

    #[test]
    fn test_layout() {
        let layout = ResultLayout::new(Path::new("/tmp/out"), "E2X", "VOC", "VGGNet_300x300", "slic", 200, 32);
        assert_eq!(
            layout.directory(),
            Path::new("/tmp/out/results_E2X/VOC/VGGNet_300x300_slic_200_32")
        );
        assert_eq!(
            layout.stem("000001", 3),
            PathBuf::from("/tmp/out/results_E2X/VOC/VGGNet_300x300_slic_200_32/000001_3")
        );
    }

    #[test]
    fn test_artifact_path_keeps_dotted_stems() {
        assert_eq!(
            artifact_path(Path::new("out/img.v2_0"), "png"),
            PathBuf::from("out/img.v2_0.png")
        );
    }

    #[test]
    fn test_overlay_colours() {
        let map = saliency();
        assert_eq!(map.segment_scores(), &[3.0, -1.0]);

        let image = RgbImage::from_pixel(2, 2, Rgb([128, 128, 128]));
        let overlay = render_overlay(&image, &map);
        let positive = overlay.get_pixel(0, 0);
        let negative = overlay.get_pixel(1, 0);
        assert!(positive[0] > positive[2]);
        assert!(negative[2] > negative[0]);
    }

    #[test]
    fn test_persist_writes_png_and_json() {
        let dir = TempDir::new().unwrap();
        let layout = ResultLayout::new(dir.path(), "E2X", "VOC", "net", "uniform", 4, 2);
        let stem = layout.stem("img", 0);
        let map = saliency();
        let det = detection();
        let image = RgbImage::from_pixel(2, 2, Rgb([50, 100, 150]));

        let mut writer = PngJsonWriter;
        assert!(!writer.exists(&stem));
        writer
            .persist(&ExplanationArtifact {
                stem: stem.clone(),
                file_name: "img",
                position: 0,
                outcome: Outcome::TruePositive,
                class_name: "aeroplane",
                detection: &det,
                saliency: &map,
                image: &image,
            })
            .unwrap();
        assert!(writer.exists(&stem));

        let panel = image::open(artifact_path(&stem, "png")).unwrap();
        assert_eq!((panel.width(), panel.height()), (4, 2));

        let dump: SaliencyDump =
            serde_json::from_slice(&fs::read(artifact_path(&stem, "json")).unwrap()).unwrap();
        assert_eq!(dump.segment_scores, vec![3.0, -1.0]);
        assert_eq!(dump.saliency, vec![3.0, -1.0, 3.0, -1.0]);
        assert_eq!(dump.detection, det);
        assert_eq!(dump.detection_row.len(), DETECTION_ROW_WIDTH);
    }
}
