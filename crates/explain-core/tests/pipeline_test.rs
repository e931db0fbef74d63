//! End-to-end runs over an on-disk dataset with stub networks

use e2x_core::detection::{Detection, GroundTruthBox, OutcomeCode};
use e2x_core::network::{DetectionEvaluator, GradientNetwork, NetworkError, TargetIndex};
use e2x_core::{
    DatasetKind, DirectoryDataset, ExplanationConfig, ExplanationDriver, PngJsonWriter,
    SaliencyDump,
};
use e2x_common::BoundingBox;
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayView3, ArrayView4};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SIZE: u32 = 16;

/// Reports one TP per ground-truth box plus one confident FP
struct GroundTruthEcho;

impl DetectionEvaluator for GroundTruthEcho {
    fn evaluate(
        &mut self,
        _: ArrayView3<'_, f32>,
        ground_truth: &[GroundTruthBox],
    ) -> Result<Vec<Detection>, NetworkError> {
        let mut detections: Vec<Detection> = ground_truth
            .iter()
            .enumerate()
            .map(|(i, gt)| Detection {
                image_id: 0.0,
                label: gt.label,
                confidence: 0.9,
                outcome: OutcomeCode::TRUE_POSITIVE,
                bbox: gt.bbox,
                instance_index: i,
            })
            .collect();
        detections.push(Detection {
            image_id: 0.0,
            label: 12,
            confidence: 0.75,
            outcome: OutcomeCode::FALSE_POSITIVE,
            bbox: BoundingBox::new(0.5, 0.5, 1.0, 1.0),
            instance_index: ground_truth.len(),
        });
        Ok(detections)
    }
}

/// Gradient is 1 in the top half of the image, 0 below
#[derive(Default)]
struct TopHalf {
    forward_calls: usize,
}

impl GradientNetwork for TopHalf {
    type State = usize;

    fn input_shape(&self) -> (usize, usize, usize) {
        (3, SIZE as usize, SIZE as usize)
    }

    fn num_classes(&self) -> usize {
        21
    }

    fn forward(&mut self, batch: ArrayView4<'_, f32>) -> Result<usize, NetworkError> {
        self.forward_calls += 1;
        Ok(batch.shape()[0])
    }

    fn backward(&mut self, rows: &usize, _: TargetIndex) -> Result<Array4<f32>, NetworkError> {
        let half = SIZE as usize / 2;
        Ok(Array4::from_shape_fn(
            (*rows, 3, SIZE as usize, SIZE as usize),
            |(_, _, y, _)| if y < half { 1.0 } else { 0.0 },
        ))
    }
}

fn write_dataset(root: &Path) {
    fs::create_dir_all(root.join("images")).unwrap();
    fs::create_dir_all(root.join("annotations")).unwrap();

    for (name, color) in [("cat", Rgb([200, 120, 40])), ("dog", Rgb([30, 60, 90]))] {
        RgbImage::from_pixel(SIZE, SIZE, color)
            .save(root.join("images").join(format!("{name}.png")))
            .unwrap();
    }

    let boxes = vec![GroundTruthBox {
        label: 8,
        bbox: BoundingBox::new(0.1, 0.1, 0.5, 0.5),
        difficult: false,
    }];
    fs::write(
        root.join("annotations/cat.json"),
        serde_json::to_string(&boxes).unwrap(),
    )
    .unwrap();
}

fn config(results: &Path) -> ExplanationConfig {
    ExplanationConfig {
        segmentation: "uniform".to_string(),
        num_segments: 4,
        num_samples: 6,
        batch_size: 4,
        seed: Some(3),
        results_root: results.to_path_buf(),
        ..Default::default()
    }
}

fn open(root: &Path) -> DirectoryDataset {
    DirectoryDataset::open(root, DatasetKind::voc(), SIZE, SIZE).unwrap()
}

#[test]
fn test_run_writes_artifacts() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_dataset(data.path());

    let config = config(results.path());
    let mut network = TopHalf::default();
    let summary = ExplanationDriver::new(&config, GroundTruthEcho, &mut network, PngJsonWriter)
        .unwrap()
        .run(&mut open(data.path()));

    // cat: TP + FP, dog: FP only
    assert_eq!(summary.images, 2);
    assert_eq!(summary.explained, 3);
    assert_eq!(summary.failed, 0);
    // 6 samples in batches of 4 -> 2 forward passes per detection
    assert_eq!(network.forward_calls, 6);

    let directory = results
        .path()
        .join("results_E2X/VOC/VGGNet_300x300_uniform_4_6");
    for stem in ["cat_0", "cat_1", "dog_0"] {
        assert!(directory.join(format!("{stem}.png")).exists(), "{stem}.png missing");
        assert!(directory.join(format!("{stem}.json")).exists(), "{stem}.json missing");
    }

    let dump: SaliencyDump =
        serde_json::from_slice(&fs::read(directory.join("cat_0.json")).unwrap()).unwrap();
    assert_eq!(dump.class_name, "cat");
    assert_eq!((dump.height, dump.width), (SIZE as usize, SIZE as usize));
    // 16x16 in 4 uniform cells: the two top cells carry all of the attribution
    assert_eq!(dump.segment_scores.len(), 4);
    assert!(dump.segment_scores[0] != 0.0);
    assert!(dump.segment_scores[1] != 0.0);
    assert_eq!(dump.segment_scores[2], 0.0);
    assert_eq!(dump.segment_scores[3], 0.0);
}

#[test]
fn test_second_run_is_idempotent() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_dataset(data.path());
    let config = config(results.path());

    ExplanationDriver::new(&config, GroundTruthEcho, TopHalf::default(), PngJsonWriter)
        .unwrap()
        .run(&mut open(data.path()));

    let png = results
        .path()
        .join("results_E2X/VOC/VGGNet_300x300_uniform_4_6/cat_0.png");
    let first_write = fs::metadata(&png).unwrap().modified().unwrap();

    let mut network = TopHalf::default();
    let summary = ExplanationDriver::new(&config, GroundTruthEcho, &mut network, PngJsonWriter)
        .unwrap()
        .run(&mut open(data.path()));

    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.explained, 0);
    assert_eq!(network.forward_calls, 0);
    assert_eq!(fs::metadata(&png).unwrap().modified().unwrap(), first_write);
}

#[test]
fn test_unreadable_image_is_skipped() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_dataset(data.path());
    fs::write(data.path().join("images/broken.png"), b"not a png").unwrap();

    let summary = ExplanationDriver::new(
        &config(results.path()),
        GroundTruthEcho,
        TopHalf::default(),
        PngJsonWriter,
    )
    .unwrap()
    .run(&mut open(data.path()));

    assert_eq!(summary.images, 3);
    assert_eq!(summary.failed_images, 1);
    assert_eq!(summary.explained, 3);
}
