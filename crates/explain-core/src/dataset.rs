//! Image datasets and conversion between images and network blobs
//!
//! Network blobs are mean-subtracted BGR in `C x H x W` layout. Segmentation and
//! visualization work on RGB images in `[0, 1]`, `H x W x 3`.

use crate::detection::GroundTruthBox;
use crate::error::ExplainError;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array3, ArrayView3};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Pascal VOC class names, background first
pub const VOC_CLASSES: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// Per-channel BGR mean subtracted from network inputs
pub const DEFAULT_BGR_MEAN: [f32; 3] = [104.0, 117.0, 123.0];

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Class names and input normalization of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetKind {
    tag: String,
    class_names: Vec<String>,
    mean: [f32; 3],
}

impl DatasetKind {
    #[must_use]
    pub fn voc() -> Self {
        Self {
            tag: "VOC".to_string(),
            class_names: VOC_CLASSES.iter().map(|s| (*s).to_string()).collect(),
            mean: DEFAULT_BGR_MEAN,
        }
    }

    /// Custom dataset with explicit class names (background first)
    #[must_use]
    pub fn custom(tag: impl Into<String>, class_names: Vec<String>, mean: [f32; 3]) -> Self {
        Self {
            tag: tag.into(),
            class_names,
            mean,
        }
    }

    /// Resolve a dataset tag; anything other than `VOC` reads `labels.txt` from `folder`
    pub fn from_tag(tag: &str, folder: &Path) -> Result<Self, ExplainError> {
        if tag.eq_ignore_ascii_case("voc") {
            return Ok(Self::voc());
        }

        let labels_path = folder.join("labels.txt");
        let contents = fs::read_to_string(&labels_path).map_err(|e| {
            ExplainError::Dataset(format!(
                "dataset {tag} needs class names in {}: {e}",
                labels_path.display()
            ))
        })?;
        let class_names: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if class_names.is_empty() {
            return Err(ExplainError::Dataset(format!(
                "{} lists no classes",
                labels_path.display()
            )));
        }

        Ok(Self::custom(tag, class_names, DEFAULT_BGR_MEAN))
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Class count including background
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.class_names.len()
    }

    #[must_use]
    pub fn class_name(&self, label: u32) -> &str {
        self.class_names
            .get(label as usize)
            .map_or("unknown", String::as_str)
    }

    #[must_use]
    pub fn mean(&self) -> [f32; 3] {
        self.mean
    }
}

/// One image prepared for the networks
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub file_name: String,
    /// Network input blob, `C x H x W`
    pub blob: Array3<f32>,
    pub ground_truth: Vec<GroundTruthBox>,
}

/// Source of images to explain
pub trait DatasetSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &DatasetKind;

    fn load(&mut self, index: usize) -> Result<ImageRecord, ExplainError>;
}

/// Convert an RGB image to a mean-subtracted BGR blob
#[must_use]
pub fn image_to_blob(image: &RgbImage, mean: [f32; 3]) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
        let pixel = image.get_pixel(x as u32, y as u32);
        f32::from(pixel[2 - c]) - mean[c]
    })
}

/// Recover an RGB `[0, 1]` image (`H x W x 3`) from a network blob
#[must_use]
pub fn blob_to_rgb01(blob: ArrayView3<'_, f32>, mean: [f32; 3]) -> Array3<f32> {
    let (_, height, width) = blob.dim();
    Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
        let bgr = 2 - c;
        (blob[[bgr, y, x]] + mean[bgr]) / 255.0
    })
}

/// Recover a displayable RGB image from a network blob
#[must_use]
pub fn blob_to_image(blob: ArrayView3<'_, f32>, mean: [f32; 3]) -> RgbImage {
    let (_, height, width) = blob.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let channel = |bgr: usize| (blob[[bgr, y, x]] + mean[bgr]).round().clamp(0.0, 255.0) as u8;
        image::Rgb([channel(2), channel(1), channel(0)])
    })
}

/// Images under `<root>/images`, annotations under `<root>/annotations/<stem>.json`
///
/// Annotation files hold a JSON array of ground-truth boxes in normalized
/// coordinates. Images without an annotation file have no ground truth.
#[derive(Debug)]
pub struct DirectoryDataset {
    root: PathBuf,
    kind: DatasetKind,
    images: Vec<PathBuf>,
    input_width: u32,
    input_height: u32,
}

impl DirectoryDataset {
    pub fn open(
        root: impl AsRef<Path>,
        kind: DatasetKind,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self, ExplainError> {
        let root = root.as_ref().to_path_buf();
        let image_dir = root.join("images");
        if !image_dir.is_dir() {
            return Err(ExplainError::Dataset(format!(
                "image directory not found: {}",
                image_dir.display()
            )));
        }

        let mut images = Vec::new();
        for entry in fs::read_dir(&image_dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()));
            if is_image {
                images.push(path);
            }
        }
        images.sort();

        info!(
            "Opened {} dataset at {} with {} images",
            kind.tag(),
            root.display(),
            images.len()
        );

        Ok(Self {
            root,
            kind,
            images,
            input_width,
            input_height,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_ground_truth(&self, stem: &str) -> Result<Vec<GroundTruthBox>, ExplainError> {
        let path = self.root.join("annotations").join(format!("{stem}.json"));
        if !path.exists() {
            debug!("No annotations for {}", stem);
            return Ok(Vec::new());
        }
        let boxes: Vec<GroundTruthBox> = serde_json::from_str(&fs::read_to_string(&path)?)?;

        let classes = self.kind.class_count() as u32;
        for gt in &boxes {
            if gt.label == 0 || gt.label >= classes {
                warn!("{}: label {} is outside 1..{}", path.display(), gt.label, classes);
            }
        }
        Ok(boxes)
    }
}

impl DatasetSource for DirectoryDataset {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn kind(&self) -> &DatasetKind {
        &self.kind
    }

    fn load(&mut self, index: usize) -> Result<ImageRecord, ExplainError> {
        let path = self.images.get(index).ok_or_else(|| {
            ExplainError::Dataset(format!("image index {index} out of range ({})", self.images.len()))
        })?;
        let file_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let image = image::open(path)?.to_rgb8();
        let resized = image::imageops::resize(
            &image,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );

        Ok(ImageRecord {
            blob: image_to_blob(&resized, self.kind.mean()),
            ground_truth: self.load_ground_truth(&file_name)?,
            file_name,
        })
    }
}
