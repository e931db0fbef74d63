//! Run configuration

use crate::artifacts::ResultLayout;
use crate::error::ExplainError;
use crate::sampler::PathStrategy;
use crate::segmentation::{SegmentationMethod, SegmentationParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one explanation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplanationConfig {
    /// Method tag used in the results path
    pub method: String,
    /// Dataset tag (`VOC` or a custom tag with `labels.txt`)
    pub dataset: String,
    /// Network name, used to locate model files and in the results path
    pub net_name: String,
    /// Detections at or below this confidence are not reported as TP/FP
    pub confidence_threshold: f32,
    /// Rows per forward/backward batch
    pub batch_size: usize,
    /// Segmentation method name; validated before any processing
    pub segmentation: String,
    pub num_segments: usize,
    /// Perturbation path length per segment
    pub num_samples: usize,
    pub path_strategy: PathStrategy,
    /// RNG seed for path sampling; random when unset
    pub seed: Option<u64>,
    pub results_root: PathBuf,
    pub segmentation_params: SegmentationParams,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            method: "E2X".to_string(),
            dataset: "VOC".to_string(),
            net_name: "VGGNet_300x300".to_string(),
            confidence_threshold: 0.5,
            batch_size: 16,
            segmentation: "slic".to_string(),
            num_segments: 200,
            num_samples: 32,
            path_strategy: PathStrategy::Independent,
            seed: None,
            results_root: PathBuf::from("."),
            segmentation_params: SegmentationParams::default(),
        }
    }
}

impl ExplanationConfig {
    /// Short paths and coarse segments, for quick looks
    #[must_use]
    pub fn fast() -> Self {
        Self {
            segmentation: "uniform".to_string(),
            num_segments: 64,
            num_samples: 8,
            batch_size: 8,
            ..Default::default()
        }
    }

    /// Long paths over fine superpixels
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            num_segments: 400,
            num_samples: 64,
            ..Default::default()
        }
    }

    pub fn from_yaml(yaml_path: impl AsRef<Path>) -> Result<Self, ExplainError> {
        let contents = std::fs::read_to_string(yaml_path.as_ref())?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Parsed segmentation method
    pub fn segmentation_method(&self) -> Result<SegmentationMethod, ExplainError> {
        self.segmentation.parse()
    }

    /// Reject configurations that cannot produce an explanation
    pub fn validate(&self) -> Result<(), ExplainError> {
        self.segmentation_method()?;
        if self.num_samples == 0 {
            return Err(ExplainError::InvalidConfig(
                "num_samples must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ExplainError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.num_segments == 0 {
            return Err(ExplainError::InvalidConfig(
                "num_segments must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ExplainError::InvalidConfig(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn result_layout(&self) -> ResultLayout {
        ResultLayout::new(
            &self.results_root,
            &self.method,
            &self.dataset,
            &self.net_name,
            &self.segmentation,
            self.num_segments,
            self.num_samples,
        )
    }
}
