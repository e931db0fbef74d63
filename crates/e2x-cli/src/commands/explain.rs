//! Explain every detection in a dataset folder

use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};
use e2x_core::{
    DatasetKind, DirectoryDataset, ExplanationConfig, ExplanationDriver, GradientNetwork,
    PathStrategy, PngJsonWriter,
};
use e2x_onnx_network::{load_network, Device};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Preset {
    Fast,
    Thorough,
}

#[derive(Args, Debug)]
pub struct ExplainCommand {
    /// Dataset folder with images/ and optional annotations/ (and labels.txt for custom datasets)
    #[arg(value_name = "FOLDER")]
    folder: PathBuf,

    /// YAML configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start from a preset instead of the defaults
    #[arg(long, value_enum, conflicts_with = "config")]
    preset: Option<Preset>,

    /// Dataset tag (VOC, or a custom tag)
    #[arg(long)]
    dataset: Option<String>,

    /// Network name, e.g. VGGNet_300x300
    #[arg(long)]
    net_name: Option<String>,

    /// GPU id; negative selects the CPU, unset picks the best available provider
    #[arg(long, allow_negative_numbers = true)]
    gpu: Option<i32>,

    /// Rows per forward/backward batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Segmentation method: slic, quickshift, felzenszwalb or uniform
    #[arg(long)]
    segmentation: Option<String>,

    /// Number of segments (M)
    #[arg(long)]
    num_segments: Option<usize>,

    /// Perturbation path length
    #[arg(long)]
    num_samples: Option<usize>,

    /// Confidence threshold separating TP from FN
    #[arg(long)]
    confidence: Option<f32>,

    /// Seed for path sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Use one perturbation path for all segments
    #[arg(long)]
    shared_path: bool,

    /// Directory containing <dataset>/<net_name>/{eval,gradient}.onnx
    #[arg(long, default_value = "models")]
    model_dir: PathBuf,

    /// Root directory for results_<method>/...
    #[arg(long)]
    results_dir: Option<PathBuf>,
}

impl ExplainCommand {
    /// Configuration from file or preset, with flag overrides applied
    pub fn build_config(&self) -> Result<ExplanationConfig> {
        let mut config = match (&self.config, self.preset) {
            (Some(path), _) => ExplanationConfig::from_yaml(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            (None, Some(Preset::Fast)) => ExplanationConfig::fast(),
            (None, Some(Preset::Thorough)) => ExplanationConfig::thorough(),
            (None, None) => ExplanationConfig::default(),
        };

        if let Some(dataset) = &self.dataset {
            config.dataset.clone_from(dataset);
        }
        if let Some(net_name) = &self.net_name {
            config.net_name.clone_from(net_name);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(segmentation) = &self.segmentation {
            config.segmentation.clone_from(segmentation);
        }
        if let Some(num_segments) = self.num_segments {
            config.num_segments = num_segments;
        }
        if let Some(num_samples) = self.num_samples {
            config.num_samples = num_samples;
        }
        if let Some(confidence) = self.confidence {
            config.confidence_threshold = confidence;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.shared_path {
            config.path_strategy = PathStrategy::Shared;
        }
        if let Some(results_dir) = &self.results_dir {
            config.results_root.clone_from(results_dir);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn execute(self) -> Result<()> {
        let config = self.build_config()?;
        info!(
            "{} on {}/{}: {} segmentation, {} segments, {} samples, batch {}",
            config.method,
            config.dataset,
            config.net_name,
            config.segmentation,
            config.num_segments,
            config.num_samples,
            config.batch_size
        );

        let kind = DatasetKind::from_tag(&config.dataset, &self.folder)
            .context("Failed to resolve dataset classes")?;
        let (detector, network) = load_network(
            &self.model_dir,
            &config.dataset,
            &config.net_name,
            kind.class_count(),
            Device::from_gpu_id(self.gpu),
        )
        .context("Failed to load detector")?;

        let (_, height, width) = network.input_shape();
        let mut dataset = DirectoryDataset::open(&self.folder, kind, width as u32, height as u32)
            .context("Failed to open dataset")?;

        let mut driver = ExplanationDriver::new(&config, detector, network, PngJsonWriter)?;
        let summary = driver.run(&mut dataset);

        if summary.failed + summary.failed_images > 0 {
            warn!(
                "{} detections and {} images failed",
                summary.failed, summary.failed_images
            );
        }
        if summary.images > 0 && summary.failed_images == summary.images {
            anyhow::bail!("No image could be processed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        command: ExplainCommand,
    }

    fn parse(args: &[&str]) -> ExplainCommand {
        let mut argv = vec!["e2x"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn test_defaults_without_flags() {
        let config = parse(&["data"]).build_config().unwrap();
        assert_eq!(config, ExplanationConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "data",
            "--segmentation",
            "uniform",
            "--num-segments",
            "50",
            "--num-samples",
            "8",
            "--batch-size",
            "4",
            "--seed",
            "9",
            "--shared-path",
            "--gpu",
            "-1",
        ])
        .build_config()
        .unwrap();

        assert_eq!(config.segmentation, "uniform");
        assert_eq!(config.num_segments, 50);
        assert_eq!(config.num_samples, 8);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.path_strategy, PathStrategy::Shared);
    }

    #[test]
    fn test_flags_override_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, "num_samples: 12\nsegmentation: felzenszwalb\n").unwrap();

        let command = parse(&["data", "--config", path.to_str().unwrap(), "--num-samples", "20"]);
        let config = command.build_config().unwrap();
        assert_eq!(config.num_samples, 20);
        assert_eq!(config.segmentation, "felzenszwalb");
    }

    #[test]
    fn test_unknown_segmentation_is_rejected() {
        let result = parse(&["data", "--segmentation", "watershed"]).build_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_preset() {
        let config = parse(&["data", "--preset", "fast"]).build_config().unwrap();
        assert_eq!(config, ExplanationConfig::fast());
    }
}
