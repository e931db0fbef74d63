//! Perturbation-path saliency for object detections
//!
//! Explains one detector prediction at a time by attributing its confidence to image
//! segments. An image is split into segments, every segment is faded along a random
//! path of `K` magnitudes in `[0, 1]`, the detector gradient is evaluated for each of
//! the `K` perturbed inputs, and gradient x input is summed per segment.
//!
//! # Example
//! ```no_run
//! use e2x_core::{
//!     DatasetKind, DirectoryDataset, DetectionEvaluator, ExplanationConfig, ExplanationDriver,
//!     GradientNetwork, PngJsonWriter,
//! };
//!
//! fn explain<E: DetectionEvaluator, N: GradientNetwork>(detector: E, network: N) -> Result<(), e2x_core::ExplainError> {
//!     let config = ExplanationConfig::default();
//!     let (_, height, width) = network.input_shape();
//!     let mut dataset = DirectoryDataset::open("data/voc", DatasetKind::voc(), width as u32, height as u32)?;
//!     let mut driver = ExplanationDriver::new(&config, detector, network, PngJsonWriter)?;
//!     let summary = driver.run(&mut dataset);
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod detection;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod matcher;
pub mod network;
pub mod sampler;
pub mod segmentation;

pub use aggregator::{SaliencyAggregator, SaliencyMap};
pub use artifacts::{ArtifactSink, ExplanationArtifact, PngJsonWriter, ResultLayout, SaliencyDump};
pub use config::ExplanationConfig;
pub use dataset::{DatasetKind, DatasetSource, DirectoryDataset, ImageRecord};
pub use detection::{parse_detection_rows, Detection, GroundTruthBox, Outcome, OutcomeCode};
pub use driver::{ExplanationDriver, RunSummary};
pub use error::ExplainError;
pub use evaluator::{PerturbationBatchEvaluator, ResponseBuffer};
pub use matcher::{DetectionMatcher, MatchResult};
pub use network::{DetectionEvaluator, GradientNetwork, NetworkError, TargetIndex};
pub use sampler::{PathMagnitudeMatrix, PathStrategy, PerSampleMask, SegmentSampler};
pub use segmentation::{MethodSegmenter, SegmentationMap, SegmentationMethod, SegmentationParams, Segmenter};
