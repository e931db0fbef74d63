//! Per-image explanation loop
//!
//! For every image: match detections, segment once, sample perturbation paths once,
//! then explain each detection of the work list against the shared per-image state.
//! Detections whose artifact already exists are skipped before any evaluation.

use crate::aggregator::{SaliencyAggregator, SaliencyMap};
use crate::artifacts::{ArtifactSink, ExplanationArtifact, ResultLayout};
use crate::config::ExplanationConfig;
use crate::dataset::{blob_to_image, blob_to_rgb01, DatasetKind, DatasetSource, ImageRecord};
use crate::detection::Detection;
use crate::error::ExplainError;
use crate::evaluator::PerturbationBatchEvaluator;
use crate::matcher::DetectionMatcher;
use crate::network::{DetectionEvaluator, GradientNetwork, TargetIndex};
use crate::sampler::SegmentSampler;
use crate::segmentation::{MethodSegmenter, SegmentationMap, Segmenter};
use image::RgbImage;
use ndarray::{Array4, ArrayView3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Counts for one driver run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub images: usize,
    /// Images abandoned before any detection was explained
    pub failed_images: usize,
    pub explained: usize,
    /// Detections with an existing artifact
    pub skipped: usize,
    /// Detections whose evaluation or persistence failed
    pub failed: usize,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} images ({} failed), {} explained, {} skipped, {} failed in {:.1}s",
            self.images,
            self.failed_images,
            self.explained,
            self.skipped,
            self.failed,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Read-only state shared by all detections of one image
struct ImageContext {
    segmentation: SegmentationMap,
    perturbed: Array4<f32>,
    display: RgbImage,
}

pub struct ExplanationDriver<E, N, A> {
    detector: E,
    network: N,
    sink: A,
    segmenter: MethodSegmenter,
    matcher: DetectionMatcher,
    sampler: SegmentSampler,
    evaluator: PerturbationBatchEvaluator,
    aggregator: SaliencyAggregator,
    layout: ResultLayout,
    rng: StdRng,
}

impl<E, N, A> ExplanationDriver<E, N, A>
where
    E: DetectionEvaluator,
    N: GradientNetwork,
    A: ArtifactSink,
{
    /// Validate `config` and assemble the pipeline; fails before any processing
    pub fn new(config: &ExplanationConfig, detector: E, network: N, sink: A) -> Result<Self, ExplainError> {
        config.validate()?;

        let segmenter = MethodSegmenter::new(
            config.segmentation_method()?,
            config.num_segments,
            config.segmentation_params.clone(),
        );
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        Ok(Self {
            detector,
            network,
            sink,
            segmenter,
            matcher: DetectionMatcher::new(config.confidence_threshold),
            sampler: SegmentSampler::new(config.num_samples).with_strategy(config.path_strategy),
            evaluator: PerturbationBatchEvaluator::new(config.batch_size)?,
            aggregator: SaliencyAggregator,
            layout: config.result_layout(),
            rng,
        })
    }

    #[must_use]
    pub fn layout(&self) -> &ResultLayout {
        &self.layout
    }

    /// Explain every image of `dataset`
    ///
    /// Failures are contained: a failing image is abandoned, a failing detection is
    /// skipped, and the run moves on.
    pub fn run<D: DatasetSource + ?Sized>(&mut self, dataset: &mut D) -> RunSummary {
        let start = Instant::now();
        let kind = dataset.kind().clone();
        let mut summary = RunSummary::default();

        info!(
            "Explaining {} images with {} segmentation, results in {}",
            dataset.len(),
            self.segmenter.method,
            self.layout.directory().display()
        );

        for index in 0..dataset.len() {
            summary.images += 1;
            let record = match dataset.load(index) {
                Ok(record) => record,
                Err(e) => {
                    error!("Failed to load image {}: {}", index, e);
                    summary.failed_images += 1;
                    continue;
                }
            };
            if let Err(e) = self.explain_image(&record, &kind, &mut summary) {
                error!("Failed to explain {}: {}", record.file_name, e);
                summary.failed_images += 1;
            }
        }

        summary.elapsed = start.elapsed();
        info!("Finished: {}", summary);
        summary
    }

    fn explain_image(
        &mut self,
        record: &ImageRecord,
        kind: &DatasetKind,
        summary: &mut RunSummary,
    ) -> Result<(), ExplainError> {
        let expected = self.network.input_shape();
        if record.blob.dim() != expected {
            return Err(ExplainError::ShapeMismatch {
                what: "network input",
                expected: vec![expected.0, expected.1, expected.2],
                actual: record.blob.shape().to_vec(),
            });
        }

        let detections = self
            .detector
            .evaluate(record.blob.view(), &record.ground_truth)?;
        let matched = self
            .matcher
            .match_detections(&detections, record.ground_truth.len());
        info!(
            "Statistics for {}: GT = {}, TP = {}, FP = {}, FN = {}",
            record.file_name,
            matched.ground_truth_count,
            matched.true_positives.len(),
            matched.false_positives.len(),
            matched.false_negatives.len()
        );
        if matched.work_list.is_empty() {
            return Ok(());
        }

        let context = self.prepare(record, kind)?;
        let total = matched.work_list.len();

        for (position, detection) in matched.work_list.iter().enumerate() {
            let stem = self.layout.stem(&record.file_name, position);
            if self.sink.exists(&stem) {
                info!(
                    "Results for {} exist, moving to the next detection",
                    stem.display()
                );
                summary.skipped += 1;
                continue;
            }

            let outcome = matched.outcome_at(position);
            let class_name = kind.class_name(detection.label);
            info!(
                "Analyzing detection {} of {} ({}) for {}: class {}, confidence {:.3}, {} segments",
                position,
                total,
                outcome,
                record.file_name,
                class_name,
                detection.confidence,
                context.segmentation.num_segments()
            );

            let start = Instant::now();
            let saliency = match self.explain_detection(record.blob.view(), &context, detection) {
                Ok(saliency) => saliency,
                Err(e) => {
                    error!(
                        "Detection {} of {} failed: {}",
                        position, record.file_name, e
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            let artifact = ExplanationArtifact {
                stem,
                file_name: &record.file_name,
                position,
                outcome,
                class_name,
                detection,
                saliency: &saliency,
                image: &context.display,
            };
            match self.sink.persist(&artifact) {
                Ok(()) => summary.explained += 1,
                Err(e) => {
                    error!("Failed to save {}: {}", artifact.stem.display(), e);
                    summary.failed += 1;
                }
            }
            info!("Detection took {:.3}s", start.elapsed().as_secs_f64());
        }

        Ok(())
    }

    fn prepare(&mut self, record: &ImageRecord, kind: &DatasetKind) -> Result<ImageContext, ExplainError> {
        let rgb01 = blob_to_rgb01(record.blob.view(), kind.mean());
        let segmentation = self.segmenter.segment(rgb01.view())?;
        let paths = self
            .sampler
            .sample(segmentation.num_segments(), &mut self.rng);
        let perturbed = paths.expand(&segmentation).perturb(record.blob.view());
        debug!(
            "Prepared {} perturbed samples over {} segments",
            perturbed.shape()[0],
            segmentation.num_segments()
        );

        Ok(ImageContext {
            segmentation,
            perturbed,
            display: blob_to_image(record.blob.view(), kind.mean()),
        })
    }

    fn explain_detection(
        &mut self,
        blob: ArrayView3<'_, f32>,
        context: &ImageContext,
        detection: &Detection,
    ) -> Result<SaliencyMap, ExplainError> {
        let target = TargetIndex::for_detection(detection, self.network.num_classes());
        let responses = self
            .evaluator
            .evaluate(&mut self.network, context.perturbed.view(), target)?;
        self.aggregator
            .aggregate(&responses, blob, &context.segmentation)
    }
}
