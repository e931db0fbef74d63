//! ONNX Runtime detector capabilities for E2X explanations
//!
//! A detector is exported as two ONNX graphs stored under
//! `<model_dir>/<dataset>/<net_name>/`:
//! - `eval.onnx`: inputs `data` (`1 x C x H x W`) and `label` (`1 x 1 x G x 8`
//!   ground-truth rows); output `detection_eval`, rows of 10 values of which the
//!   first `num_classes - 1` are class declaration rows.
//! - `gradient.onnx`: inputs `data` (`B x C x H x W`) and `target` (`int64[1]`, the
//!   flat `num_classes * instance + label` index); output `gradient`, the gradient of
//!   the target score with respect to `data`.
//!
//! # Example
//! ```no_run
//! use e2x_onnx_network::{load_network, Device};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (detector, network) = load_network(Path::new("models"), "VOC", "VGGNet_300x300", 21, Device::Auto)?;
//! # Ok(())
//! # }
//! ```

pub mod onnx_utils;

pub use onnx_utils::{create_session, Device, OnnxError};

use e2x_core::detection::{parse_detection_rows, Detection, GroundTruthBox, GROUND_TRUTH_ROW_WIDTH};
use e2x_core::network::{DetectionEvaluator, GradientNetwork, NetworkError, TargetIndex};
use ndarray::{arr1, Array4, ArrayView3, ArrayView4, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

pub const EVAL_MODEL_FILE: &str = "eval.onnx";
pub const GRADIENT_MODEL_FILE: &str = "gradient.onnx";

/// Map a runtime failure, recognising allocation failures
fn runtime_error(message: String, wrap: fn(String) -> NetworkError) -> NetworkError {
    let lower = message.to_lowercase();
    if lower.contains("out of memory") || lower.contains("failed to allocate") {
        NetworkError::OutOfMemory
    } else {
        wrap(message)
    }
}

/// Directory holding both graphs of one network
#[must_use]
pub fn model_directory(model_dir: &Path, dataset: &str, net_name: &str) -> PathBuf {
    model_dir.join(dataset).join(net_name)
}

/// Input size encoded in a network name such as `VGGNet_300x300`, as `(width, height)`
#[must_use]
pub fn parse_input_size(net_name: &str) -> Option<(u32, u32)> {
    let suffix = net_name.rsplit('_').next()?;
    let (width, height) = suffix.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

/// Evaluation graph: detections classified against ground truth
pub struct OnnxDetectionEvaluator {
    session: Session,
    num_classes: usize,
}

impl OnnxDetectionEvaluator {
    #[must_use]
    pub fn new(session: Session, num_classes: usize) -> Self {
        Self {
            session,
            num_classes,
        }
    }
}

impl DetectionEvaluator for OnnxDetectionEvaluator {
    fn evaluate(
        &mut self,
        input: ArrayView3<'_, f32>,
        ground_truth: &[GroundTruthBox],
    ) -> Result<Vec<Detection>, NetworkError> {
        let data = input.insert_axis(Axis(0));
        let data = data.as_standard_layout();

        let rows: Vec<f32> = ground_truth
            .iter()
            .enumerate()
            .flat_map(|(i, gt)| gt.to_row(0, i))
            .collect();
        let labels = Array4::from_shape_vec((1, 1, ground_truth.len(), GROUND_TRUTH_ROW_WIDTH), rows)
            .map_err(|e| NetworkError::InvalidInput(e.to_string()))?;

        let data_tensor = TensorRef::from_array_view(data.view())
            .map_err(|e| NetworkError::InvalidInput(e.to_string()))?;
        let label_tensor = TensorRef::from_array_view(labels.view())
            .map_err(|e| NetworkError::InvalidInput(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["data" => data_tensor, "label" => label_tensor])
            .map_err(|e| runtime_error(e.to_string(), NetworkError::Forward))?;

        let (shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| NetworkError::Forward(format!("Failed to extract detections: {e}")))?;
        let row_width = shape.last().copied().unwrap_or(0).max(0) as usize;
        debug!("detection_eval shape: {:?}", shape);

        parse_detection_rows(values, row_width, self.num_classes.saturating_sub(1))
            .map_err(|e| NetworkError::Forward(e.to_string()))
    }
}

/// Gradient graph
///
/// The exported graph recomputes activations from its input, so the forward state is
/// the validated batch itself.
pub struct OnnxGradientNetwork {
    session: Session,
    input_shape: (usize, usize, usize),
    num_classes: usize,
}

impl OnnxGradientNetwork {
    #[must_use]
    pub fn new(session: Session, input_shape: (usize, usize, usize), num_classes: usize) -> Self {
        Self {
            session,
            input_shape,
            num_classes,
        }
    }
}

impl GradientNetwork for OnnxGradientNetwork {
    type State = Array4<f32>;

    fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&mut self, batch: ArrayView4<'_, f32>) -> Result<Self::State, NetworkError> {
        let (_, c, h, w) = batch.dim();
        if (c, h, w) != self.input_shape {
            return Err(NetworkError::InvalidInput(format!(
                "batch rows are {:?}, network expects {:?}",
                (c, h, w),
                self.input_shape
            )));
        }
        Ok(batch.as_standard_layout().into_owned())
    }

    fn backward(
        &mut self,
        state: &Self::State,
        target: TargetIndex,
    ) -> Result<Array4<f32>, NetworkError> {
        let start = Instant::now();
        let index = arr1(&[target.encode() as i64]);

        let data_tensor = TensorRef::from_array_view(state.view())
            .map_err(|e| NetworkError::InvalidInput(e.to_string()))?;
        let target_tensor = TensorRef::from_array_view(index.view())
            .map_err(|e| NetworkError::InvalidInput(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["data" => data_tensor, "target" => target_tensor])
            .map_err(|e| runtime_error(e.to_string(), NetworkError::Backward))?;

        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| NetworkError::Backward(format!("Failed to extract gradient: {e}")))?;
        let gradient = Array4::from_shape_vec(state.raw_dim(), values.to_vec())
            .map_err(|e| NetworkError::Backward(format!("Unexpected gradient size: {e}")))?;

        debug!(
            "Backward pass for target {} took {:.3}s",
            target.encode(),
            start.elapsed().as_secs_f64()
        );
        Ok(gradient)
    }
}

/// Load both graphs of `<dataset>/<net_name>` from `model_dir`
///
/// The input size is read from the network name (`..._<W>x<H>`); inputs are BGR,
/// so the channel count is 3.
pub fn load_network(
    model_dir: &Path,
    dataset: &str,
    net_name: &str,
    num_classes: usize,
    device: Device,
) -> Result<(OnnxDetectionEvaluator, OnnxGradientNetwork), OnnxError> {
    let (width, height) = parse_input_size(net_name).ok_or_else(|| {
        OnnxError::UnsupportedModel(format!(
            "cannot read input size from network name {net_name}, expected a _<W>x<H> suffix"
        ))
    })?;
    let directory = model_directory(model_dir, dataset, net_name);
    info!("Loading {} from {}", net_name, directory.display());

    let eval = create_session(&directory.join(EVAL_MODEL_FILE), device)?;
    let gradient = create_session(&directory.join(GRADIENT_MODEL_FILE), device)?;

    Ok((
        OnnxDetectionEvaluator::new(eval, num_classes),
        OnnxGradientNetwork::new(gradient, (3, height as usize, width as usize), num_classes),
    ))
}
