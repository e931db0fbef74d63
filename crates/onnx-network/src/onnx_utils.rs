//! ONNX Runtime session creation
//!
//! Sessions run with full graph optimization and one intra-op thread per physical
//! core (override with `E2X_THREADS`). Execution providers follow the selected
//! [`Device`]; `Auto` tries CoreML, then CUDA, then CPU, and retries without CoreML
//! when CoreML cannot compile the model.

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

/// Error type for ONNX operations
#[derive(Debug, thiserror::Error)]
pub enum OnnxError {
    #[error("Failed to create session builder: {0}")]
    SessionBuilderError(String),

    #[error("Failed to load ONNX model from {path}: {error}")]
    ModelLoadError { path: String, error: String },

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),
}

/// Where inference runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
    /// CoreML, CUDA and CPU, in that order of preference
    #[default]
    Auto,
    Cpu,
    /// CUDA device by ordinal, CPU fallback
    Cuda(i32),
}

impl Device {
    /// `None` selects [`Device::Auto`], a negative id selects the CPU
    #[must_use]
    pub fn from_gpu_id(gpu: Option<i32>) -> Self {
        match gpu {
            None => Device::Auto,
            Some(id) if id < 0 => Device::Cpu,
            Some(id) => Device::Cuda(id),
        }
    }

    fn providers(self, with_coreml: bool) -> Vec<ExecutionProviderDispatch> {
        match self {
            Device::Cpu => vec![CPUExecutionProvider::default().build()],
            Device::Cuda(id) => vec![
                CUDAExecutionProvider::default().with_device_id(id).build(),
                CPUExecutionProvider::default().build(),
            ],
            Device::Auto if with_coreml => vec![
                CoreMLExecutionProvider::default().with_subgraphs(true).build(),
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            Device::Auto => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

fn thread_count() -> usize {
    std::env::var("E2X_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(num_cpus::get_physical)
}

fn build(model_path: &Path, providers: Vec<ExecutionProviderDispatch>) -> Result<Session, OnnxError> {
    Session::builder()
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .with_intra_threads(thread_count())
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .with_memory_pattern(true)
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .with_execution_providers(providers)
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| OnnxError::ModelLoadError {
            path: model_path.display().to_string(),
            error: e.to_string(),
        })
}

/// Create an optimized session for `model_path` on `device`
pub fn create_session(model_path: &Path, device: Device) -> Result<Session, OnnxError> {
    if !model_path.exists() {
        return Err(OnnxError::ModelNotFound(model_path.display().to_string()));
    }

    let start = Instant::now();
    let session = match build(model_path, device.providers(true)) {
        Ok(session) => session,
        Err(OnnxError::ModelLoadError { error, .. })
            if device == Device::Auto && (error.contains("CoreML") || error.contains("MLModel")) =>
        {
            warn!(
                "CoreML failed for {}, retrying with CUDA/CPU: {}",
                model_path.display(),
                error
            );
            build(model_path, device.providers(false))?
        }
        Err(e) => return Err(e),
    };

    debug!(
        "Session for {} created on {:?} in {:.3}s",
        model_path.display(),
        device,
        start.elapsed().as_secs_f64()
    );
    Ok(session)
}
