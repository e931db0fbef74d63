//! Error types for the explanation pipeline

use crate::network::NetworkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown segmentation method: {0} (expected slic, quickshift, felzenszwalb or uniform)")]
    UnknownSegmentationMethod(String),

    #[error("Malformed detection row: expected at least {expected} values, got {actual}")]
    MalformedDetection { expected: usize, actual: usize },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
