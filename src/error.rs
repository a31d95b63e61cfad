use thiserror::Error;

/// Errors surfaced by feature extraction and its helpers
#[derive(Debug, Error)]
pub enum AppError {
    /// The audio input is not a one-dimensional sample array
    #[error("Invalid input kind: {0}")]
    InvalidInputKind(String),

    /// A processor's fixed preconditions are violated
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure reported by a delegated backend (ONNX Runtime, FFT setup, ...)
    #[error("Backend failure: {0}")]
    Backend(String),

    /// Audio decoding or resampling failure
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
