//! Error types for the signal pipeline
use thiserror::Error;

/// Core pipeline errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// Analysis engine raised an error while processing a buffer
    #[error("Analysis engine error: {0}")]
    Engine(String),

    /// Analysis buffer had an unexpected shape
    #[error("Invalid analysis buffer: expected {expected} samples, got {actual}")]
    BufferSize {
        /// Configured buffer size
        expected: usize,
        /// Length actually received
        actual: usize,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
