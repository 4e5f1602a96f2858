//! Error handling for the pipeline engine.
//!
//! Configuration problems are reported once at init time and prevent the
//! chain from starting. Runtime errors are limited to the closed-pipeline
//! state and fatal stage failures — the engine never retries; retry policy
//! belongs to the caller layer.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid dependency configuration (bad reference, arity mismatch,
    /// malformed structure). Raised at init; the chain never starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pipeline has been stopped and no buffered output remains.
    #[error("Pipeline closed")]
    Closed,

    /// A stage's `run()` failed. Fatal to the whole chain.
    #[error("Stage {stage} execution error: {message}")]
    StageExecution { stage: usize, message: String },

    /// Out-of-range input or output access on a stage.
    #[error("Stage {stage} has no input/output slot {index}")]
    InvalidSlot { stage: usize, index: usize },

    /// No input with the given name.
    #[error("Unknown input name: {0}")]
    UnknownInput(String),
}

impl PipelineError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
