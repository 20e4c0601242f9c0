//! Error types for arena, scoring and pipeline operations

use crate::pipeline::ValidationStage;

/// Errors raised by the arena core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or insufficient input, raised before any concurrent work starts
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A statistical calculation could not be completed
    #[error("Computation failed: {0}")]
    Computation(String),

    /// Illegal pipeline stage request, state left unchanged
    #[error("Illegal stage transition for {entity_id}: {from:?} -> {to:?} ({reason})")]
    StageTransition {
        entity_id: String,
        from: Option<ValidationStage>,
        to: ValidationStage,
        reason: String,
    },

    /// An operation inside a pipeline stage failed
    #[error("Stage {stage:?} failed for {entity_id}: {message}")]
    StageExecution {
        entity_id: String,
        stage: ValidationStage,
        message: String,
    },

    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An event could not be handed to its sink
    #[error("Event publish failed: {0}")]
    Publish(String),
}

impl Error {
    pub(crate) fn computation(msg: impl Into<String>) -> Self {
        Error::Computation(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type for arena operations
pub type Result<T> = std::result::Result<T, Error>;
