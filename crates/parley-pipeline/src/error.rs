use parley_types::ServiceError;
use std::time::Duration;
use thiserror::Error;

/// Failure inside one stage. Handled at the stage boundary and never sent
/// downstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("stage call timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// The next stage or the transport is gone.
    #[error("downstream closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline is missing its {0} stage")]
    MissingStage(&'static str),

    #[error("pipeline is no longer accepting frames")]
    Closed,
}
