//! Error type shared by all external speech/AI service adapters.

use thiserror::Error;

/// Failure reported by a recognizer, language model or synthesizer.
///
/// The pipeline never lets these cross a queue boundary: the stage that
/// called the service translates them into degraded output or a session
/// cancellation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service could not be reached or is not configured.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service answered but the call failed.
    #[error("service call failed: {0}")]
    Failed(String),

    /// The service did not answer within the configured deadline.
    #[error("service timed out after {0} ms")]
    Timeout(u64),
}
