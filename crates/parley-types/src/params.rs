//! Per-session pipeline parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default deadline for one call into an external service.
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Telephony sample rate used when nothing else is configured.
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// When a caller utterance counts as barging in on the assistant.
///
/// Only consulted while an assistant response is in flight and
/// interruptions are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterruptionPolicy {
    /// Any non-empty transcript fragment, interim or final.
    #[default]
    AnyTranscript,
    /// Only finalized transcript fragments.
    FinalTranscript,
    /// Fragments with at least `words` words.
    MinWords { words: usize },
}

impl InterruptionPolicy {
    /// Returns true if a fragment with this text and finality triggers an
    /// interruption.
    pub fn triggers(&self, text: &str, is_final: bool) -> bool {
        let words = text.split_whitespace().count();
        if words == 0 {
            return false;
        }
        match self {
            Self::AnyTranscript => true,
            Self::FinalTranscript => is_final,
            Self::MinWords { words: min } => words >= *min,
        }
    }
}

/// Parameters fixed for the lifetime of one session task.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    /// Sample rate of caller audio entering the pipeline.
    pub audio_in_sample_rate: u32,
    /// Sample rate of synthesized audio leaving the pipeline.
    pub audio_out_sample_rate: u32,
    /// Whether caller speech may cut off an assistant response.
    pub allow_interruptions: bool,
    /// Trigger condition for interruptions.
    pub interruption_policy: InterruptionPolicy,
    /// Deadline for each call into an external service.
    pub service_timeout: Duration,
    /// Pace outbound audio at playback speed.
    pub pace_output: bool,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            audio_in_sample_rate: DEFAULT_SAMPLE_RATE,
            audio_out_sample_rate: DEFAULT_SAMPLE_RATE,
            allow_interruptions: true,
            interruption_policy: InterruptionPolicy::default(),
            service_timeout: DEFAULT_SERVICE_TIMEOUT,
            pace_output: true,
        }
    }
}
