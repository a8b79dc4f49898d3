//! Seams to the external speech and language services.
//!
//! The pipeline treats every service as a black box. Streaming services
//! push partial results into the provided channel as they arrive; atomic
//! services send once. Returning after the last send completes the call.

use async_trait::async_trait;
use parley_types::{AudioChunk, ServiceError, Transcript, Turn};
use tokio::sync::mpsc;

#[async_trait]
pub trait SpeechRecognizer: Send {
    /// Feeds caller audio and returns whatever transcripts became
    /// available. Recognizers may buffer and return nothing.
    async fn recognize(&mut self, chunk: &AudioChunk) -> Result<Vec<Transcript>, ServiceError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generates the assistant's next reply for `turns`, sending text
    /// deltas to `deltas` in order.
    async fn complete(&self, turns: &[Turn], deltas: mpsc::Sender<String>)
        -> Result<(), ServiceError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speaks `text` as PCM16 audio at `sample_rate`, sending chunks to
    /// `audio` in playback order.
    async fn synthesize(
        &self,
        text: &str,
        sample_rate: u32,
        audio: mpsc::Sender<AudioChunk>,
    ) -> Result<(), ServiceError>;
}
