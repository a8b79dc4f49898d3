use crate::error::StageError;
use crate::frame::Frame;
use crate::stage::{Stage, StageContext};
use async_trait::async_trait;
use parley_types::audio::resample_linear;
use parley_types::AudioChunk;
use tracing::debug;

/// Head of the chain. Normalizes caller audio to the session's input rate.
#[derive(Debug, Default)]
pub struct InputAdapter {
    warned_rate: Option<u32>,
}

impl InputAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(&mut self, chunk: AudioChunk, rate: u32) -> AudioChunk {
        if chunk.sample_rate == rate || chunk.channels != 1 {
            return chunk;
        }
        if self.warned_rate != Some(chunk.sample_rate) {
            debug!(from = chunk.sample_rate, to = rate, "resampling caller audio");
            self.warned_rate = Some(chunk.sample_rate);
        }
        let samples = resample_linear(&chunk.samples(), chunk.sample_rate, rate);
        AudioChunk::from_samples(&samples, rate, chunk.sequence)
    }
}

#[async_trait]
impl Stage for InputAdapter {
    fn name(&self) -> &'static str {
        "input"
    }

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
        match frame {
            Frame::InputAudio(chunk) => {
                let rate = ctx.params().audio_in_sample_rate;
                let chunk = self.normalize(chunk, rate);
                ctx.push(Frame::InputAudio(chunk)).await
            }
            other => ctx.push(other).await,
        }
    }
}
