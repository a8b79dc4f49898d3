use crate::error::StageError;
use crate::frame::Frame;
use crate::stage::{Stage, StageContext};
use async_trait::async_trait;
use parley_transport::Outbound;
use parley_types::audio::resample_linear;
use parley_types::AudioChunk;
use tokio::sync::mpsc;
use tracing::debug;

/// Hands synthesized audio to the transport.
///
/// With pacing enabled each chunk is followed by a sleep of its playback
/// duration, so a response counts as active until the caller has heard it.
pub struct OutputAdapter {
    transport: mpsc::Sender<Outbound>,
    sequence: u64,
}

impl OutputAdapter {
    pub fn new(transport: mpsc::Sender<Outbound>) -> Self {
        Self {
            transport,
            sequence: 0,
        }
    }

    async fn send(&self, out: Outbound) -> Result<(), StageError> {
        self.transport.send(out).await.map_err(|_| StageError::Closed)
    }

    fn normalize(&self, chunk: AudioChunk, rate: u32) -> AudioChunk {
        if chunk.sample_rate == rate {
            return chunk.with_sequence(self.sequence);
        }
        let samples = resample_linear(&chunk.samples(), chunk.sample_rate, rate);
        AudioChunk::from_samples(&samples, rate, self.sequence)
    }
}

#[async_trait]
impl Stage for OutputAdapter {
    fn name(&self) -> &'static str {
        "output"
    }

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
        match frame {
            Frame::OutputAudio { chunk, .. } => {
                let chunk = self.normalize(chunk, ctx.params().audio_out_sample_rate);
                let playback = chunk.duration();
                self.sequence += 1;
                self.send(Outbound::Audio(chunk)).await?;
                if ctx.params().pace_output {
                    tokio::time::sleep(playback).await;
                }
                Ok(())
            }
            other => ctx.push(other).await,
        }
    }

    async fn on_interruption(&mut self, _ctx: &StageContext) -> Result<(), StageError> {
        debug!("clearing provider playback");
        self.send(Outbound::Clear).await
    }

    fn critical(&self) -> bool {
        true
    }

    fn observes_interruptions(&self) -> bool {
        true
    }
}
