use crate::error::StageError;
use crate::frame::Frame;
use crate::services::SpeechRecognizer;
use crate::stage::{Stage, StageContext};
use async_trait::async_trait;
use tracing::debug;

/// Turns caller audio into transcript frames.
pub struct RecognizerStage {
    recognizer: Box<dyn SpeechRecognizer>,
}

impl RecognizerStage {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self { recognizer }
    }
}

#[async_trait]
impl Stage for RecognizerStage {
    fn name(&self) -> &'static str {
        "recognizer"
    }

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
        let chunk = match frame {
            Frame::InputAudio(chunk) => chunk,
            other => return ctx.push(other).await,
        };

        let recognizer = &mut self.recognizer;
        let transcripts = ctx
            .with_timeout(async { Ok(recognizer.recognize(&chunk).await?) })
            .await?;

        for transcript in transcripts {
            if transcript.text.trim().is_empty() {
                continue;
            }
            debug!(
                text = %transcript.text,
                is_final = transcript.is_final,
                "transcript"
            );
            ctx.push(Frame::Transcript(transcript)).await?;
        }
        Ok(())
    }

    fn critical(&self) -> bool {
        true
    }
}
