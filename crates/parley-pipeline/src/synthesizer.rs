use crate::error::StageError;
use crate::frame::Frame;
use crate::services::SpeechSynthesizer;
use crate::stage::{Stage, StageContext};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const SENTENCE_END: &[char] = &['.', '!', '?', ';', ':'];

/// Removes the first complete sentence from `buffer`.
///
/// A sentence ends at terminal punctuation followed by whitespace, so
/// decimals and abbreviations mid-token stay intact until more text
/// arrives.
pub fn take_sentence(buffer: &mut String) -> Option<String> {
    let mut chars = buffer.char_indices().peekable();
    let mut split = None;
    while let Some((index, ch)) = chars.next() {
        if !SENTENCE_END.contains(&ch) {
            continue;
        }
        if let Some((_, next)) = chars.peek() {
            if next.is_whitespace() {
                split = Some(index + ch.len_utf8());
                break;
            }
        }
    }

    let split = split?;
    let sentence = buffer[..split].trim().to_string();
    let rest = buffer[split..].trim_start().to_string();
    *buffer = rest;
    if sentence.chars().any(char::is_alphanumeric) {
        Some(sentence)
    } else {
        take_sentence(buffer)
    }
}

/// Speaks model output sentence by sentence.
pub struct SynthesizerStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    buffer: String,
}

impl SynthesizerStage {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            synthesizer,
            buffer: String::new(),
        }
    }

    async fn speak(&self, epoch: u64, text: String, ctx: &StageContext) -> Result<(), StageError> {
        let rate = ctx.params().audio_out_sample_rate;
        let (tx, mut rx) = mpsc::channel(64);
        let synthesizer = Arc::clone(&self.synthesizer);
        let spoken = text.clone();

        let call = async move { synthesizer.synthesize(&spoken, rate, tx).await };
        let forward = async move {
            let mut chunks = 0usize;
            while let Some(chunk) = rx.recv().await {
                chunks += 1;
                ctx.push(Frame::OutputAudio { epoch, chunk }).await?;
            }
            Ok::<usize, StageError>(chunks)
        };

        let (called, forwarded) = ctx
            .with_timeout(async { Ok(tokio::join!(call, forward)) })
            .await?;
        let chunks = forwarded?;
        called?;

        debug!(epoch, chunks, chars = text.len(), "sentence synthesized");
        ctx.push(Frame::SpokenText { epoch, text }).await
    }
}

#[async_trait]
impl Stage for SynthesizerStage {
    fn name(&self) -> &'static str {
        "synthesizer"
    }

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
        match frame {
            Frame::ResponseStart { epoch } => {
                self.buffer.clear();
                ctx.push(Frame::ResponseStart { epoch }).await
            }
            Frame::ResponseText { epoch, text } => {
                self.buffer.push_str(&text);
                while let Some(sentence) = take_sentence(&mut self.buffer) {
                    self.speak(epoch, sentence, ctx).await?;
                }
                Ok(())
            }
            Frame::ResponseEnd { epoch } => {
                let rest = std::mem::take(&mut self.buffer);
                let rest = rest.trim();
                if !rest.is_empty() {
                    self.speak(epoch, rest.to_string(), ctx).await?;
                }
                ctx.push(Frame::ResponseEnd { epoch }).await
            }
            other => ctx.push(other).await,
        }
    }

    async fn on_interruption(&mut self, _ctx: &StageContext) -> Result<(), StageError> {
        self.buffer.clear();
        Ok(())
    }

    fn critical(&self) -> bool {
        true
    }

    fn observes_interruptions(&self) -> bool {
        true
    }
}
