use crate::context::ConversationContext;
use crate::error::StageError;
use crate::frame::Frame;
use crate::services::LanguageModel;
use crate::stage::{Stage, StageContext};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Said when the language model fails or times out.
pub const DEFAULT_FALLBACK_RESPONSE: &str =
    "I'm sorry, I'm having trouble answering right now. Could you say that again?";

/// Generates an assistant response each time the context is updated.
pub struct LlmStage {
    model: Arc<dyn LanguageModel>,
    context: Arc<ConversationContext>,
    fallback: String,
    in_flight: Option<u64>,
}

impl LlmStage {
    pub fn new(model: Arc<dyn LanguageModel>, context: Arc<ConversationContext>) -> Self {
        Self {
            model,
            context,
            fallback: DEFAULT_FALLBACK_RESPONSE.to_string(),
            in_flight: None,
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    async fn respond(&mut self, ctx: &StageContext) -> Result<(), StageError> {
        let epoch = ctx.tracker().begin_response();
        self.in_flight = Some(epoch);
        ctx.push(Frame::ResponseStart { epoch }).await?;

        let turns = self.context.snapshot();
        debug!(epoch, turns = turns.len(), "requesting completion");

        let (tx, mut rx) = mpsc::channel::<String>(32);
        let model = Arc::clone(&self.model);
        let call = async move { model.complete(&turns, tx).await };
        let forward = async move {
            let mut deltas = 0usize;
            while let Some(text) = rx.recv().await {
                if text.is_empty() {
                    continue;
                }
                deltas += 1;
                ctx.push(Frame::ResponseText { epoch, text }).await?;
            }
            Ok::<usize, StageError>(deltas)
        };

        let (called, forwarded) = ctx
            .with_timeout(async { Ok(tokio::join!(call, forward)) })
            .await?;
        let deltas = forwarded?;
        called?;

        ctx.push(Frame::ResponseEnd { epoch }).await?;
        self.in_flight = None;
        info!(epoch, deltas, "response generated");
        Ok(())
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
        match frame {
            Frame::ContextUpdated => self.respond(ctx).await,
            other => ctx.push(other).await,
        }
    }

    async fn on_interruption(&mut self, _ctx: &StageContext) -> Result<(), StageError> {
        self.in_flight = None;
        Ok(())
    }

    /// Finishes the failed response with the fallback line, so the caller
    /// hears something and the context stays consistent.
    async fn recover(&mut self, _error: &StageError, ctx: &StageContext) -> Result<(), StageError> {
        let Some(epoch) = self.in_flight.take() else {
            return Ok(());
        };
        if ctx.tracker().is_stale(epoch) {
            return Ok(());
        }
        ctx.push(Frame::ResponseText {
            epoch,
            text: self.fallback.clone(),
        })
        .await?;
        ctx.push(Frame::ResponseEnd { epoch }).await
    }

    fn observes_interruptions(&self) -> bool {
        true
    }
}
