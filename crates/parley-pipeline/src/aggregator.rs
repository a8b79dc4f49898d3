//! Stages that write the conversation context.
//!
//! [`UserAggregator`] turns final transcripts into user turns and decides
//! when caller speech interrupts the assistant. Speech that does not
//! interrupt is held until the reply it overlapped has been recorded, so
//! turns keep the order they happened in. [`AssistantAggregator`] sits at
//! the tail, records what the assistant actually said and closes the
//! response.

use crate::context::ConversationContext;
use crate::error::StageError;
use crate::frame::Frame;
use crate::stage::{Stage, StageContext};
use async_trait::async_trait;
use parley_types::{Role, Transcript};
use std::sync::Arc;
use tracing::{debug, info};

pub struct UserAggregator {
    context: Arc<ConversationContext>,
}

impl UserAggregator {
    pub fn new(context: Arc<ConversationContext>) -> Self {
        Self { context }
    }

    fn maybe_interrupt(&self, transcript: &Transcript, ctx: &StageContext) {
        let params = ctx.params();
        if !params.allow_interruptions || !ctx.tracker().is_responding() {
            return;
        }
        if !params
            .interruption_policy
            .triggers(&transcript.text, transcript.is_final)
        {
            return;
        }
        if let Some(epoch) = ctx.tracker().interrupt() {
            self.context.seal_assistant(epoch);
            info!(epoch, "caller interrupted the assistant");
        }
    }
}

#[async_trait]
impl Stage for UserAggregator {
    fn name(&self) -> &'static str {
        "user_aggregator"
    }

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
        let transcript = match frame {
            Frame::Transcript(transcript) => transcript,
            other => return ctx.push(other).await,
        };

        self.maybe_interrupt(&transcript, ctx);

        if !transcript.is_final || transcript.text.trim().is_empty() {
            return Ok(());
        }
        if ctx.tracker().is_responding() {
            debug!("holding caller turn until the reply is recorded");
            ctx.tracker().wait_idle().await;
        }
        if self.context.append(Role::User, &transcript.text) {
            ctx.push(Frame::ContextUpdated).await?;
        }
        Ok(())
    }
}

pub struct AssistantAggregator {
    context: Arc<ConversationContext>,
}

impl AssistantAggregator {
    pub fn new(context: Arc<ConversationContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Stage for AssistantAggregator {
    fn name(&self) -> &'static str {
        "assistant_aggregator"
    }

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
        match &frame {
            Frame::ResponseStart { epoch } => self.context.begin_assistant(*epoch),
            Frame::SpokenText { epoch, text } => self.context.extend_assistant(*epoch, text),
            Frame::ResponseEnd { epoch } => {
                self.context.commit_assistant(*epoch);
                ctx.tracker().finish_response(*epoch);
            }
            _ => {}
        }
        ctx.push(frame).await
    }

    fn observes_interruptions(&self) -> bool {
        true
    }
}
