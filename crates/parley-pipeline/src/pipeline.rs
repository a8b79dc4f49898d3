use crate::aggregator::{AssistantAggregator, UserAggregator};
use crate::context::ConversationContext;
use crate::error::PipelineError;
use crate::input::InputAdapter;
use crate::llm::LlmStage;
use crate::output::OutputAdapter;
use crate::recognizer::RecognizerStage;
use crate::services::{LanguageModel, SpeechRecognizer, SpeechSynthesizer};
use crate::stage::Stage;
use crate::synthesizer::SynthesizerStage;
use parley_transport::Outbound;
use parley_types::AudioChunk;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default capacity of each inter-stage queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// An assembled, not yet running, stage chain.
pub struct Pipeline {
    pub(crate) stages: Vec<Box<dyn Stage>>,
    pub(crate) input: mpsc::Receiver<AudioChunk>,
    pub(crate) queue_capacity: usize,
    context: Arc<ConversationContext>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Stage names from head to tail.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn context(&self) -> &Arc<ConversationContext> {
        &self.context
    }
}

/// Assembles the fixed conversation chain. Every component is required.
#[derive(Default)]
pub struct PipelineBuilder {
    input: Option<mpsc::Receiver<AudioChunk>>,
    output: Option<mpsc::Sender<Outbound>>,
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    model: Option<Arc<dyn LanguageModel>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    context: Option<Arc<ConversationContext>>,
    fallback: Option<String>,
    queue_capacity: Option<usize>,
}

impl PipelineBuilder {
    /// Caller audio decoded by the transport.
    pub fn transport_input(mut self, input: mpsc::Receiver<AudioChunk>) -> Self {
        self.input = Some(input);
        self
    }

    /// Where synthesized audio and playback control go.
    pub fn transport_output(mut self, output: mpsc::Sender<Outbound>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn recognizer(mut self, recognizer: Box<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn context(mut self, context: Arc<ConversationContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Line spoken when the language model fails.
    pub fn fallback_response(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let input = self.input.ok_or(PipelineError::MissingStage("input"))?;
        let output = self.output.ok_or(PipelineError::MissingStage("output"))?;
        let recognizer = self
            .recognizer
            .ok_or(PipelineError::MissingStage("recognizer"))?;
        let model = self.model.ok_or(PipelineError::MissingStage("llm"))?;
        let synthesizer = self
            .synthesizer
            .ok_or(PipelineError::MissingStage("synthesizer"))?;
        let context = self
            .context
            .ok_or(PipelineError::MissingStage("context"))?;

        let mut llm = LlmStage::new(model, Arc::clone(&context));
        if let Some(fallback) = self.fallback {
            llm = llm.with_fallback(fallback);
        }

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(InputAdapter::new()),
            Box::new(RecognizerStage::new(recognizer)),
            Box::new(UserAggregator::new(Arc::clone(&context))),
            Box::new(llm),
            Box::new(SynthesizerStage::new(synthesizer)),
            Box::new(OutputAdapter::new(output)),
            Box::new(AssistantAggregator::new(Arc::clone(&context))),
        ];

        Ok(Pipeline {
            stages,
            input,
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            context,
        })
    }
}
