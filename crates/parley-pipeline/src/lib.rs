//! Real-time conversation pipeline.
//!
//! A session is a fixed chain of stages, each running as its own tokio
//! task and connected to the next by a bounded queue:
//!
//! ```text
//! input → recognizer → user aggregator → language model
//!       → synthesizer → output → assistant aggregator
//! ```
//!
//! Caller audio enters at the head, transcripts become user turns in the
//! shared [`ConversationContext`], the model's streamed reply is spoken
//! sentence by sentence, and the audio actually played is written back
//! into the context as the assistant turn.
//!
//! Interruptions are tracked by [`TurnTracker`] epochs: every assistant
//! frame carries the epoch it was produced in, and bumping the epoch makes
//! all in-flight assistant work stale.

pub mod aggregator;
pub mod context;
pub mod error;
pub mod frame;
pub mod input;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod recognizer;
pub mod runner;
pub mod services;
pub mod stage;
pub mod synthesizer;
pub mod task;
pub mod tracker;

pub use context::ConversationContext;
pub use error::{PipelineError, StageError};
pub use frame::Frame;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use runner::{SessionHooks, SessionReport, SessionRunner};
pub use services::{LanguageModel, SpeechRecognizer, SpeechSynthesizer};
pub use stage::{Stage, StageContext};
pub use task::{SessionTask, SessionTaskHandle, TaskOutcome};
pub use tracker::TurnTracker;
