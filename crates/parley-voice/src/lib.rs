//! Concrete speech and language services for Parley.
//!
//! Each adapter implements one of the pipeline's service traits:
//!
//! - [`WhisperRecognizer`]: whisper.cpp run as a subprocess over fixed
//!   windows of caller audio.
//! - [`PiperSynthesizer`]: piper run as a subprocess producing raw PCM,
//!   resampled and cut into 20 ms chunks.
//! - [`ChatCompletionsModel`]: any OpenAI-compatible `/chat/completions`
//!   endpoint, streamed over server-sent events.
//!
//! The voice catalog offered to the settings API lives in [`voices`].

pub mod config;
pub mod error;
pub mod llm;
pub mod sse;
pub mod stt;
pub mod tts;
pub mod voices;
pub mod wav;

pub use config::{ChatModelConfig, PiperConfig, WhisperConfig};
pub use error::VoiceError;
pub use llm::ChatCompletionsModel;
pub use stt::WhisperRecognizer;
pub use tts::PiperSynthesizer;
pub use voices::{VoiceInfo, VOICE_CATALOG};
