//! Shared types and error definitions for the Parley voice bridge.
//!
//! This crate holds the data model every other crate agrees on: audio
//! chunks, session identity, conversation turns, pipeline parameters and
//! the error type returned by external speech/AI services.
//!
//! No crate in the workspace depends on anything *except* `parley-types`
//! for cross-cutting type definitions, which keeps the dependency graph
//! acyclic.

pub mod audio;
pub mod error;
pub mod params;

pub use audio::AudioChunk;
pub use error::ServiceError;
pub use params::{InterruptionPolicy, PipelineParams};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one telephony media stream.
///
/// Established from the first `start` envelope of a session and immutable
/// afterwards. Used to tag outbound frames and to correlate log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// Provider stream identifier. Unique per active session.
    pub stream_id: String,
    /// Provider call identifier, when the provider sent one.
    pub call_id: Option<String>,
}

impl SessionIdentity {
    pub fn new(stream_id: impl Into<String>, call_id: Option<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            call_id,
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.call_id {
            Some(call_id) => write!(f, "{} (call {})", self.stream_id, call_id),
            None => f.write_str(&self.stream_id),
        }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions to the language model.
    System,
    /// The caller.
    User,
    /// The voice bot.
    Assistant,
}

impl Role {
    /// Returns the wire label used by chat-completion APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One utterance in the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A transcript fragment produced by a speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Recognized text.
    pub text: String,
    /// Whether the recognizer will not revise this fragment any further.
    pub is_final: bool,
}

impl Transcript {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    /// Number of whitespace-separated words in the fragment.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn identity_display_includes_call_id() {
        let identity = SessionIdentity::new("S1", Some("C1".to_string()));
        assert_eq!(identity.to_string(), "S1 (call C1)");
        assert_eq!(SessionIdentity::new("S2", None).to_string(), "S2");
    }

    #[test]
    fn transcript_word_count_ignores_extra_whitespace() {
        assert_eq!(Transcript::final_text("  hello   there ").word_count(), 2);
        assert_eq!(Transcript::interim("").word_count(), 0);
    }
}
