use parley_types::ServiceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl From<VoiceError> for ServiceError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Config(msg) => ServiceError::Unavailable(msg),
            VoiceError::Http(e) if e.is_connect() => ServiceError::Unavailable(e.to_string()),
            VoiceError::Http(e) if e.is_timeout() => ServiceError::Failed(format!("request timed out: {e}")),
            other => ServiceError::Failed(other.to_string()),
        }
    }
}
