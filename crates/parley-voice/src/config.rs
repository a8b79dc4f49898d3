use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

fn default_whisper_binary() -> PathBuf {
    PathBuf::from("whisper-cli")
}

fn default_whisper_model() -> PathBuf {
    PathBuf::from("models/ggml-base.en.bin")
}

fn default_language() -> String {
    "en".to_string()
}

fn default_window_ms() -> u64 {
    3000
}

fn default_silence_threshold() -> i16 {
    500
}

/// Settings for the whisper.cpp recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhisperConfig {
    #[serde(default = "default_whisper_binary")]
    pub binary_path: PathBuf,
    #[serde(default = "default_whisper_model")]
    pub model_path: PathBuf,
    #[serde(default = "default_language")]
    pub language: String,
    /// Caller audio is transcribed in windows of this length.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Windows whose peak amplitude stays below this are not transcribed.
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: i16,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary_path: default_whisper_binary(),
            model_path: default_whisper_model(),
            language: default_language(),
            window_ms: default_window_ms(),
            silence_threshold: default_silence_threshold(),
        }
    }
}

fn default_piper_binary() -> PathBuf {
    PathBuf::from("piper")
}

fn default_voices_dir() -> PathBuf {
    PathBuf::from("assets/voices")
}

fn default_piper_voice() -> String {
    "en_GB-alba-medium".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_native_sample_rate() -> u32 {
    22050
}

/// Settings for the piper synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiperConfig {
    #[serde(default = "default_piper_binary")]
    pub binary_path: PathBuf,
    /// Directory holding `<voice>.onnx` models.
    #[serde(default = "default_voices_dir")]
    pub voices_dir: PathBuf,
    /// Model used when the selected voice has no model file.
    #[serde(default = "default_piper_voice")]
    pub default_voice: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Rate piper writes raw audio at for the installed models.
    #[serde(default = "default_native_sample_rate")]
    pub native_sample_rate: u32,
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            binary_path: default_piper_binary(),
            voices_dir: default_voices_dir(),
            default_voice: default_piper_voice(),
            speed: default_speed(),
            native_sample_rate: default_native_sample_rate(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Settings for an OpenAI-compatible chat completions endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ChatModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ChatModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for ChatModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatModelConfig")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &if self.api_key.is_empty() { "" } else { "[REDACTED]" },
            )
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
