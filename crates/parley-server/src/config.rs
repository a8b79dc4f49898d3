//! Server configuration loading from file and environment variables.

use parley_transport::{CodecConfig, MediaEncoding, TransportParams};
use parley_types::{InterruptionPolicy, PipelineParams};
use parley_voice::{ChatModelConfig, PiperConfig, WhisperConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Sample rates the telephony provider can stream at.
pub const SUPPORTED_AUDIO_QUALITIES: [u32; 2] = [8000, 16000];

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly elementary teacher in India having an audio call. Your output will be converted to audio so don't include special characters in your answers. Respond to what the student said in a short sentence. Be encouraging and educational. Speak clearly and simply.";

pub const DEFAULT_INTRO_PROMPT: &str = "Please introduce yourself to the caller as a friendly AI teacher from India. Say hello and ask how you can help them learn today.";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Conversation settings exposed through the settings API.
    #[serde(default)]
    pub ai: AiConfig,

    /// Call defaults exposed through the settings API.
    #[serde(default)]
    pub call: CallConfig,

    /// Per-session pipeline behavior.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Speech and language service adapters.
    #[serde(default)]
    pub services: ServicesConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host name the telephony provider reaches this server at. Used to
    /// build the `wss://` stream URL handed out by `/answer`.
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_pipeline=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// System turn appended when a call connects so the bot speaks first.
    /// Empty disables the greeting.
    #[serde(default = "default_intro_prompt")]
    pub intro_prompt: String,

    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    /// Telephony sample rate in Hz, 8000 or 16000.
    #[serde(default = "default_audio_quality")]
    pub audio_quality: u32,

    /// Spoken when the language model fails or times out.
    #[serde(default = "default_fallback_response")]
    pub fallback_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    #[serde(default = "default_caller_id")]
    pub default_caller_id: String,

    #[serde(default = "default_target_number")]
    pub default_target_number: String,

    /// Seconds.
    #[serde(default = "default_auto_answer_delay")]
    pub auto_answer_delay: u64,

    /// Seconds before an active call is torn down. Zero means no limit.
    #[serde(default = "default_max_call_duration")]
    pub max_call_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub allow_interruptions: bool,

    #[serde(default)]
    pub interruption_policy: InterruptionPolicy,

    #[serde(default = "default_service_timeout_ms")]
    pub service_timeout_ms: u64,

    /// Upper bound on flushing queued audio after the caller hangs up.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,

    /// Send synthesized audio at playback speed instead of as fast as it
    /// is produced.
    #[serde(default = "default_true")]
    pub pace_output: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub whisper: WhisperConfig,

    #[serde(default)]
    pub piper: PiperConfig,

    #[serde(default)]
    pub chat: ChatModelConfig,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    8765
}

fn default_public_host() -> String {
    "localhost:8765".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_intro_prompt() -> String {
    DEFAULT_INTRO_PROMPT.to_string()
}

fn default_voice_id() -> String {
    "71a7ad14-091c-4e8e-a314-022ece01c121".to_string()
}

fn default_audio_quality() -> u32 {
    8000
}

fn default_fallback_response() -> String {
    parley_pipeline::llm::DEFAULT_FALLBACK_RESPONSE.to_string()
}

fn default_caller_id() -> String {
    "+912269976211".to_string()
}

fn default_target_number() -> String {
    "+919136820958".to_string()
}

fn default_auto_answer_delay() -> u64 {
    2
}

fn default_max_call_duration() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_service_timeout_ms() -> u64 {
    30_000
}

fn default_close_grace_ms() -> u64 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: default_public_host(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            intro_prompt: default_intro_prompt(),
            voice_id: default_voice_id(),
            audio_quality: default_audio_quality(),
            fallback_response: default_fallback_response(),
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            default_caller_id: default_caller_id(),
            default_target_number: default_target_number(),
            auto_answer_delay: default_auto_answer_delay(),
            max_call_duration: default_max_call_duration(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            interruption_policy: InterruptionPolicy::default(),
            service_timeout_ms: default_service_timeout_ms(),
            close_grace_ms: default_close_grace_ms(),
            pace_output: true,
        }
    }
}

impl Config {
    /// Parameters for one session's pipeline. Both directions run at the
    /// configured telephony rate.
    pub fn pipeline_params(&self) -> PipelineParams {
        PipelineParams {
            audio_in_sample_rate: self.ai.audio_quality,
            audio_out_sample_rate: self.ai.audio_quality,
            allow_interruptions: self.pipeline.allow_interruptions,
            interruption_policy: self.pipeline.interruption_policy,
            service_timeout: Duration::from_millis(self.pipeline.service_timeout_ms),
            pace_output: self.pipeline.pace_output,
        }
    }

    pub fn transport_params(&self) -> TransportParams {
        TransportParams {
            codec: CodecConfig {
                encoding: MediaEncoding::Mulaw,
                sample_rate: self.ai.audio_quality,
            },
            close_grace: Duration::from_millis(self.pipeline.close_grace_ms),
            ..TransportParams::default()
        }
    }

    /// Call duration limit, if any.
    pub fn max_call_duration(&self) -> Option<Duration> {
        match self.call.max_call_duration {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_PUBLIC_HOST` overrides `server.public_host`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `OPENAI_API_KEY` sets `services.chat.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment overrides read through `var`. Unparseable values
/// are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(public_host) = var("PARLEY_PUBLIC_HOST") {
        if !public_host.trim().is_empty() {
            config.server.public_host = public_host.trim().to_string();
        }
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("OPENAI_API_KEY") {
        config.services.chat.api_key = key;
    }
}

/// Fields the settings API may change. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsUpdate {
    pub system_prompt: Option<String>,
    pub voice_id: Option<String>,
    pub audio_quality: Option<u32>,
    pub default_caller_id: Option<String>,
    pub default_target_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("unsupported audio_quality {0}, expected 8000 or 16000")]
    AudioQuality(u32),
}

impl SettingsUpdate {
    fn validate(&self) -> Result<(), SettingsError> {
        let text_fields = [
            ("system_prompt", &self.system_prompt),
            ("voice_id", &self.voice_id),
            ("default_caller_id", &self.default_caller_id),
            ("default_target_number", &self.default_target_number),
        ];
        for (name, value) in text_fields {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(SettingsError::Empty(name));
            }
        }
        if let Some(quality) = self.audio_quality {
            if !SUPPORTED_AUDIO_QUALITIES.contains(&quality) {
                return Err(SettingsError::AudioQuality(quality));
            }
        }
        Ok(())
    }

    fn apply(self, config: &mut Config) {
        if let Some(prompt) = self.system_prompt {
            config.ai.system_prompt = prompt;
        }
        if let Some(voice) = self.voice_id {
            config.ai.voice_id = voice;
        }
        if let Some(quality) = self.audio_quality {
            config.ai.audio_quality = quality;
        }
        if let Some(caller) = self.default_caller_id {
            config.call.default_caller_id = caller;
        }
        if let Some(target) = self.default_target_number {
            config.call.default_target_number = target;
        }
    }
}

/// Holds the current configuration snapshot.
///
/// Sessions take a snapshot when they start; settings updates swap in a new
/// snapshot and never mutate one already handed out.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates `update` and installs the resulting snapshot.
    pub fn update(&self, update: SettingsUpdate) -> Result<Arc<Config>, SettingsError> {
        update.validate()?;
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Config::clone(&current);
        update.apply(&mut next);
        let next = Arc::new(next);
        *current = next.clone();
        Ok(next)
    }
}
