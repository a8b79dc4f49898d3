use crate::config::PiperConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use parley_pipeline::SpeechSynthesizer;
use parley_types::audio::resample_linear;
use parley_types::{AudioChunk, ServiceError};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Maximum text input size for TTS (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for TTS process execution.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Output is cut into chunks of this many milliseconds.
const CHUNK_MS: u32 = 20;

/// Synthesizer backed by the piper command line tool.
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    config: PiperConfig,
    voice: String,
}

impl PiperSynthesizer {
    pub fn new(config: PiperConfig) -> Self {
        let voice = config.default_voice.clone();
        Self { config, voice }
    }

    /// Selects the voice model. Voices without a model file in the voices
    /// directory fall back to the configured default.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn model_path(&self) -> PathBuf {
        let selected = self.config.voices_dir.join(format!("{}.onnx", self.voice));
        if selected.exists() {
            return selected;
        }
        self.config
            .voices_dir
            .join(format!("{}.onnx", self.config.default_voice))
    }

    /// Renders `text` to raw PCM16LE at the model's native rate.
    pub async fn render(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let model_path = self.model_path();
        if !model_path.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        let speed = self.config.speed;
        if !(0.1..=10.0).contains(&speed) {
            return Err(VoiceError::Config(
                "Speed must be between 0.1 and 10.0".to_string(),
            ));
        }

        let mut command = Command::new(&self.config.binary_path);
        command
            .arg("--model")
            .arg(model_path)
            .arg("--output_raw")
            // Piper stretches duration, so speed maps to its inverse.
            .arg("--length_scale")
            .arg((1.0 / speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;
        let text_owned = format!("{}\n", text);
        let write_task = tokio::spawn(async move { stdin.write_all(text_owned.as_bytes()).await });

        let output = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "TTS process timed out after {} seconds",
                    TTS_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for piper: {}", e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Tts(format!(
                    "Failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("Piper failed: {}", stderr)));
        }

        Ok(output.stdout)
    }
}

/// Splits PCM16 samples into fixed-length chunks at `sample_rate`.
pub fn chunk_samples(samples: &[i16], sample_rate: u32) -> Vec<AudioChunk> {
    let per_chunk = (sample_rate * CHUNK_MS / 1000).max(1) as usize;
    samples
        .chunks(per_chunk)
        .enumerate()
        .map(|(index, part)| AudioChunk::from_samples(part, sample_rate, index as u64))
        .collect()
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        sample_rate: u32,
        audio: mpsc::Sender<AudioChunk>,
    ) -> Result<(), ServiceError> {
        let raw = self.render(text).await?;
        let native = AudioChunk::new(raw, self.config.native_sample_rate, 1, 0);
        let samples = resample_linear(
            &native.samples(),
            self.config.native_sample_rate,
            sample_rate,
        );

        for chunk in chunk_samples(&samples, sample_rate) {
            if audio.send(chunk).await.is_err() {
                // Receiver gone: the response was interrupted.
                break;
            }
        }
        Ok(())
    }
}
