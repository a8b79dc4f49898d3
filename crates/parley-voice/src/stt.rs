use crate::config::WhisperConfig;
use crate::error::VoiceError;
use crate::wav::encode_wav;
use async_trait::async_trait;
use parley_pipeline::SpeechRecognizer;
use parley_types::audio::resample_linear;
use parley_types::{AudioChunk, ServiceError, Transcript};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Rate whisper.cpp models are trained on.
const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Maximum audio input size for STT (10 MiB).
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for STT process execution.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Recognizer backed by the whisper.cpp command line tool.
///
/// Caller audio is buffered into fixed windows; each full window that is
/// not silent is transcribed in one subprocess call and reported as a
/// final transcript.
#[derive(Debug)]
pub struct WhisperRecognizer {
    config: WhisperConfig,
    buffer: Vec<i16>,
    sample_rate: u32,
}

impl WhisperRecognizer {
    pub fn new(config: WhisperConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            sample_rate: 0,
        }
    }

    fn window_len(&self) -> usize {
        (u64::from(self.sample_rate) * self.config.window_ms.max(1) / 1000) as usize
    }

    /// Transcribes one block of mono PCM16 audio.
    pub async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String, VoiceError> {
        let samples = resample_linear(samples, sample_rate, WHISPER_SAMPLE_RATE);
        let wav = encode_wav(&samples, WHISPER_SAMPLE_RATE)?;
        if wav.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                wav.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.config.binary_path);
        command
            .arg("-m")
            .arg(&self.config.model_path)
            .arg("-l")
            .arg(&self.config.language)
            .arg("-nt")
            .arg("-np")
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("Failed to open stdin".to_string()))?;
        let write_task = tokio::spawn(async move { stdin.write_all(&wav).await });

        let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Stt(format!(
                    "STT process timed out after {} seconds",
                    STT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Stt(format!("Failed to write to stdin: {}", e)))
            }
            Err(e) => return Err(VoiceError::Stt(format!("Stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr)));
        }

        Ok(clean_transcript(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn recognize(&mut self, chunk: &AudioChunk) -> Result<Vec<Transcript>, ServiceError> {
        if self.buffer.is_empty() {
            self.sample_rate = chunk.sample_rate;
        }
        let samples = chunk.samples();
        if chunk.sample_rate == self.sample_rate {
            self.buffer.extend_from_slice(&samples);
        } else {
            self.buffer.extend(resample_linear(
                &samples,
                chunk.sample_rate,
                self.sample_rate,
            ));
        }

        if self.buffer.len() < self.window_len() {
            return Ok(Vec::new());
        }

        let window = std::mem::take(&mut self.buffer);
        let peak = window.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        if peak < self.config.silence_threshold.unsigned_abs() {
            debug!(peak, "skipping silent window");
            return Ok(Vec::new());
        }

        let text = self.transcribe(&window, self.sample_rate).await?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Transcript::final_text(text)])
    }
}

/// Strips whisper annotations such as `[BLANK_AUDIO]` or `(music)` and
/// collapses whitespace.
pub fn clean_transcript(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(ch),
            _ => {}
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
