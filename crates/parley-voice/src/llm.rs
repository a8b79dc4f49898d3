use crate::config::ChatModelConfig;
use crate::error::VoiceError;
use crate::sse::{SseEvent, SseParser};
use async_trait::async_trait;
use futures_util::StreamExt;
use parley_pipeline::LanguageModel;
use parley_types::{ServiceError, Turn};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// Streaming client for OpenAI-compatible chat completion APIs.
#[derive(Debug, Clone)]
pub struct ChatCompletionsModel {
    client: reqwest::Client,
    config: ChatModelConfig,
}

impl ChatCompletionsModel {
    pub fn new(config: ChatModelConfig) -> Result<Self, VoiceError> {
        if config.base_url.trim().is_empty() {
            return Err(VoiceError::Config("chat model base_url is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ChatModelConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Request body for `turns`.
    pub fn request_body(&self, turns: &[Turn]) -> Value {
        let messages: Vec<Value> = turns
            .iter()
            .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content }))
            .collect();
        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        })
    }

    /// Streams the completion for `turns` into `deltas`. Stops early,
    /// without error, if the receiver goes away.
    pub async fn stream(
        &self,
        turns: &[Turn],
        deltas: &mpsc::Sender<String>,
    ) -> Result<usize, VoiceError> {
        let mut request = self.client.post(self.endpoint()).json(&self.request_body(turns));
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Llm(format!("{}: {}", status, body.trim())));
        }

        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();
        let mut sent = 0usize;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in parser.push(&chunk) {
                match event {
                    SseEvent::Delta(text) => {
                        if deltas.send(text).await.is_err() {
                            return Ok(sent);
                        }
                        sent += 1;
                    }
                    SseEvent::Done => return Ok(sent),
                }
            }
        }

        if let Some(SseEvent::Delta(text)) = parser.finish() {
            if deltas.send(text).await.is_ok() {
                sent += 1;
            }
        }
        Ok(sent)
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    async fn complete(
        &self,
        turns: &[Turn],
        deltas: mpsc::Sender<String>,
    ) -> Result<(), ServiceError> {
        let sent = self.stream(turns, &deltas).await?;
        debug!(model = %self.config.model, deltas = sent, "completion streamed");
        Ok(())
    }
}
