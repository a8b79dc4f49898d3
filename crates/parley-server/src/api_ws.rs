//! Media WebSocket: one telephony call per connection.
//!
//! The socket is adapted to the transport's [`WireMessage`] stream/sink,
//! a pipeline is assembled from the services the [`ServiceFactory`]
//! provides, and the transport and session runner are driven side by side
//! until the call ends.

use crate::config::Config;
use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    Extension,
};
use futures_util::{future, SinkExt, StreamExt};
use parley_pipeline::{
    ConversationContext, Frame, LanguageModel, Pipeline, SessionHooks, SessionRunner,
    SessionTask, SessionTaskHandle, SpeechRecognizer, SpeechSynthesizer,
};
use parley_transport::{DisconnectReason, TransportError, WebsocketTransport, WireMessage};
use parley_types::{Role, ServiceError, SessionIdentity};
use parley_voice::{ChatCompletionsModel, PiperSynthesizer, WhisperRecognizer};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// The speech and language services for one call.
pub struct SessionServices {
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub language_model: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Builds the services for each new call from the configuration snapshot
/// the call started with.
pub trait ServiceFactory: Send + Sync {
    fn create(&self, config: &Config) -> Result<SessionServices, ServiceError>;
}

/// whisper.cpp, piper and an OpenAI-compatible chat endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalServices;

impl ServiceFactory for LocalServices {
    fn create(&self, config: &Config) -> Result<SessionServices, ServiceError> {
        let services = &config.services;
        let language_model = ChatCompletionsModel::new(services.chat.clone())?;
        Ok(SessionServices {
            recognizer: Box::new(WhisperRecognizer::new(services.whisper.clone())),
            language_model: Arc::new(language_model),
            synthesizer: Arc::new(
                PiperSynthesizer::new(services.piper.clone()).with_voice(config.ai.voice_id.clone()),
            ),
        })
    }
}

/// Session hooks for a phone call: the bot greets the caller as soon as
/// the stream is up.
struct CallHooks {
    context: Arc<ConversationContext>,
    intro_prompt: String,
}

#[async_trait]
impl SessionHooks for CallHooks {
    async fn on_client_connected(&self, task: &SessionTaskHandle, identity: &SessionIdentity) {
        tracing::info!(
            stream_id = %identity.stream_id,
            call_id = identity.call_id.as_deref().unwrap_or("-"),
            "caller connected"
        );
        if self.intro_prompt.trim().is_empty() {
            return;
        }
        self.context.append(Role::System, &self.intro_prompt);
        if let Err(e) = task.enqueue(Frame::ContextUpdated).await {
            tracing::warn!(error = %e, "failed to queue greeting");
        }
    }

    async fn on_client_disconnected(&self, task: &SessionTaskHandle, reason: &DisconnectReason) {
        tracing::info!(?reason, "caller disconnected");
        if !reason.is_graceful() {
            task.cancel();
        }
    }
}

/// Handler for `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let connection_id = Uuid::new_v4();
        handle_socket(socket, state).instrument(tracing::info_span!("call", %connection_id))
    })
}

fn to_wire(message: Result<Message, axum::Error>) -> Option<Result<WireMessage, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(WireMessage::Text(text.to_string()))),
        Ok(Message::Binary(bytes)) => Some(Ok(WireMessage::Binary(bytes.to_vec()))),
        Ok(Message::Close(_)) => Some(Ok(WireMessage::Close)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
    }
}

fn from_wire(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text.into()),
        WireMessage::Binary(bytes) => Message::Binary(bytes.into()),
        WireMessage::Close => Message::Close(None),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let config = state.config.snapshot();

    let services = match state.services.create(&config) {
        Ok(services) => services,
        Err(e) => {
            tracing::error!(error = %e, "speech services unavailable, dropping call");
            return;
        }
    };

    let (transport, channels, events) = WebsocketTransport::new(config.transport_params());
    let transport_cancel = transport.cancel_token();

    let context = Arc::new(ConversationContext::new(config.ai.system_prompt.clone()));
    let pipeline = match Pipeline::builder()
        .transport_input(channels.audio_in)
        .transport_output(channels.audio_out)
        .recognizer(services.recognizer)
        .language_model(services.language_model)
        .synthesizer(services.synthesizer)
        .context(context.clone())
        .fallback_response(config.ai.fallback_response.clone())
        .build()
    {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble pipeline");
            return;
        }
    };

    let task = SessionTask::new(pipeline, config.pipeline_params());
    let hooks = CallHooks {
        context,
        intro_prompt: config.ai.intro_prompt.clone(),
    };
    let mut runner = SessionRunner::new().with_transport_cancel(transport_cancel);
    if let Some(limit) = config.max_call_duration() {
        runner = runner.with_max_duration(limit);
    }

    let (sink, stream) = socket.split();
    let inbound = stream.filter_map(|message| future::ready(to_wire(message)));
    let outbound = sink
        .sink_map_err(|e| TransportError::Socket(e.to_string()))
        .with(|message: WireMessage| future::ready(Ok::<_, TransportError>(from_wire(message))));

    let (summary, report) = tokio::join!(
        transport.run(inbound, outbound),
        runner.run(task, events, &hooks)
    );

    tracing::info!(
        reason = ?summary.reason,
        chunks_in = summary.chunks_forwarded,
        messages_out = summary.messages_written,
        abandoned = summary.abandoned,
        timed_out = report.timed_out,
        "call finished"
    );
}
