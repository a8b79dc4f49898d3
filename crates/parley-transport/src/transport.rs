//! WebSocket session transport.
//!
//! One [`WebsocketTransport`] owns one provider media stream. It reads
//! inbound wire messages, decodes them with the session's [`PlivoCodec`],
//! forwards caller audio into the pipeline, and writes pipeline output
//! back to the socket. Lifecycle changes are published on a `watch`
//! channel and raised as [`TransportEvent`]s for the session runner.

use crate::codec::{CodecConfig, PlivoCodec, StartEvent, WireEnvelope};
use crate::error::TransportError;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parley_types::{AudioChunk, SessionIdentity};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on the `Closing → Closed` transition.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A socket message, independent of the WebSocket library in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Work the pipeline hands back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Synthesized audio at the negotiated output rate.
    Audio(AudioChunk),
    /// Drop whatever the provider has buffered but not yet played.
    Clear,
}

/// Transport lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportState {
    Idle,
    AwaitingStart,
    Streaming,
    Closing,
    Closed,
}

/// Why a session left `Streaming` (or never reached it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The provider sent a `stop` envelope.
    Stop,
    /// The socket closed without a `stop`.
    RemoteClosed,
    /// The session was cancelled locally.
    Cancelled,
    /// No usable session identity could be established.
    StartFailed(String),
    /// The socket failed.
    Error(String),
}

impl DisconnectReason {
    /// The caller hung up normally. Audio already received may still be
    /// worth draining through the pipeline.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Stop | Self::RemoteClosed)
    }
}

/// Lifecycle notifications consumed by the session runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(SessionIdentity),
    Disconnected(DisconnectReason),
}

#[derive(Debug, Clone)]
pub struct TransportParams {
    /// Format assumed until the provider announces one in `start`.
    pub codec: CodecConfig,
    /// Upper bound on flushing queued output once the session closes.
    pub close_grace: Duration,
    /// Capacity of the caller-audio channel into the pipeline.
    pub input_capacity: usize,
    /// Capacity of the output channel from the pipeline.
    pub output_capacity: usize,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            close_grace: DEFAULT_CLOSE_GRACE,
            input_capacity: 256,
            output_capacity: 256,
        }
    }
}

/// Pipeline-facing ends of the transport's channels.
#[derive(Debug)]
pub struct TransportChannels {
    /// Decoded caller audio, in arrival order. Closes when the session ends.
    pub audio_in: mpsc::Receiver<AudioChunk>,
    /// Output for the socket.
    pub audio_out: mpsc::Sender<Outbound>,
}

/// What happened during one session, returned by [`WebsocketTransport::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSummary {
    pub identity: Option<SessionIdentity>,
    pub reason: DisconnectReason,
    /// States visited, in order.
    pub states: Vec<TransportState>,
    pub chunks_forwarded: u64,
    pub messages_written: u64,
    /// Outbound messages dropped because the close grace ran out or no
    /// identity was available to tag them with.
    pub abandoned: usize,
}

pub struct WebsocketTransport {
    params: TransportParams,
    codec: PlivoCodec,
    state: watch::Sender<TransportState>,
    states: Vec<TransportState>,
    audio_in: Option<mpsc::Sender<AudioChunk>>,
    audio_out: mpsc::Receiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
    identity: Option<SessionIdentity>,
    sequence: u64,
    chunks_forwarded: u64,
    messages_written: u64,
    abandoned: usize,
}

impl WebsocketTransport {
    /// Creates an idle transport along with the pipeline-facing channels
    /// and the lifecycle event stream.
    pub fn new(
        params: TransportParams,
    ) -> (
        Self,
        TransportChannels,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(params.input_capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel(params.output_capacity.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(TransportState::Idle);

        let transport = Self {
            codec: PlivoCodec::new(params.codec),
            params,
            state,
            states: vec![TransportState::Idle],
            audio_in: Some(in_tx),
            audio_out: out_rx,
            events: events_tx,
            cancel: CancellationToken::new(),
            identity: None,
            sequence: 0,
            chunks_forwarded: 0,
            messages_written: 0,
            abandoned: 0,
        };
        let channels = TransportChannels {
            audio_in: in_rx,
            audio_out: out_tx,
        };
        (transport, channels, events_rx)
    }

    /// Watches lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// Token that ends the session from outside when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drives the session to completion over the given socket halves.
    pub async fn run<I, O>(mut self, mut inbound: I, mut outbound: O) -> TransportSummary
    where
        I: Stream<Item = Result<WireMessage, TransportError>> + Unpin,
        O: Sink<WireMessage, Error = TransportError> + Unpin,
    {
        self.transition(TransportState::AwaitingStart);

        let reason = match self.await_start(&mut inbound).await {
            Ok(identity) => {
                info!(
                    stream_id = %identity.stream_id,
                    call_id = identity.call_id.as_deref().unwrap_or(""),
                    "media stream started"
                );
                self.identity = Some(identity.clone());
                self.transition(TransportState::Streaming);
                let _ = self.events.send(TransportEvent::Connected(identity.clone()));
                self.stream(&identity, &mut inbound, &mut outbound).await
            }
            Err(reason) => reason,
        };

        self.close(&mut outbound, reason).await
    }

    async fn await_start<I>(&mut self, inbound: &mut I) -> Result<SessionIdentity, DisconnectReason>
    where
        I: Stream<Item = Result<WireMessage, TransportError>> + Unpin,
    {
        let cancel = self.cancel.clone();
        let mut first = true;

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DisconnectReason::Cancelled),
                message = inbound.next() => message,
            };

            let text = match message {
                None | Some(Ok(WireMessage::Close)) => return Err(DisconnectReason::RemoteClosed),
                Some(Err(e)) => return Err(DisconnectReason::Error(e.to_string())),
                Some(Ok(WireMessage::Binary(bytes))) => {
                    warn!(bytes = bytes.len(), "binary media before start, dropping");
                    first = false;
                    continue;
                }
                Some(Ok(WireMessage::Text(text))) => text,
            };

            match self.codec.decode(&text, 0) {
                Ok(WireEnvelope::Start(start)) => return self.accept_start(start),
                Ok(WireEnvelope::Stop) => return Err(DisconnectReason::Stop),
                Ok(other) => warn!(kind = other.kind(), "envelope before start, dropping"),
                Err(e) if first => {
                    warn!(error = %e, "first message is not a valid envelope");
                    return Err(DisconnectReason::StartFailed(e.to_string()));
                }
                Err(e) => warn!(error = %e, "dropping malformed frame before start"),
            }
            first = false;
        }
    }

    fn accept_start(&mut self, start: StartEvent) -> Result<SessionIdentity, DisconnectReason> {
        let Some(stream_id) = start.stream_id else {
            let err = TransportError::SessionStart("start envelope has no streamId".to_string());
            warn!(error = %err, "rejecting session");
            return Err(DisconnectReason::StartFailed(err.to_string()));
        };

        let current = self.codec.config();
        let negotiated = CodecConfig {
            encoding: start.encoding.unwrap_or(current.encoding),
            sample_rate: start.sample_rate.unwrap_or(current.sample_rate),
        };
        if negotiated != current {
            debug!(
                encoding = negotiated.encoding.content_type(),
                sample_rate = negotiated.sample_rate,
                "provider announced media format"
            );
            self.codec = PlivoCodec::new(negotiated);
        }

        Ok(SessionIdentity::new(stream_id, start.call_id))
    }

    async fn stream<I, O>(
        &mut self,
        identity: &SessionIdentity,
        inbound: &mut I,
        outbound: &mut O,
    ) -> DisconnectReason
    where
        I: Stream<Item = Result<WireMessage, TransportError>> + Unpin,
        O: Sink<WireMessage, Error = TransportError> + Unpin,
    {
        let cancel = self.cancel.clone();
        let mut output_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return DisconnectReason::Cancelled,
                out = self.audio_out.recv(), if output_open => match out {
                    Some(out) => {
                        let written = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                self.abandoned += 1;
                                return DisconnectReason::Cancelled;
                            }
                            written = Self::write(&self.codec, identity, out, outbound) => written,
                        };
                        if let Err(e) = written {
                            warn!(stream_id = %identity.stream_id, error = %e, "socket write failed");
                            return DisconnectReason::Error(e.to_string());
                        }
                        self.messages_written += 1;
                    }
                    None => {
                        debug!(stream_id = %identity.stream_id, "pipeline output closed");
                        output_open = false;
                    }
                },
                message = inbound.next() => match message {
                    None | Some(Ok(WireMessage::Close)) => return DisconnectReason::RemoteClosed,
                    Some(Err(e)) => {
                        warn!(stream_id = %identity.stream_id, error = %e, "socket read failed");
                        return DisconnectReason::Error(e.to_string());
                    }
                    Some(Ok(WireMessage::Binary(bytes))) => {
                        let chunk = self.codec.decode_binary(&bytes, self.sequence);
                        if let Some(reason) = self.forward(chunk, &cancel).await {
                            return reason;
                        }
                    }
                    Some(Ok(WireMessage::Text(text))) => match self.codec.decode(&text, self.sequence) {
                        Ok(WireEnvelope::Media(chunk)) => {
                            if let Some(reason) = self.forward(chunk, &cancel).await {
                                return reason;
                            }
                        }
                        Ok(WireEnvelope::Stop) => {
                            info!(stream_id = %identity.stream_id, "media stream stopped");
                            return DisconnectReason::Stop;
                        }
                        Ok(WireEnvelope::Dtmf { digit }) => {
                            info!(stream_id = %identity.stream_id, digit = %digit, "dtmf received");
                        }
                        Ok(WireEnvelope::Start(_)) => {
                            warn!(stream_id = %identity.stream_id, "duplicate start ignored");
                        }
                        Ok(WireEnvelope::Other { event }) => {
                            debug!(stream_id = %identity.stream_id, event = %event, "provider event");
                        }
                        Err(e) => {
                            warn!(stream_id = %identity.stream_id, error = %e, "dropping malformed frame");
                        }
                    },
                },
            }
        }
    }

    /// Hands one caller chunk to the pipeline. Returns a reason only when
    /// the session was cancelled while waiting for queue space.
    async fn forward(
        &mut self,
        chunk: AudioChunk,
        cancel: &CancellationToken,
    ) -> Option<DisconnectReason> {
        self.sequence += 1;
        let Some(tx) = &self.audio_in else {
            return None;
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Some(DisconnectReason::Cancelled),
            sent = tx.send(chunk) => sent,
        };
        match sent {
            Ok(()) => self.chunks_forwarded += 1,
            Err(_) => {
                debug!("pipeline input closed, discarding caller audio");
                self.audio_in = None;
            }
        }
        None
    }

    async fn write<O>(
        codec: &PlivoCodec,
        identity: &SessionIdentity,
        out: Outbound,
        sink: &mut O,
    ) -> Result<(), TransportError>
    where
        O: Sink<WireMessage, Error = TransportError> + Unpin,
    {
        let text = match out {
            Outbound::Audio(chunk) => codec.encode(&chunk, identity),
            Outbound::Clear => codec.encode_clear(identity),
        };
        sink.send(WireMessage::Text(text)).await
    }

    async fn close<O>(&mut self, outbound: &mut O, reason: DisconnectReason) -> TransportSummary
    where
        O: Sink<WireMessage, Error = TransportError> + Unpin,
    {
        self.transition(TransportState::Closing);
        let _ = self.events.send(TransportEvent::Disconnected(reason.clone()));

        // Closing the input lets the pipeline drain and exit.
        self.audio_in = None;

        let codec = self.codec;
        let identity = self.identity.clone();
        let audio_out = &mut self.audio_out;
        let mut written = 0u64;
        let mut in_flight = false;

        let flush = async {
            if let Some(identity) = &identity {
                while let Ok(out) = audio_out.try_recv() {
                    in_flight = true;
                    Self::write(&codec, identity, out, outbound).await?;
                    in_flight = false;
                    written += 1;
                }
            }
            outbound.close().await
        };

        match tokio::time::timeout(self.params.close_grace, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "socket close failed"),
            Err(_) => warn!(
                grace_ms = self.params.close_grace.as_millis() as u64,
                "close grace elapsed before output drained"
            ),
        }
        self.messages_written += written;

        self.audio_out.close();
        let mut abandoned = self.abandoned + usize::from(in_flight);
        while self.audio_out.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(abandoned, "abandoned outbound messages on close");
        }

        self.transition(TransportState::Closed);
        info!(
            reason = ?reason,
            chunks_forwarded = self.chunks_forwarded,
            messages_written = self.messages_written,
            "transport closed"
        );

        TransportSummary {
            identity: self.identity.clone(),
            reason,
            states: std::mem::take(&mut self.states),
            chunks_forwarded: self.chunks_forwarded,
            messages_written: self.messages_written,
            abandoned,
        }
    }

    fn transition(&mut self, next: TransportState) {
        let moved = self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            self.states.push(next);
        } else {
            warn!(state = ?next, "ignoring backward transport transition");
        }
    }
}
