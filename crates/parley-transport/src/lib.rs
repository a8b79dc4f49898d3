//! Telephony media transport for Parley.
//!
//! Two layers live here:
//!
//! - [`codec`]: translates between the provider's JSON wire envelopes
//!   (`start`, `media`, `stop`, `playAudio`, `clearAudio`, …) and the
//!   normalized [`AudioChunk`](parley_types::AudioChunk) used inside the
//!   pipeline.
//! - [`transport`]: owns one bidirectional WebSocket session, drives the
//!   `Idle → AwaitingStart → Streaming → Closing → Closed` state machine,
//!   and raises connect/disconnect events for the session runner.
//!
//! The transport is generic over any `Stream`/`Sink` pair of
//! [`WireMessage`]s, so the HTTP server adapts its socket type and tests
//! drive it with in-memory channels.

pub mod codec;
pub mod error;
pub mod g711;
pub mod transport;

pub use codec::{CodecConfig, MediaEncoding, PlivoCodec, StartEvent, WireEnvelope};
pub use error::{CodecError, TransportError};
pub use transport::{
    DisconnectReason, Outbound, TransportChannels, TransportEvent, TransportParams,
    TransportState, TransportSummary, WebsocketTransport, WireMessage,
};
