//! Plivo-style audio stream framing.
//!
//! Inbound envelopes are JSON text frames discriminated by their `event`
//! field. Some senders omit `event` and only send the keyed payload
//! (`{"start": {...}}`, `{"stop": {}}`), so the payload key is used as a
//! fallback discriminator.
//!
//! Outbound audio is sent as `playAudio` events; `clearAudio` asks the
//! provider to drop audio it has buffered but not yet played.

use crate::error::CodecError;
use crate::g711;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parley_types::audio::resample_linear;
use parley_types::{AudioChunk, SessionIdentity};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Audio encodings the provider can stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaEncoding {
    /// G.711 µ-law, one byte per sample.
    #[default]
    Mulaw,
    /// Linear PCM16 little-endian.
    L16,
}

impl MediaEncoding {
    /// MIME type used in `playAudio` and in the answer XML.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mulaw => "audio/x-mulaw",
            Self::L16 => "audio/x-l16",
        }
    }

    /// Parses a provider MIME type, ignoring any `;rate=` parameter.
    pub fn from_content_type(value: &str) -> Option<Self> {
        match value.split(';').next().map(str::trim) {
            Some("audio/x-mulaw") => Some(Self::Mulaw),
            Some("audio/x-l16") => Some(Self::L16),
            _ => None,
        }
    }
}

/// Negotiated media format for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub encoding: MediaEncoding,
    pub sample_rate: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            encoding: MediaEncoding::Mulaw,
            sample_rate: parley_types::params::DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Contents of a `start` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartEvent {
    pub stream_id: Option<String>,
    pub call_id: Option<String>,
    /// Encoding announced by the provider, if any.
    pub encoding: Option<MediaEncoding>,
    /// Sample rate announced by the provider, if any.
    pub sample_rate: Option<u32>,
}

/// A decoded inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEnvelope {
    Start(StartEvent),
    Media(AudioChunk),
    Dtmf { digit: String },
    Stop,
    /// Provider notifications the core does not act on
    /// (`playedStream`, `clearedAudio`, …).
    Other { event: String },
}

impl WireEnvelope {
    /// Short label for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Start(_) => "start",
            Self::Media(_) => "media",
            Self::Dtmf { .. } => "dtmf",
            Self::Stop => "stop",
            Self::Other { event } => event,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    event: Option<String>,
    start: Option<RawStart>,
    media: Option<RawMedia>,
    stop: Option<serde_json::Value>,
    dtmf: Option<RawDtmf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStart {
    stream_id: Option<String>,
    call_id: Option<String>,
    media_format: Option<RawMediaFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMediaFormat {
    encoding: Option<String>,
    sample_rate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct RawDtmf {
    digit: String,
}

/// Converts between provider envelopes and [`AudioChunk`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlivoCodec {
    config: CodecConfig,
}

impl PlivoCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> CodecConfig {
        self.config
    }

    /// Decodes one JSON text frame. Media payloads become an
    /// [`AudioChunk`] stamped with `sequence`.
    pub fn decode(&self, text: &str, sequence: u64) -> Result<WireEnvelope, CodecError> {
        let raw: RawEnvelope = serde_json::from_str(text)
            .map_err(|e| CodecError::MalformedFrame(format!("invalid envelope json: {e}")))?;

        let event = match raw.event.as_deref() {
            Some(event) => event.to_string(),
            None if raw.start.is_some() => "start".to_string(),
            None if raw.media.is_some() => "media".to_string(),
            None if raw.stop.is_some() => "stop".to_string(),
            None if raw.dtmf.is_some() => "dtmf".to_string(),
            None => {
                return Err(CodecError::MalformedFrame(
                    "envelope has no event discriminator".to_string(),
                ))
            }
        };

        match event.as_str() {
            "start" => {
                let start = raw.start.unwrap_or_default();
                let (encoding, sample_rate) = match start.media_format {
                    Some(format) => (
                        format
                            .encoding
                            .as_deref()
                            .and_then(MediaEncoding::from_content_type),
                        format.sample_rate,
                    ),
                    None => (None, None),
                };
                Ok(WireEnvelope::Start(StartEvent {
                    stream_id: start.stream_id.filter(|id| !id.is_empty()),
                    call_id: start.call_id.filter(|id| !id.is_empty()),
                    encoding,
                    sample_rate,
                }))
            }
            "media" => {
                let media = raw.media.ok_or_else(|| {
                    CodecError::MalformedFrame("media event without media payload".to_string())
                })?;
                let payload = BASE64
                    .decode(media.payload.as_bytes())
                    .map_err(|e| CodecError::MalformedFrame(format!("invalid base64 payload: {e}")))?;
                Ok(WireEnvelope::Media(self.decode_binary(&payload, sequence)))
            }
            "stop" => Ok(WireEnvelope::Stop),
            "dtmf" => {
                let dtmf = raw.dtmf.ok_or_else(|| {
                    CodecError::MalformedFrame("dtmf event without digit".to_string())
                })?;
                Ok(WireEnvelope::Dtmf { digit: dtmf.digit })
            }
            _ => Ok(WireEnvelope::Other { event }),
        }
    }

    /// Decodes a raw media payload in the negotiated encoding.
    pub fn decode_binary(&self, payload: &[u8], sequence: u64) -> AudioChunk {
        let pcm = match self.config.encoding {
            MediaEncoding::Mulaw => g711::decode_ulaw(payload),
            MediaEncoding::L16 => payload.to_vec(),
        };
        AudioChunk::new(pcm, self.config.sample_rate, 1, sequence)
    }

    /// Encodes synthesized audio as a `playAudio` event for `identity`.
    ///
    /// Audio at any other rate is resampled to the negotiated rate, which
    /// is the rate announced in the event.
    pub fn encode(&self, chunk: &AudioChunk, identity: &SessionIdentity) -> String {
        let rate = self.config.sample_rate;
        let converted;
        let pcm = if chunk.sample_rate == rate {
            chunk.pcm()
        } else {
            let samples = resample_linear(&chunk.samples(), chunk.sample_rate, rate);
            converted = AudioChunk::from_samples(&samples, rate, chunk.sequence);
            converted.pcm()
        };
        let payload = match self.config.encoding {
            MediaEncoding::Mulaw => g711::encode_ulaw(pcm),
            MediaEncoding::L16 => pcm.to_vec(),
        };
        json!({
            "event": "playAudio",
            "streamId": identity.stream_id,
            "media": {
                "contentType": self.config.encoding.content_type(),
                "sampleRate": rate,
                "payload": BASE64.encode(payload),
            }
        })
        .to_string()
    }

    /// Encodes a `clearAudio` event that flushes provider-side playback.
    pub fn encode_clear(&self, identity: &SessionIdentity) -> String {
        json!({
            "event": "clearAudio",
            "streamId": identity.stream_id,
        })
        .to_string()
    }
}
