//! Session-level tests for the WebSocket transport, driven through
//! in-memory streams and channel-backed sinks.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{stream, SinkExt, Stream, StreamExt};
use parley_transport::{
    DisconnectReason, Outbound, TransportError, TransportEvent, TransportParams, TransportState,
    WebsocketTransport, WireMessage,
};
use parley_types::{AudioChunk, SessionIdentity};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

fn start(stream_id: Option<&str>) -> WireMessage {
    let body = match stream_id {
        Some(id) => json!({ "start": { "streamId": id, "callId": "C1" } }),
        None => json!({ "start": { "callId": "C1" } }),
    };
    WireMessage::Text(body.to_string())
}

fn media(fill: u8) -> WireMessage {
    WireMessage::Text(
        json!({
            "event": "media",
            "media": { "payload": BASE64.encode([fill; 160]) }
        })
        .to_string(),
    )
}

fn stop() -> WireMessage {
    WireMessage::Text(r#"{"stop":{}}"#.to_string())
}

fn inbound(
    messages: Vec<WireMessage>,
) -> impl Stream<Item = Result<WireMessage, TransportError>> + Unpin + Send + 'static {
    stream::iter(messages.into_iter().map(Ok::<_, TransportError>))
}

fn open_inbound(
    messages: Vec<WireMessage>,
) -> impl Stream<Item = Result<WireMessage, TransportError>> + Unpin + Send + 'static {
    stream::iter(messages.into_iter().map(Ok::<_, TransportError>)).chain(stream::pending())
}

fn sink(
    capacity: usize,
) -> (
    impl futures_util::Sink<WireMessage, Error = TransportError> + Unpin + Send + 'static,
    mpsc::Receiver<WireMessage>,
) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PollSender::new(tx).sink_map_err(|_| TransportError::Closed),
        rx,
    )
}

async fn drain_events(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn start_three_media_stop_forwards_exactly_three_chunks() {
    let (transport, mut channels, mut events) = WebsocketTransport::new(TransportParams::default());
    let (out, _written) = sink(8);

    let summary = transport
        .run(
            inbound(vec![start(Some("S1")), media(0x10), media(0x20), media(0x30), stop()]),
            out,
        )
        .await;

    assert_eq!(summary.reason, DisconnectReason::Stop);
    assert_eq!(summary.chunks_forwarded, 3);
    assert_eq!(
        summary.identity,
        Some(SessionIdentity::new("S1", Some("C1".to_string())))
    );
    assert_eq!(
        summary.states,
        vec![
            TransportState::Idle,
            TransportState::AwaitingStart,
            TransportState::Streaming,
            TransportState::Closing,
            TransportState::Closed,
        ]
    );

    let mut sequences = Vec::new();
    while let Some(chunk) = channels.audio_in.recv().await {
        assert_eq!(chunk.sample_rate, 8000);
        assert_eq!(chunk.pcm().len(), 320);
        sequences.push(chunk.sequence);
    }
    assert_eq!(sequences, vec![0, 1, 2]);

    let seen = drain_events(&mut events).await;
    assert_eq!(
        seen,
        vec![
            TransportEvent::Connected(SessionIdentity::new("S1", Some("C1".to_string()))),
            TransportEvent::Disconnected(DisconnectReason::Stop),
        ]
    );
}

#[tokio::test]
async fn start_without_stream_id_forwards_no_audio() {
    let (transport, mut channels, mut events) = WebsocketTransport::new(TransportParams::default());
    let (out, _written) = sink(8);

    let summary = transport
        .run(inbound(vec![start(None), media(0x10), media(0x20), stop()]), out)
        .await;

    assert!(matches!(summary.reason, DisconnectReason::StartFailed(_)));
    assert_eq!(summary.chunks_forwarded, 0);
    assert!(summary.identity.is_none());
    assert!(!summary.states.contains(&TransportState::Streaming));
    assert_eq!(summary.states.last(), Some(&TransportState::Closed));
    assert!(channels.audio_in.recv().await.is_none());

    let seen = drain_events(&mut events).await;
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        seen[0],
        TransportEvent::Disconnected(DisconnectReason::StartFailed(_))
    ));
}

#[tokio::test]
async fn malformed_first_message_is_fatal() {
    let (transport, _channels, _events) = WebsocketTransport::new(TransportParams::default());
    let (out, _written) = sink(8);

    let summary = transport
        .run(
            inbound(vec![
                WireMessage::Text("{not json".to_string()),
                start(Some("S1")),
                stop(),
            ]),
            out,
        )
        .await;

    assert!(matches!(summary.reason, DisconnectReason::StartFailed(_)));
    assert!(summary.identity.is_none());
}

#[tokio::test]
async fn malformed_frames_while_streaming_are_dropped() {
    let (transport, mut channels, _events) = WebsocketTransport::new(TransportParams::default());
    let (out, _written) = sink(8);

    let summary = transport
        .run(
            inbound(vec![
                start(Some("S1")),
                media(0x10),
                WireMessage::Text("garbage".to_string()),
                WireMessage::Text(r#"{"event":"dtmf","dtmf":{"digit":"5"}}"#.to_string()),
                media(0x20),
                stop(),
            ]),
            out,
        )
        .await;

    assert_eq!(summary.reason, DisconnectReason::Stop);
    assert_eq!(summary.chunks_forwarded, 2);
    let first = channels.audio_in.recv().await.unwrap();
    let second = channels.audio_in.recv().await.unwrap();
    assert_eq!((first.sequence, second.sequence), (0, 1));
}

#[tokio::test]
async fn media_before_start_is_never_forwarded() {
    let (transport, mut channels, _events) = WebsocketTransport::new(TransportParams::default());
    let (out, _written) = sink(8);

    let summary = transport
        .run(
            inbound(vec![
                start_placeholder_event(),
                media(0x01),
                start(Some("S7")),
                media(0x02),
                stop(),
            ]),
            out,
        )
        .await;

    assert_eq!(summary.chunks_forwarded, 1);
    let chunk = channels.audio_in.recv().await.unwrap();
    assert_eq!(chunk.sequence, 0);
    assert!(channels.audio_in.recv().await.is_none());
}

/// A provider notification that is valid but not a `start`.
fn start_placeholder_event() -> WireMessage {
    WireMessage::Text(r#"{"event":"connected"}"#.to_string())
}

#[tokio::test]
async fn remote_close_ends_the_session() {
    let (transport, _channels, mut events) = WebsocketTransport::new(TransportParams::default());
    let (out, _written) = sink(8);

    let summary = transport
        .run(inbound(vec![start(Some("S1")), media(0x10)]), out)
        .await;

    assert_eq!(summary.reason, DisconnectReason::RemoteClosed);
    let seen = drain_events(&mut events).await;
    assert_eq!(
        seen.last(),
        Some(&TransportEvent::Disconnected(DisconnectReason::RemoteClosed))
    );
}

#[tokio::test]
async fn outbound_audio_and_clear_are_written_with_stream_id() {
    let (transport, channels, mut events) = WebsocketTransport::new(TransportParams::default());
    let cancel = transport.cancel_token();
    let (out, mut written) = sink(8);

    let session = tokio::spawn(transport.run(open_inbound(vec![start(Some("S1"))]), out));
    assert!(matches!(
        events.recv().await,
        Some(TransportEvent::Connected(_))
    ));

    let chunk = AudioChunk::from_samples(&[0; 160], 8000, 0);
    channels
        .audio_out
        .send(Outbound::Audio(chunk))
        .await
        .unwrap();
    channels.audio_out.send(Outbound::Clear).await.unwrap();

    let play = match written.recv().await.unwrap() {
        WireMessage::Text(text) => serde_json::from_str::<Value>(&text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    };
    assert_eq!(play["event"], "playAudio");
    assert_eq!(play["streamId"], "S1");
    assert_eq!(
        BASE64
            .decode(play["media"]["payload"].as_str().unwrap())
            .unwrap()
            .len(),
        160
    );

    let clear = match written.recv().await.unwrap() {
        WireMessage::Text(text) => serde_json::from_str::<Value>(&text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    };
    assert_eq!(clear["event"], "clearAudio");

    cancel.cancel();
    let summary = session.await.unwrap();
    assert_eq!(summary.reason, DisconnectReason::Cancelled);
    assert_eq!(summary.messages_written, 2);
    assert_eq!(summary.abandoned, 0);
}

#[tokio::test]
async fn output_queued_for_an_unidentified_session_is_abandoned() {
    let (transport, channels, _events) = WebsocketTransport::new(TransportParams::default());
    let (out, _written) = sink(8);
    transport.cancel_token().cancel();

    for _ in 0..2 {
        channels.audio_out.send(Outbound::Clear).await.unwrap();
    }

    let summary = transport.run(open_inbound(vec![]), out).await;
    assert_eq!(summary.reason, DisconnectReason::Cancelled);
    assert_eq!(summary.abandoned, 2);
    assert_eq!(summary.messages_written, 0);
    assert!(channels.audio_out.send(Outbound::Clear).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn close_is_bounded_by_the_grace_period() {
    let params = TransportParams {
        close_grace: Duration::from_millis(500),
        ..TransportParams::default()
    };
    let (transport, channels, mut events) = WebsocketTransport::new(params);
    let cancel = transport.cancel_token();
    // The socket accepts one message and then stalls.
    let (out, _stalled) = sink(1);

    for _ in 0..4 {
        channels.audio_out.send(Outbound::Clear).await.unwrap();
    }
    let session = tokio::spawn(transport.run(open_inbound(vec![start(Some("S1"))]), out));
    assert!(matches!(
        events.recv().await,
        Some(TransportEvent::Connected(_))
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let started = tokio::time::Instant::now();
    let summary = session.await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(summary.reason, DisconnectReason::Cancelled);
    assert_eq!(summary.messages_written, 1);
    assert_eq!(summary.abandoned, 3);
    assert_eq!(summary.states.last(), Some(&TransportState::Closed));
}

#[tokio::test]
async fn outbound_audio_follows_the_announced_media_format() {
    let (transport, channels, mut events) = WebsocketTransport::new(TransportParams::default());
    let cancel = transport.cancel_token();
    let (out, mut written) = sink(8);
    let wideband = WireMessage::Text(
        json!({
            "event": "start",
            "start": {
                "streamId": "S1",
                "mediaFormat": { "encoding": "audio/x-l16", "sampleRate": 16000 }
            }
        })
        .to_string(),
    );

    let session = tokio::spawn(transport.run(open_inbound(vec![wideband]), out));
    assert!(matches!(
        events.recv().await,
        Some(TransportEvent::Connected(_))
    ));

    // Rendered at the configured rate, not the one the provider announced.
    let chunk = AudioChunk::from_samples(&[250; 160], 8000, 0);
    channels
        .audio_out
        .send(Outbound::Audio(chunk))
        .await
        .unwrap();

    let play = match written.recv().await.unwrap() {
        WireMessage::Text(text) => serde_json::from_str::<Value>(&text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    };
    assert_eq!(play["media"]["contentType"], "audio/x-l16");
    assert_eq!(play["media"]["sampleRate"], 16000);
    assert_eq!(
        BASE64
            .decode(play["media"]["payload"].as_str().unwrap())
            .unwrap()
            .len(),
        320 * 2
    );

    cancel.cancel();
    session.await.unwrap();
}
