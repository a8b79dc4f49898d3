//! Streams a completion from a minimal in-process HTTP server.

use parley_pipeline::LanguageModel;
use parley_types::{ServiceError, Turn};
use parley_voice::{ChatCompletionsModel, ChatModelConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

/// Accepts one request, hands its raw text back, and replies with
/// `status` and `body`.
async fn serve_once(status: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&request).to_string());

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    (format!("http://{addr}/v1"), rx)
}

fn sse(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
    )
}

#[tokio::test]
async fn streams_deltas_in_order() {
    let body = format!("{}{}{}data: [DONE]\n\n", sse("Hello"), sse(" there"), sse("!"));
    let (base_url, request) = serve_once("200 OK", body).await;

    let model = ChatCompletionsModel::new(ChatModelConfig {
        base_url,
        api_key: "sk-test".to_string(),
        ..ChatModelConfig::default()
    })
    .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    model
        .complete(&[Turn::system("sys"), Turn::user("hi")], tx)
        .await
        .unwrap();

    let mut deltas = Vec::new();
    while let Some(delta) = rx.recv().await {
        deltas.push(delta);
    }
    assert_eq!(deltas, vec!["Hello", " there", "!"]);

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /v1/chat/completions"));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    assert!(request.contains("\"stream\":true"));
}

#[tokio::test]
async fn error_status_is_a_service_failure() {
    let (base_url, _request) =
        serve_once("401 Unauthorized", "{\"error\":\"bad key\"}".to_string()).await;
    let model = ChatCompletionsModel::new(ChatModelConfig {
        base_url,
        ..ChatModelConfig::default()
    })
    .unwrap();

    let (tx, _rx) = mpsc::channel(16);
    match model.complete(&[Turn::user("hi")], tx).await {
        Err(ServiceError::Failed(msg)) => assert!(msg.contains("401"), "got: {msg}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let model = ChatCompletionsModel::new(ChatModelConfig {
        base_url: format!("http://{addr}/v1"),
        ..ChatModelConfig::default()
    })
    .unwrap();

    let (tx, _rx) = mpsc::channel(16);
    assert!(matches!(
        model.complete(&[Turn::user("hi")], tx).await,
        Err(ServiceError::Unavailable(_))
    ));
}
