//! Call-control webhooks hit by the telephony provider.

use crate::AppState;
use axum::{
    http::header,
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;

const XML_CONTENT_TYPE: &str = "application/xml";

/// Stream XML that connects an answered call to the `/ws` media socket.
pub fn stream_xml(public_host: &str, audio_quality: u32) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response>\n  \
         <Stream bidirectional=\"true\" keepCallAlive=\"true\" \
         contentType=\"audio/x-mulaw;rate={audio_quality}\">wss://{public_host}/ws</Stream>\n\
         </Response>"
    )
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, XML_CONTENT_TYPE)], body).into_response()
}

/// Handler for `POST /answer`.
pub async fn answer_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let config = state.config.snapshot();
    tracing::info!(
        public_host = %config.server.public_host,
        audio_quality = config.ai.audio_quality,
        "call answered, returning stream xml"
    );
    xml(stream_xml(
        &config.server.public_host,
        config.ai.audio_quality,
    ))
}

/// Handler for `POST /hangup`.
pub async fn hangup_handler() -> Response {
    tracing::info!("call ended, hangup received");
    xml("<Response></Response>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_xml_points_at_the_public_websocket() {
        let xml = stream_xml("bot.example.com", 16000);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>"));
        assert!(xml.contains(
            "<Stream bidirectional=\"true\" keepCallAlive=\"true\" \
             contentType=\"audio/x-mulaw;rate=16000\">wss://bot.example.com/ws</Stream>"
        ));
        assert!(xml.ends_with("</Response>"));
    }
}
