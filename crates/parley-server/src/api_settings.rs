//! Settings, voice catalog and prompt template endpoints.

use crate::config::{Config, SettingsUpdate, DEFAULT_SYSTEM_PROMPT};
use crate::AppState;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use parley_voice::VOICE_CATALOG;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// A system prompt offered to operators as a starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromptTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub content: &'static str,
}

pub const PROMPT_TEMPLATES: &[PromptTemplate] = &[
    PromptTemplate {
        id: "teacher",
        name: "Teacher",
        content: DEFAULT_SYSTEM_PROMPT,
    },
    PromptTemplate {
        id: "support",
        name: "Support",
        content: "You are a professional customer support representative. You are helpful, patient, and solution-oriented. Keep responses concise and clear for audio conversation.",
    },
    PromptTemplate {
        id: "sales",
        name: "Sales",
        content: "You are a friendly sales representative. You are enthusiastic but not pushy. Focus on understanding customer needs and providing value. Keep responses conversational and engaging.",
    },
    PromptTemplate {
        id: "assistant",
        name: "Assistant",
        content: "You are a personal assistant. You are organized, efficient, and helpful. Provide clear and actionable responses. Be professional yet friendly in your communication.",
    },
];

fn settings_json(config: &Config) -> Value {
    json!({
        "ai": {
            "system_prompt": config.ai.system_prompt,
            "voice_id": config.ai.voice_id,
            "audio_quality": config.ai.audio_quality,
        },
        "call": {
            "default_caller_id": config.call.default_caller_id,
            "default_target_number": config.call.default_target_number,
            "auto_answer_delay": config.call.auto_answer_delay,
            "max_call_duration": config.call.max_call_duration,
        }
    })
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "message": message })),
    )
        .into_response()
}

/// Handler for `GET /api/settings`.
pub async fn get_settings(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(settings_json(&state.config.snapshot()))
}

/// Handler for `POST /api/settings`.
///
/// Applies to sessions started after the update. Calls already in progress
/// keep the snapshot they started with.
pub async fn update_settings(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> Response {
    let update = match payload {
        Ok(Json(update)) => update,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "rejected settings update");
            return bad_request(rejection.body_text());
        }
    };

    match state.config.update(update) {
        Ok(config) => {
            tracing::info!(
                voice_id = %config.ai.voice_id,
                audio_quality = config.ai.audio_quality,
                "configuration updated"
            );
            Json(json!({
                "status": "success",
                "message": "Settings updated successfully",
            }))
            .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "rejected settings update");
            bad_request(e.to_string())
        }
    }
}

/// Handler for `GET /api/voices`.
pub async fn list_voices() -> Json<Value> {
    Json(json!({ "voices": VOICE_CATALOG }))
}

/// Handler for `GET /api/prompts`.
pub async fn list_prompts() -> Json<Value> {
    Json(json!({ "templates": PROMPT_TEMPLATES }))
}
