//! Parley server library logic.

pub mod api_call;
pub mod api_settings;
pub mod api_ws;
pub mod config;

use api_ws::{LocalServices, ServiceFactory};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::{Config, ConfigStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Current configuration snapshot, replaced by settings updates.
    pub config: Arc<ConfigStore>,
    /// Builds the speech and language services for each call.
    pub services: Arc<dyn ServiceFactory>,
}

impl AppState {
    /// State backed by the local whisper/piper/chat services.
    pub fn new(config: Config) -> Self {
        Self::with_services(config, Arc::new(LocalServices))
    }

    pub fn with_services(config: Config, services: Arc<dyn ServiceFactory>) -> Self {
        Self {
            config: Arc::new(ConfigStore::new(config)),
            services,
        }
    }
}

/// Maximum request body size (64 KiB). Settings payloads are small.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/answer", post(api_call::answer_handler))
        .route("/hangup", post(api_call::hangup_handler))
        .route(
            "/api/settings",
            get(api_settings::get_settings).post(api_settings::update_settings),
        )
        .route("/api/voices", get(api_settings::list_voices))
        .route("/api/prompts", get(api_settings::list_prompts))
        .route("/ws", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
