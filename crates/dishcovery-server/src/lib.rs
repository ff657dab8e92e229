//! Dishcovery server library logic.
//!
//! Routes:
//! - `GET /health`: liveness and version
//! - `GET /voice?lat=&lng=`: WebSocket voice relay
//! - `POST /chat`: single-shot text recommendations

pub mod api;
pub mod api_chat;
pub mod api_voice;
pub mod config;
pub mod frame;
pub mod relay;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::Config;
use dishcovery_types::GeoPoint;
use dishcovery_upstream::{
    ChatBackend, GeminiChat, GeminiLiveAdapter, MockAdapter, MockChat, UpstreamAdapter,
};
use relay::RelaySettings;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Opens one upstream speech session per voice call.
    pub upstream: Arc<dyn UpstreamAdapter>,
    /// Answers text chat requests.
    pub chat: Arc<dyn ChatBackend>,
    pub relay: RelaySettings,
    /// Location used when a caller omits coordinates.
    pub default_location: GeoPoint,
}

impl AppState {
    /// Picks the live or mock backends once, at startup.
    pub fn from_config(config: &Config) -> Self {
        let (upstream, chat): (Arc<dyn UpstreamAdapter>, Arc<dyn ChatBackend>) =
            if config.voice.mock {
                (Arc::new(MockAdapter::new()), Arc::new(MockChat))
            } else {
                if config.gemini.api_key().is_none() {
                    tracing::warn!(
                        "GEMINI_API_KEY is not set; voice calls and chat will fail until it is"
                    );
                }
                (
                    Arc::new(GeminiLiveAdapter::new(config.gemini.clone())),
                    Arc::new(GeminiChat::new(config.gemini.clone())),
                )
            };
        tracing::info!(adapter = upstream.name(), "selected upstream adapter");

        Self {
            upstream,
            chat,
            relay: config.voice.relay_settings(),
            default_location: config.voice.default_location(),
        }
    }
}

/// Maximum request body size (64 KiB).
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
        .route("/voice", get(api_voice::voice_handler))
        .route("/chat", post(api_chat::chat_handler))
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
