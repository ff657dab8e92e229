//! `POST /chat`: single-shot text recommendations.

use crate::api::ApiError;
use crate::AppState;
use axum::{Extension, Json};
use dishcovery_types::{ChatReply, ChatRequest, ChatTurn, GeoPoint};
use serde::Deserialize;
use std::sync::Arc;

/// Request body for `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl ChatBody {
    fn into_request(self, fallback: GeoPoint) -> ChatRequest {
        ChatRequest {
            message: self.message,
            location: GeoPoint::or_fallback(self.lat, self.lng, fallback),
            history: self.history,
        }
    }
}

pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let request = body.into_request(state.default_location);
    if !request.location.is_valid() {
        return Err(ApiError::BadRequest(
            "lat/lng must be valid coordinates".to_string(),
        ));
    }
    tracing::debug!(
        history = request.history.len(),
        lat = request.location.latitude,
        lng = request.location.longitude,
        "chat request"
    );

    let reply = state.chat.reply(&request).await.map_err(|e| {
        tracing::warn!("chat request failed: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(reply))
}
