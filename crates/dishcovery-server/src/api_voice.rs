//! `GET /voice`: WebSocket upgrade into a voice relay session.

use crate::relay::VoiceRelaySession;
use crate::AppState;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use dishcovery_types::GeoPoint;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

/// Query parameters for the voice endpoint.
///
/// Unparsable coordinates are rejected by the extractor with `400`;
/// non-finite or out-of-range ones by the handler.
#[derive(Debug, Default, Deserialize)]
pub struct VoiceParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

pub async fn voice_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(params): Query<VoiceParams>,
) -> Response {
    let location = GeoPoint::or_fallback(params.lat, params.lng, state.default_location);
    if !location.is_valid() {
        tracing::debug!(lat = ?params.lat, lng = ?params.lng, "rejecting invalid call location");
        return (StatusCode::BAD_REQUEST, "lat/lng must be valid coordinates").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, location))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, location: GeoPoint) {
    let session = VoiceRelaySession::new(state.upstream.clone(), location, state.relay);
    let (writer, reader) = socket.split();
    let report = session.run(reader, writer).await;

    tracing::debug!(
        session_id = %report.session_id,
        states = ?report.states,
        "voice connection finished"
    );
}
