//! Router-level tests for `/health` and `/chat`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use dishcovery_server::api::QUOTA_EXCEEDED_DETAIL;
use dishcovery_server::relay::RelaySettings;
use dishcovery_server::{app, AppState};
use dishcovery_types::{ChatReply, ChatRequest, GeoPoint};
use dishcovery_upstream::chat::{MOCK_CHAT_REPLY, MOCK_CHAT_WIDGET_TOKEN};
use dishcovery_upstream::{
    ChatBackend, GeminiChat, GeminiConfig, MockAdapter, MockChat, UpstreamError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Records the last request and answers with a fixed result.
struct StubChat {
    last: Mutex<Option<ChatRequest>>,
    quota_exceeded: bool,
}

#[async_trait]
impl ChatBackend for StubChat {
    async fn reply(&self, request: &ChatRequest) -> Result<ChatReply, UpstreamError> {
        *self.last.lock().unwrap() = Some(request.clone());
        if self.quota_exceeded {
            return Err(UpstreamError::QuotaExceeded);
        }
        Ok(ChatReply {
            reply: "ok".into(),
            widget_token: None,
        })
    }
}

fn test_app(chat: Arc<dyn ChatBackend>) -> Router {
    app(AppState {
        upstream: Arc::new(MockAdapter::new()),
        chat,
        relay: RelaySettings::default(),
        default_location: GeoPoint::CAMPUS,
    })
}

async fn post_chat(app: Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn health_check_returns_ok() {
    let response = test_app(Arc::new(MockChat))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn mock_chat_replies_with_widget_token() {
    let (status, body) = post_chat(
        test_app(Arc::new(MockChat)),
        json!({ "message": "Best tacos near University of Arizona?" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], MOCK_CHAT_REPLY);
    assert_eq!(body["widget_token"], MOCK_CHAT_WIDGET_TOKEN);
}

#[tokio::test]
async fn chat_passes_location_and_history() {
    let stub = Arc::new(StubChat {
        last: Mutex::new(None),
        quota_exceeded: false,
    });
    let (status, body) = post_chat(
        test_app(stub.clone()),
        json!({
            "message": "cheaper?",
            "lat": 40.0,
            "lng": -74.0,
            "history": [{ "role": "user", "content": "tacos?" }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["widget_token"], Value::Null);
    let request = stub.last.lock().unwrap().clone().unwrap();
    assert_eq!(request.location, GeoPoint::new(40.0, -74.0));
    assert_eq!(request.history.len(), 1);
    assert_eq!(request.message, "cheaper?");
}

#[tokio::test]
async fn quota_exhaustion_is_429() {
    let stub = Arc::new(StubChat {
        last: Mutex::new(None),
        quota_exceeded: true,
    });
    let (status, body) = post_chat(test_app(stub), json!({ "message": "tacos?" })).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["detail"], QUOTA_EXCEEDED_DETAIL);
}

#[tokio::test]
async fn missing_credentials_is_503() {
    let chat = GeminiChat::new(GeminiConfig::default());
    let (status, body) = post_chat(test_app(Arc::new(chat)), json!({ "message": "tacos?" })).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("GEMINI_API_KEY"));
}

#[tokio::test]
async fn empty_message_is_400() {
    let (status, _) = post_chat(test_app(Arc::new(MockChat)), json!({ "message": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn out_of_range_location_is_400() {
    let stub = Arc::new(StubChat {
        last: Mutex::new(None),
        quota_exceeded: false,
    });
    let (status, body) = post_chat(
        test_app(stub.clone()),
        json!({ "message": "tacos?", "lat": 123.0, "lng": -118.44 }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("lat/lng"));
    assert!(stub.last.lock().unwrap().is_none());
}
