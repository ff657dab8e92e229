//! End-to-end tests for the `/voice` WebSocket endpoint over a real socket.

use dishcovery_server::relay::RelaySettings;
use dishcovery_server::{app, AppState};
use dishcovery_types::GeoPoint;
use dishcovery_upstream::mock::{LISTENING_TRANSCRIPT, MOCK_REPLY_TRANSCRIPT, MOCK_WIDGET_TOKEN};
use dishcovery_upstream::{
    GeminiConfig, GeminiLiveAdapter, MockAdapter, MockChat, MockProbe, UpstreamAdapter,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_test_server(upstream: Arc<dyn UpstreamAdapter>) -> SocketAddr {
    let state = AppState {
        upstream,
        chat: Arc::new(MockChat),
        relay: RelaySettings::default(),
        default_location: GeoPoint::CAMPUS,
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

async fn mock_server() -> (SocketAddr, MockProbe) {
    let adapter = MockAdapter::new().recording();
    let probe = adapter.probe();
    (setup_test_server(Arc::new(adapter)).await, probe)
}

async fn next_message(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error")
}

async fn next_json(ws: &mut Client) -> Value {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn mock_call_round_trip() {
    let (addr, probe) = mock_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}/voice", addr)).await.unwrap();

    assert_eq!(
        next_json(&mut ws).await,
        json!({ "transcript": LISTENING_TRANSCRIPT })
    );

    for _ in 0..10 {
        ws.send(Message::Binary(vec![0u8; 640].into())).await.unwrap();
    }

    assert_eq!(
        next_json(&mut ws).await,
        json!({ "transcript": MOCK_REPLY_TRANSCRIPT })
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "widget_token": MOCK_WIDGET_TOKEN })
    );
    match next_message(&mut ws).await {
        Message::Binary(audio) => {
            assert_eq!(audio.len(), 4800);
            assert!(audio.iter().all(|b| *b == 0));
        }
        other => panic!("expected binary frame, got {:?}", other),
    }

    ws.close(None).await.unwrap();

    let mut released = false;
    for _ in 0..200 {
        if probe.handles().first().is_some_and(|h| h.is_closed()) {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "upstream session was not released");
    assert_eq!(probe.handles()[0].close_calls(), 1);
    assert_eq!(probe.received().len(), 10);
}

#[tokio::test]
async fn query_location_reaches_upstream() {
    let (addr, probe) = mock_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}/voice?lat=40.7128&lng=-74.006", addr))
        .await
        .unwrap();
    next_json(&mut ws).await;

    let config = probe.last_config().expect("session opened");
    assert_eq!(config.location, GeoPoint::new(40.7128, -74.006));
}

#[tokio::test]
async fn missing_location_uses_campus() {
    let (addr, probe) = mock_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}/voice", addr)).await.unwrap();
    next_json(&mut ws).await;

    assert_eq!(probe.last_config().unwrap().location, GeoPoint::CAMPUS);
}

#[tokio::test]
async fn unparsable_location_is_rejected() {
    let (addr, probe) = mock_server().await;
    let result = connect_async(format!("ws://{}/voice?lat=north", addr)).await;

    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }
    assert_eq!(probe.open_count(), 0);
}

#[tokio::test]
async fn out_of_range_or_non_finite_location_is_rejected() {
    let (addr, probe) = mock_server().await;
    for query in ["lat=NaN&lng=-118.44", "lat=123.0&lng=-118.44", "lat=34.07&lng=inf"] {
        let result = connect_async(format!("ws://{}/voice?{}", addr, query)).await;
        match result {
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 400, "{}", query);
            }
            other => panic!("expected HTTP 400 for {}, got {:?}", query, other.map(|_| ())),
        }
    }
    assert_eq!(probe.open_count(), 0);
}

#[tokio::test]
async fn live_adapter_without_credentials_reports_error_then_closes() {
    let adapter = GeminiLiveAdapter::new(GeminiConfig::default());
    let addr = setup_test_server(Arc::new(adapter)).await;
    let (mut ws, _) = connect_async(format!("ws://{}/voice", addr)).await.unwrap();

    let notice = next_json(&mut ws).await;
    assert!(notice["error"]
        .as_str()
        .expect("error field")
        .contains("GEMINI_API_KEY"));

    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1011),
        other => panic!("expected close frame, got {:?}", other),
    }
}
