//! Adapter for the live bidirectional speech service.
//!
//! One WebSocket per call. After the handshake the adapter sends a `setup`
//! message describing the persona, grounding tools, and location bias, and
//! waits for `setupComplete`. A driver task then forwards base64 PCM audio
//! up and decodes server content into [`UpstreamEvent`]s until the session
//! is released or either side closes.

use crate::config::GeminiConfig;
use crate::error::UpstreamError;
use crate::session::{
    SessionConfig, UpstreamAdapter, UpstreamEvent, UpstreamSession, AUDIO_QUEUE_DEPTH,
    EVENT_QUEUE_DEPTH,
};
use async_trait::async_trait;
use base64::Engine;
use dishcovery_types::{AudioChunk, AudioFormat};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout for the TCP/TLS/WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the service to acknowledge the setup message.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

type LiveSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct GeminiLiveAdapter {
    config: GeminiConfig,
}

impl GeminiLiveAdapter {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    async fn connect(&self, api_key: &str) -> Result<LiveSocket, UpstreamError> {
        let mut request = self
            .config
            .live_endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| UpstreamError::UpstreamUnavailable(format!("invalid endpoint: {}", e)))?;
        let key = HeaderValue::from_str(api_key).map_err(|_| {
            UpstreamError::UpstreamUnavailable("API key contains invalid characters".to_string())
        })?;
        request.headers_mut().insert("x-goog-api-key", key);

        let (socket, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| {
                UpstreamError::UpstreamUnavailable(format!(
                    "connect timed out after {} seconds",
                    CONNECT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(classify_connect_error)?;
        Ok(socket)
    }
}

#[async_trait]
impl UpstreamAdapter for GeminiLiveAdapter {
    fn name(&self) -> &'static str {
        "gemini-live"
    }

    async fn open(&self, config: SessionConfig) -> Result<UpstreamSession, UpstreamError> {
        let api_key = self.config.api_key().ok_or_else(|| {
            UpstreamError::UpstreamUnavailable("GEMINI_API_KEY is not set".to_string())
        })?;

        let mut socket = self.connect(api_key).await?;

        let setup = serde_json::to_string(&ClientSetup::new(&self.config.live_model, &config))?;
        socket
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| UpstreamError::UpstreamUnavailable(e.to_string()))?;

        tokio::time::timeout(SETUP_TIMEOUT, await_setup_complete(&mut socket))
            .await
            .map_err(|_| {
                UpstreamError::UpstreamUnavailable(format!(
                    "setup not acknowledged within {} seconds",
                    SETUP_TIMEOUT.as_secs()
                ))
            })??;

        info!(
            model = %self.config.live_model,
            lat = config.location.latitude,
            lng = config.location.longitude,
            "live session established"
        );

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let session = UpstreamSession::new(audio_tx, event_rx);
        tokio::spawn(drive(
            socket,
            audio_rx,
            event_tx,
            session.handle().shutdown_signal(),
        ));
        Ok(session)
    }
}

fn classify_connect_error(err: tokio_tungstenite::tungstenite::Error) -> UpstreamError {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::Http(response) if response.status() == StatusCode::BAD_REQUEST => {
            UpstreamError::UpstreamRejected(format!("handshake refused: {}", response.status()))
        }
        Error::Http(response) => {
            UpstreamError::UpstreamUnavailable(format!("handshake refused: {}", response.status()))
        }
        other => UpstreamError::UpstreamUnavailable(other.to_string()),
    }
}

async fn await_setup_complete(socket: &mut LiveSocket) -> Result<(), UpstreamError> {
    while let Some(frame) = socket.next().await {
        let frame = frame.map_err(|e| UpstreamError::UpstreamUnavailable(e.to_string()))?;
        match frame {
            Message::Close(close) => {
                let reason = close
                    .map(|f| format!("{} ({})", f.reason.as_str(), u16::from(f.code)))
                    .unwrap_or_else(|| "closed during setup".to_string());
                return Err(UpstreamError::UpstreamRejected(reason));
            }
            other => {
                let Some(text) = frame_text(&other) else {
                    continue;
                };
                if ServerMessage::parse(text)?.setup_complete.is_some() {
                    return Ok(());
                }
                debug!("ignoring server message received before setup completed");
            }
        }
    }
    Err(UpstreamError::UpstreamUnavailable(
        "connection ended during setup".to_string(),
    ))
}

fn frame_text(frame: &Message) -> Option<&str> {
    match frame {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// Pumps one live socket until released or closed by the service.
async fn drive(
    socket: LiveSocket,
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    events: mpsc::Sender<UpstreamEvent>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let upload = async {
        loop {
            let chunk = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                chunk = audio_rx.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let frame = match serde_json::to_string(&RealtimeInputMessage::audio(&chunk)) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("failed to encode audio for upstream: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                warn!("failed to send audio upstream: {}", e);
                // Queued ahead of the cancel so the relay sees an error, not a clean close.
                if events
                    .try_send(UpstreamEvent::Error(format!("audio upload failed: {}", e)))
                    .is_err()
                {
                    debug!("event queue unavailable for upload error");
                }
                break;
            }
        }
        shutdown.cancel();
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "session released".into(),
        }));
        if let Err(e) = ws_tx.send(close).await {
            debug!("upstream close frame not sent: {}", e);
        }
    };

    let download = async {
        loop {
            let frame = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                frame = ws_rx.next() => frame,
            };
            let batch = match frame {
                None => vec![UpstreamEvent::Closed],
                Some(Err(e)) => vec![UpstreamEvent::Error(e.to_string())],
                Some(Ok(Message::Close(frame))) => vec![close_event(frame)],
                Some(Ok(frame)) => match frame_text(&frame).map(ServerMessage::parse) {
                    None => continue,
                    Some(Ok(message)) => message.into_events(),
                    Some(Err(e)) => vec![UpstreamEvent::Error(e.to_string())],
                },
            };
            let mut terminal = false;
            for event in batch {
                terminal |= event.is_terminal();
                let delivered = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => false,
                    res = events.send(event) => res.is_ok(),
                };
                if !delivered {
                    terminal = true;
                    break;
                }
            }
            if terminal {
                break;
            }
        }
        shutdown.cancel();
    };

    tokio::join!(upload, download);
    debug!("live session driver finished");
}

fn close_event(frame: Option<CloseFrame>) -> UpstreamEvent {
    match frame {
        Some(frame) if frame.code != CloseCode::Normal => UpstreamEvent::Error(format!(
            "upstream closed with {}: {}",
            u16::from(frame.code),
            frame.reason.as_str()
        )),
        _ => UpstreamEvent::Closed,
    }
}

// Wire format: client -> service

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientSetup {
    setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    tool_config: ToolConfig,
    output_audio_transcription: Empty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Tool {
    GoogleMaps {},
    GoogleSearch {},
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolConfig {
    retrieval_config: RetrievalConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalConfig {
    lat_lng: LatLng,
}

#[derive(Debug, Serialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
struct Empty {}

impl ClientSetup {
    fn new(model: &str, config: &SessionConfig) -> Self {
        let mut tools = Vec::new();
        if config.tools.place_search {
            tools.push(Tool::GoogleMaps {});
        }
        if config.tools.web_search {
            tools.push(Tool::GoogleSearch {});
        }
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO"],
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: config.persona.clone(),
                    }],
                },
                tools,
                tool_config: ToolConfig {
                    retrieval_config: RetrievalConfig {
                        lat_lng: LatLng {
                            latitude: config.location.latitude,
                            longitude: config.location.longitude,
                        },
                    },
                },
                output_audio_transcription: Empty {},
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
struct RealtimeInput {
    audio: OutboundBlob,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundBlob {
    mime_type: String,
    data: String,
}

impl RealtimeInputMessage {
    fn audio(chunk: &AudioChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: OutboundBlob {
                    mime_type: AudioFormat::CLIENT_INPUT.mime_type(),
                    data: base64::engine::general_purpose::STANDARD.encode(chunk.as_bytes()),
                },
            },
        }
    }
}

// Wire format: service -> client

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
    grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    google_maps_widget_context_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

impl ServerMessage {
    fn parse(raw: &str) -> Result<Self, UpstreamError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Events carried by one message, in the order the client should see them.
    fn into_events(self) -> Vec<UpstreamEvent> {
        if let Some(go_away) = &self.go_away {
            warn!(time_left = ?go_away.time_left, "upstream announced disconnect");
        }
        let Some(content) = self.server_content else {
            return Vec::new();
        };
        if content.interrupted {
            debug!("upstream turn interrupted by user speech");
        }

        let mut events = Vec::new();
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            let Some(inline) = part.inline_data else {
                continue;
            };
            if !inline.mime_type.is_empty() && !inline.mime_type.starts_with("audio/pcm") {
                debug!(mime_type = %inline.mime_type, "skipping non-audio inline data");
                continue;
            }
            match base64::engine::general_purpose::STANDARD.decode(inline.data.as_bytes()) {
                Ok(pcm) => events.push(UpstreamEvent::AudioOut(AudioChunk::from(pcm))),
                Err(e) => {
                    events.push(UpstreamEvent::Error(format!("invalid audio payload: {}", e)));
                    return events;
                }
            }
        }
        if let Some(transcription) = content.output_transcription {
            if !transcription.text.is_empty() {
                events.push(UpstreamEvent::Transcript(transcription.text));
            }
        }
        if let Some(token) = content
            .grounding_metadata
            .and_then(|g| g.google_maps_widget_context_token)
        {
            events.push(UpstreamEvent::WidgetToken(token));
        }
        if content.turn_complete {
            debug!("upstream turn complete");
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dishcovery_types::GeoPoint;
    use serde_json::json;

    #[test]
    fn setup_carries_tools_and_location() {
        let config = SessionConfig::for_location(GeoPoint::new(32.0, -110.0));
        let setup = serde_json::to_value(ClientSetup::new("some-model", &config)).unwrap();

        assert_eq!(setup["setup"]["model"], "models/some-model");
        assert_eq!(
            setup["setup"]["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            setup["setup"]["tools"],
            json!([{ "googleMaps": {} }, { "googleSearch": {} }])
        );
        assert_eq!(
            setup["setup"]["toolConfig"]["retrievalConfig"]["latLng"],
            json!({ "latitude": 32.0, "longitude": -110.0 })
        );
        assert_eq!(
            setup["setup"]["systemInstruction"]["parts"][0]["text"],
            config.persona
        );
    }

    #[test]
    fn setup_omits_disabled_tools() {
        let mut config = SessionConfig::for_location(GeoPoint::CAMPUS);
        config.tools.web_search = false;
        let setup = serde_json::to_value(ClientSetup::new("models/m", &config)).unwrap();
        assert_eq!(setup["setup"]["model"], "models/m");
        assert_eq!(setup["setup"]["tools"], json!([{ "googleMaps": {} }]));
    }

    #[test]
    fn audio_is_base64_with_input_rate() {
        let msg = RealtimeInputMessage::audio(&AudioChunk::from(vec![0x01, 0x02, 0x03]));
        let value = serde_json::to_value(msg).unwrap();
        assert_eq!(
            value,
            json!({
                "realtimeInput": {
                    "audio": { "mimeType": "audio/pcm;rate=16000", "data": "AQID" }
                }
            })
        );
    }

    #[test]
    fn server_content_maps_to_events_in_order() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                        { "text": "thinking" }
                    ]
                },
                "outputTranscription": { "text": "Try Seis Kitchen." },
                "groundingMetadata": { "googleMapsWidgetContextToken": "widget-123" },
                "turnComplete": true
            }
        })
        .to_string();

        let events = ServerMessage::parse(&raw).unwrap().into_events();
        assert_eq!(
            events,
            vec![
                UpstreamEvent::AudioOut(AudioChunk::from(vec![0, 0, 0])),
                UpstreamEvent::Transcript("Try Seis Kitchen.".into()),
                UpstreamEvent::WidgetToken("widget-123".into()),
            ]
        );
    }

    #[test]
    fn setup_complete_has_no_events() {
        let message = ServerMessage::parse(r#"{"setupComplete": {}}"#).unwrap();
        assert!(message.setup_complete.is_some());
        assert!(message.into_events().is_empty());
    }

    #[test]
    fn bad_audio_payload_is_an_error_event() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"***"}}]}}}"#;
        let events = ServerMessage::parse(raw).unwrap().into_events();
        assert!(matches!(events.as_slice(), [UpstreamEvent::Error(_)]));
    }

    #[test]
    fn abnormal_close_is_an_error() {
        let event = close_event(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "quota".into(),
        }));
        assert!(matches!(event, UpstreamEvent::Error(ref msg) if msg.contains("quota")));
        assert_eq!(close_event(None), UpstreamEvent::Closed);
    }

    #[tokio::test]
    async fn open_without_key_is_unavailable() {
        let adapter = GeminiLiveAdapter::new(GeminiConfig::default());
        let result = adapter
            .open(SessionConfig::for_location(GeoPoint::CAMPUS))
            .await;
        assert!(matches!(
            result,
            Err(UpstreamError::UpstreamUnavailable(ref msg)) if msg.contains("GEMINI_API_KEY")
        ));
    }

    #[tokio::test]
    async fn open_against_dead_endpoint_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = GeminiConfig::new("test-key");
        config.live_endpoint = format!("ws://{}/live", addr);
        let adapter = GeminiLiveAdapter::new(config);
        let result = adapter
            .open(SessionConfig::for_location(GeoPoint::CAMPUS))
            .await;
        assert!(matches!(result, Err(UpstreamError::UpstreamUnavailable(_))));
    }
}
