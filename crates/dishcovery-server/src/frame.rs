//! Client-facing frame codec.
//!
//! WebSocket messages are decoded once, at the edge, into typed frames.
//! Binary frames are audio, text frames are control messages; nothing past
//! this module handles raw transport messages.

use axum::extract::ws::Message;
use dishcovery_types::{AudioChunk, ControlMessage};

/// One unit received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Microphone audio, forwarded upstream as-is.
    Audio(AudioChunk),
    /// The client closed the connection.
    Disconnect,
    /// Text, ping, or pong: not audio, but still proof of life.
    Ignored,
}

impl ClientFrame {
    pub fn decode(message: Message) -> Self {
        match message {
            Message::Binary(bytes) => ClientFrame::Audio(AudioChunk::from(bytes)),
            Message::Close(_) => ClientFrame::Disconnect,
            Message::Text(text) => {
                tracing::debug!(len = text.len(), "ignoring text frame from client");
                ClientFrame::Ignored
            }
            Message::Ping(_) | Message::Pong(_) => ClientFrame::Ignored,
        }
    }
}

/// One unit sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Audio(AudioChunk),
    Control(ControlMessage),
}

impl OutboundFrame {
    /// Encodes the frame for the wire.
    ///
    /// # Panics
    ///
    /// If a control message fails to serialize, which would be a bug in
    /// [`ControlMessage`] itself rather than a runtime condition.
    pub fn into_message(self) -> Message {
        match self {
            OutboundFrame::Audio(chunk) => Message::Binary(chunk.into_bytes()),
            OutboundFrame::Control(control) => {
                let json = control
                    .to_json()
                    .expect("control messages always serialize to JSON");
                Message::Text(json.into())
            }
        }
    }
}
