//! Structured control messages sent to the client as text frames.

use serde::{Deserialize, Serialize};

/// A text-frame payload carrying exactly one field.
///
/// Serializes as a single-key JSON object, e.g. `{"transcript": "..."}` or
/// `{"widget_token": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    /// Speech transcript text from the assistant.
    Transcript(String),
    /// Opaque grounding token the client uses to render place results.
    WidgetToken(String),
    /// Human-readable description of a failure on the relay or upstream side.
    Error(String),
}

impl ControlMessage {
    /// Serializes the message into its wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
