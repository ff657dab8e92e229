//! Turn types for the single-shot text chat collaborator.

use crate::GeoPoint;
use serde::{Deserialize, Serialize};

/// Author of a prior conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Model,
}

/// One prior turn in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// A chat request as handed to a chat backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub location: GeoPoint,
    /// Prior turns, oldest first.
    pub history: Vec<ChatTurn>,
}

/// The reply to a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    /// Present when the answer was grounded in place results.
    pub widget_token: Option<String>,
}
