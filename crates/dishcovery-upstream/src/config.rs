use serde::{Deserialize, Serialize};
use std::fmt;

/// Bidirectional streaming endpoint of the live speech service.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// REST base for single-shot generation.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";

fn default_live_endpoint() -> String {
    DEFAULT_LIVE_ENDPOINT.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_live_model() -> String {
    DEFAULT_LIVE_MODEL.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key. Empty means no credentials; never written back out.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_live_model")]
    pub live_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_live_endpoint")]
    pub live_endpoint: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            live_model: default_live_model(),
            chat_model: default_chat_model(),
            live_endpoint: default_live_endpoint(),
            api_base: default_api_base(),
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("live_model", &self.live_model)
            .field("chat_model", &self.chat_model)
            .field("live_endpoint", &self.live_endpoint)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Returns the API key, or `None` when credentials are absent.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }
}
