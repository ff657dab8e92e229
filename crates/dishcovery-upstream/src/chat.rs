//! Single-shot text chat against the generation REST API.

use crate::config::GeminiConfig;
use crate::error::UpstreamError;
use crate::persona::SYSTEM_PROMPT;
use async_trait::async_trait;
use dishcovery_types::{ChatReply, ChatRequest, ChatRole};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout for one generation request.
const CHAT_TIMEOUT: Duration = Duration::from_secs(60);

pub const MOCK_CHAT_REPLY: &str =
    "Try **Tacos Apson** - carne asada worth the drive. (4.6, $) Want something closer to campus?";

pub const MOCK_CHAT_WIDGET_TOKEN: &str = "mock-maps-widget-context-token";

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn reply(&self, request: &ChatRequest) -> Result<ChatReply, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct GeminiChat {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiChat {
    pub fn new(config: GeminiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.chat_model
        )
    }
}

#[async_trait]
impl ChatBackend for GeminiChat {
    async fn reply(&self, request: &ChatRequest) -> Result<ChatReply, UpstreamError> {
        let api_key = self.config.api_key().ok_or_else(|| {
            UpstreamError::UpstreamUnavailable("GEMINI_API_KEY is not set".to_string())
        })?;

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&GenerateRequest::from_chat(request))
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(UpstreamError::QuotaExceeded),
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::UpstreamRejected(body));
            }
            status if !status.is_success() => {
                return Err(UpstreamError::UpstreamUnavailable(format!(
                    "generation request failed with {}",
                    status
                )));
            }
            _ => {}
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.into_reply())
    }
}

/// Canned replies for running without credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockChat;

#[async_trait]
impl ChatBackend for MockChat {
    async fn reply(&self, _request: &ChatRequest) -> Result<ChatReply, UpstreamError> {
        Ok(ChatReply {
            reply: MOCK_CHAT_REPLY.to_string(),
            widget_token: Some(MOCK_CHAT_WIDGET_TOKEN.to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    tools: Vec<Tool>,
    tool_config: ToolConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Tool {
    GoogleMaps {
        #[serde(rename = "enableWidget")]
        enable_widget: bool,
    },
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

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

impl GenerateRequest {
    fn from_chat(request: &ChatRequest) -> Self {
        let mut contents: Vec<Content> = request
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Model => "model",
                };
                Content::text(Some(role), &turn.content)
            })
            .collect();
        contents.push(Content::text(Some("user"), &request.message));

        Self {
            system_instruction: Content::text(None, SYSTEM_PROMPT),
            contents,
            tools: vec![
                Tool::GoogleMaps {
                    enable_widget: true,
                },
                Tool::GoogleSearch {},
            ],
            tool_config: ToolConfig {
                retrieval_config: RetrievalConfig {
                    lat_lng: LatLng {
                        latitude: request.location.latitude,
                        longitude: request.location.longitude,
                    },
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    google_maps_widget_context_token: Option<String>,
}

impl GenerateResponse {
    fn into_reply(self) -> ChatReply {
        let Some(candidate) = self.candidates.into_iter().next() else {
            return ChatReply {
                reply: String::new(),
                widget_token: None,
            };
        };
        let reply = candidate
            .content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        let widget_token = candidate
            .grounding_metadata
            .and_then(|g| g.google_maps_widget_context_token)
            .filter(|t| !t.is_empty());
        ChatReply {
            reply,
            widget_token,
        }
    }
}
