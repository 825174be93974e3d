use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{build_client, drain, send_checked, sse, ChatService, ChunkSink, DeltaStream};
use crate::{
    error::ChatError,
    models::{ClaudeConfig, Message, Role, DEFAULT_TEMPERATURE},
};

const NAME: &str = "Claude";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ClaudeMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ClaudeStreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: ClaudeDelta },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(rename = "error")]
    Error { error: ClaudeApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ClaudeDelta {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ClaudeApiError {
    message: String,
}

#[derive(Debug, PartialEq)]
enum StreamStep {
    Text(String),
    Stop,
    Skip,
}

/**
 * \brief Anthropic Messages adapter.
 * \details The system prompt travels in the top-level `system` field, not as a turn.
 */
pub struct ClaudeService {
    config: ClaudeConfig,
    base_url: String,
    client: Option<Client>,
}

impl ClaudeService {
    pub fn new(config: ClaudeConfig) -> Self {
        let client = build_client(NAME, !config.api_key.is_empty());
        Self {
            config,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [Message],
        max_tokens: u32,
        stream: bool,
    ) -> ClaudeRequest<'a> {
        let system_parts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        let turns = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ClaudeMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        ClaudeRequest {
            model: &self.config.model,
            max_tokens,
            temperature: self.config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            messages: turns,
            system,
            stream,
        }
    }

    fn request(&self, client: &Client, body: &ClaudeRequest<'_>) -> RequestBuilder {
        client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
    }

    async fn complete(&self, req: RequestBuilder) -> Result<String, ChatError> {
        let resp = send_checked(NAME, req).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ChatError::upstream(NAME, e.to_string()))?;
        Ok(extract_content(&v))
    }

    async fn stream(&self, req: RequestBuilder) -> Result<DeltaStream, ChatError> {
        let resp = send_checked(NAME, req).await?;
        let mut events = Box::pin(sse::data_payloads(NAME, resp));
        let out = try_stream! {
            while let Some(payload) = events.next().await {
                match parse_event(&payload?)? {
                    StreamStep::Text(text) => yield text,
                    StreamStep::Stop => break,
                    StreamStep::Skip => {}
                }
            }
        };
        Ok(Box::pin(out))
    }
}

#[async_trait]
impl ChatService for ClaudeService {
    fn provider_name(&self) -> &'static str {
        NAME
    }

    fn validate_config(&self) -> bool {
        self.config.is_valid()
    }

    async fn send_message(
        &self,
        messages: &[Message],
        on_chunk: Option<&mut ChunkSink<'_>>,
    ) -> Result<String, ChatError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ChatError::ProviderUnavailable(NAME.to_string()))?;
        let max_tokens = self
            .config
            .max_tokens
            .filter(|n| *n > 0)
            .ok_or_else(|| ChatError::ConfigInvalid(NAME.to_string()))?;
        match on_chunk {
            Some(on_chunk) => {
                let req = self.request(client, &self.build_request(messages, max_tokens, true));
                drain(self.stream(req).await?, on_chunk).await
            }
            None => {
                let req = self.request(client, &self.build_request(messages, max_tokens, false));
                self.complete(req).await
            }
        }
    }
}

fn parse_event(payload: &str) -> Result<StreamStep, ChatError> {
    let Ok(event) = serde_json::from_str::<ClaudeStreamEvent>(payload) else {
        return Ok(StreamStep::Skip);
    };
    match event {
        ClaudeStreamEvent::ContentBlockDelta { delta } if delta.kind == "text_delta" => {
            match delta.text {
                Some(text) if !text.is_empty() => Ok(StreamStep::Text(text)),
                _ => Ok(StreamStep::Skip),
            }
        }
        ClaudeStreamEvent::ContentBlockDelta { .. } => Ok(StreamStep::Skip),
        ClaudeStreamEvent::MessageStop {} => Ok(StreamStep::Stop),
        ClaudeStreamEvent::Error { error } => Err(ChatError::upstream(NAME, error.message)),
        ClaudeStreamEvent::Other => Ok(StreamStep::Skip),
    }
}

fn extract_content(v: &Value) -> String {
    v.get("content")
        .and_then(|arr| arr.as_array())
        .map(|arr| {
            arr.iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
