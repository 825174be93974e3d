use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use super::{build_client, drain, send_checked, sse, ChatService, ChunkSink, DeltaStream};
use crate::{
    error::ChatError,
    models::{
        GeminiConfig, Message, Role, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
        DEFAULT_TOP_P,
    },
};

const NAME: &str = "Gemini";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/**
 * \brief Google Gemini adapter (`generateContent` / `streamGenerateContent`).
 * \details `assistant` turns become `model` turns; the system prompt becomes `systemInstruction`.
 */
pub struct GeminiService {
    config: GeminiConfig,
    base_url: String,
    client: Option<Client>,
}

impl GeminiService {
    pub fn new(config: GeminiConfig) -> Self {
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

    fn body(&self, messages: &[Message]) -> Value {
        let (system_prompt, contents) = gemini_payload(messages);
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                "topK": self.config.top_k.unwrap_or(DEFAULT_TOP_K),
                "topP": self.config.top_p.unwrap_or(DEFAULT_TOP_P),
                "maxOutputTokens": self.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            },
        });
        if let Some(sys) = system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }
        body
    }

    fn request(&self, client: &Client, messages: &[Message], stream: bool) -> RequestBuilder {
        let base = normalize_gemini_base(&self.base_url);
        let req = if stream {
            client
                .post(format!(
                    "{}/models/{}:streamGenerateContent",
                    base, self.config.model
                ))
                .query(&[("alt", "sse")])
        } else {
            client.post(format!(
                "{}/models/{}:generateContent",
                base, self.config.model
            ))
        };
        req.query(&[("key", self.config.api_key.as_str())])
            .json(&self.body(messages))
    }

    async fn complete(&self, req: RequestBuilder) -> Result<String, ChatError> {
        let resp = send_checked(NAME, req).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ChatError::upstream(NAME, e.to_string()))?;
        check_blocked(&v)?;
        Ok(extract_gemini_content(&v))
    }

    async fn stream(&self, req: RequestBuilder) -> Result<DeltaStream, ChatError> {
        let resp = send_checked(NAME, req).await?;
        let mut events = Box::pin(sse::data_payloads(NAME, resp));
        let out = try_stream! {
            while let Some(payload) = events.next().await {
                let payload = payload?;
                let Ok(v) = serde_json::from_str::<Value>(&payload) else {
                    continue;
                };
                check_blocked(&v)?;
                let text = extract_gemini_content(&v);
                if !text.is_empty() {
                    yield text;
                }
            }
        };
        Ok(Box::pin(out))
    }
}

#[async_trait]
impl ChatService for GeminiService {
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
        match on_chunk {
            Some(on_chunk) => {
                let req = self.request(client, messages, true);
                drain(self.stream(req).await?, on_chunk).await
            }
            None => self.complete(self.request(client, messages, false)).await,
        }
    }
}

fn gemini_payload(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.clone()),
            Role::Assistant => contents.push(json!({
                "role": "model",
                "parts": [{"text": msg.content}]
            })),
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{"text": msg.content}]
            })),
        }
    }
    let system_prompt = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system_prompt, contents)
}

fn extract_gemini_content(v: &Value) -> String {
    v.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|first| first.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/**
 * \brief Prompt-level blocks arrive as a 200 with `promptFeedback.blockReason`.
 */
fn check_blocked(v: &Value) -> Result<(), ChatError> {
    match v
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(|r| r.as_str())
    {
        Some(reason) => Err(ChatError::upstream(
            NAME,
            format!("prompt blocked: {}", reason),
        )),
        None => Ok(()),
    }
}

fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1")
        || trimmed.ends_with("/v1beta")
        || trimmed.contains("/v1/")
        || trimmed.contains("/v1beta/")
    {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}
