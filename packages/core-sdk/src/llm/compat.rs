//! Chat-completions wire format shared by Azure OpenAI, OpenAI and Groq.

use async_stream::try_stream;
use futures_util::StreamExt;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::Value;

use super::{send_checked, sse, DeltaStream};
use crate::{error::ChatError, models::Message};

/**
 * \brief Request body of `POST …/chat/completions`.
 */
#[derive(Debug, Serialize)]
pub(crate) struct CompletionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: &'a [Message],
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<&'a [String]>,
    pub stream: bool,
}

/**
 * \brief Non-streaming call; returns `choices[0].message.content`.
 */
pub(crate) async fn complete(provider: &'static str, req: RequestBuilder) -> Result<String, ChatError> {
    let resp = send_checked(provider, req).await?;
    let v: Value = resp
        .json()
        .await
        .map_err(|e| ChatError::upstream(provider, e.to_string()))?;
    check_error(provider, &v)?;
    Ok(extract_content(&v))
}

/**
 * \brief Streaming call; yields each non-empty `delta.content` until `[DONE]`.
 * \details An `error` event ends the stream with `Upstream`, even after partial output.
 */
pub(crate) async fn stream(provider: &'static str, req: RequestBuilder) -> Result<DeltaStream, ChatError> {
    let resp = send_checked(provider, req).await?;
    let mut events = Box::pin(sse::data_payloads(provider, resp));
    let out = try_stream! {
        while let Some(payload) = events.next().await {
            let payload = payload?;
            if payload.trim() == "[DONE]" {
                break;
            }
            let Ok(v) = serde_json::from_str::<Value>(&payload) else {
                continue;
            };
            check_error(provider, &v)?;
            if let Some(delta) = delta_content(&v) {
                yield delta;
            }
        }
    };
    Ok(Box::pin(out))
}

/**
 * \brief Fails on an in-band `{"error": {...}}` object, which may arrive with a 200 status.
 */
pub(crate) fn check_error(provider: &str, v: &Value) -> Result<(), ChatError> {
    match v.get("error") {
        Some(err) if !err.is_null() => {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            Err(ChatError::upstream(provider, message))
        }
        _ => Ok(()),
    }
}

fn delta_content(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub(crate) fn extract_content(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}
