//! Provider adapters behind one chat contract, plus the factory that picks one.

pub mod azure;
pub mod claude;
mod compat;
pub mod gemini;
pub mod groq;
pub mod openai;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};

use crate::{
    error::ChatError,
    models::{Message, ProviderConfig},
    telemetry,
};

pub use azure::AzureOpenAiService;
pub use claude::ClaudeService;
pub use gemini::GeminiService;
pub use groq::GroqService;
pub use openai::OpenAiService;

/** \brief Text fragments of a streaming response, in wire order. */
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/** \brief Per-fragment callback of a streaming call. */
pub type ChunkSink<'a> = dyn for<'c> FnMut(&'c str) + Send + 'a;

/**
 * \brief Uniform contract every provider adapter implements.
 */
#[async_trait]
pub trait ChatService: Send + Sync {
    /** \brief Display label, e.g. "Claude". */
    fn provider_name(&self) -> &'static str;

    /** \brief Provider-specific required-field check. */
    fn validate_config(&self) -> bool;

    /**
     * \brief Sends the full history and returns the reply text.
     * \param on_chunk When present the request streams and the callback sees every fragment in order;
     *   the returned text is exactly the concatenation of those fragments.
     */
    async fn send_message(
        &self,
        messages: &[Message],
        on_chunk: Option<&mut ChunkSink<'_>>,
    ) -> Result<String, ChatError>;
}

/**
 * \brief Builds the adapter for the active config. No caching: rebuild after every config change.
 */
pub fn create_service(config: &ProviderConfig) -> Box<dyn ChatService> {
    match config {
        ProviderConfig::Azure(c) => Box::new(AzureOpenAiService::new(c.clone())),
        ProviderConfig::OpenAi(c) => Box::new(OpenAiService::new(c.clone())),
        ProviderConfig::Claude(c) => Box::new(ClaudeService::new(c.clone())),
        ProviderConfig::Gemini(c) => Box::new(GeminiService::new(c.clone())),
        ProviderConfig::Groq(c) => Box::new(GroqService::new(c.clone())),
    }
}

/**
 * \brief HTTP client for an adapter, or `None` when credentials are missing or the builder fails.
 */
pub(crate) fn build_client(provider: &str, has_credentials: bool) -> Option<Client> {
    if !has_credentials {
        return None;
    }
    match Client::builder().build() {
        Ok(client) => Some(client),
        Err(err) => {
            telemetry::log_error(
                "llm.client",
                &format!("{} client init failed: {}", provider, err),
            );
            None
        }
    }
}

/**
 * \brief Sends a request, mapping transport failures and non-2xx statuses to `Upstream`.
 */
pub(crate) async fn send_checked(provider: &str, req: RequestBuilder) -> Result<Response, ChatError> {
    let resp = req
        .send()
        .await
        .map_err(|e| ChatError::upstream(provider, e.to_string()))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(ChatError::upstream(
            provider,
            format!("request failed: {} -> {}", status, text),
        ));
    }
    Ok(resp)
}

/**
 * \brief Feeds every fragment to `on_chunk` and accumulates the full reply.
 */
pub(crate) async fn drain(
    mut stream: DeltaStream,
    on_chunk: &mut ChunkSink<'_>,
) -> Result<String, ChatError> {
    let mut full = String::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if delta.is_empty() {
            continue;
        }
        on_chunk(&delta);
        full.push_str(&delta);
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AzureConfig, ClaudeConfig, GeminiConfig, GroqConfig, OpenAiConfig, ProviderKind,
    };
    use futures_util::stream;

    fn configs() -> Vec<ProviderConfig> {
        vec![
            ProviderConfig::Azure(AzureConfig {
                api_key: "k".into(),
                endpoint: "https://x.openai.azure.com".into(),
                deployment_name: "d".into(),
                ..Default::default()
            }),
            ProviderConfig::OpenAi(OpenAiConfig {
                api_key: "k".into(),
                model: "gpt-4".into(),
                ..Default::default()
            }),
            ProviderConfig::Claude(ClaudeConfig {
                api_key: "k".into(),
                model: "claude-3-haiku-20240307".into(),
                max_tokens: Some(256),
                ..Default::default()
            }),
            ProviderConfig::Gemini(GeminiConfig {
                api_key: "k".into(),
                model: "gemini-pro".into(),
                ..Default::default()
            }),
            ProviderConfig::Groq(GroqConfig {
                api_key: "k".into(),
                model: "mixtral-8x7b-32768".into(),
                ..Default::default()
            }),
        ]
    }

    #[test]
    fn test_factory_dispatches_on_provider_tag() {
        for config in configs() {
            let service = create_service(&config);
            assert_eq!(service.provider_name(), config.kind().label());
            assert!(service.validate_config());
        }
    }

    #[test]
    fn test_validate_config_matches_model_validity() {
        for kind in ProviderKind::ALL {
            let blank = ProviderConfig::default_for(kind, &ProviderConfig::default());
            let service = create_service(&blank);
            assert_eq!(service.validate_config(), blank.is_valid(), "{}", kind);
            assert!(!service.validate_config(), "{} without key must be invalid", kind);
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_network() {
        for kind in ProviderKind::ALL {
            let blank = ProviderConfig::default_for(kind, &ProviderConfig::default());
            let service = create_service(&blank);
            let err = service
                .send_message(&[Message::user("hi")], None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, ChatError::ProviderUnavailable(ref name) if name == kind.label()),
                "{}: {:?}",
                kind,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_drain_concatenates_in_order() {
        let parts: DeltaStream = Box::pin(stream::iter(vec![
            Ok("Hi".to_string()),
            Ok(String::new()),
            Ok(" there".to_string()),
        ]));
        let mut seen = Vec::new();
        let mut sink = |c: &str| seen.push(c.to_string());
        let full = drain(parts, &mut sink).await.expect("drain");
        assert_eq!(seen, vec!["Hi".to_string(), " there".to_string()]);
        assert_eq!(full, seen.concat());
    }

    #[tokio::test]
    async fn test_drain_stops_on_error_after_partial_delivery() {
        let parts: DeltaStream = Box::pin(stream::iter(vec![
            Ok("partial".to_string()),
            Err(ChatError::upstream("OpenAI", "connection reset")),
            Ok("never".to_string()),
        ]));
        let mut seen = Vec::new();
        let mut sink = |c: &str| seen.push(c.to_string());
        let err = drain(parts, &mut sink).await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream { .. }));
        assert_eq!(seen, vec!["partial".to_string()]);
    }
}
