use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, RequestBuilder};

use super::{build_client, compat, drain, ChatService, ChunkSink};
use crate::{
    error::ChatError,
    models::{Message, OpenAiConfig, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P},
};

const NAME: &str = "OpenAI";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/**
 * \brief OpenAI chat-completions adapter (bearer auth).
 */
pub struct OpenAiService {
    config: OpenAiConfig,
    base_url: String,
    client: Option<Client>,
}

impl OpenAiService {
    pub fn new(config: OpenAiConfig) -> Self {
        let client = build_client(NAME, !config.api_key.is_empty());
        Self {
            config,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    /**
     * \brief Points the adapter at another OpenAI-compatible host.
     */
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn body<'a>(&'a self, messages: &'a [Message], stream: bool) -> compat::CompletionBody<'a> {
        compat::CompletionBody {
            model: Some(&self.config.model),
            messages,
            temperature: self.config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            top_p: self.config.top_p.unwrap_or(DEFAULT_TOP_P),
            frequency_penalty: Some(self.config.frequency_penalty.unwrap_or(0.0)),
            presence_penalty: Some(self.config.presence_penalty.unwrap_or(0.0)),
            stop: None,
            stream,
        }
    }

    fn request(&self, client: &Client, body: &compat::CompletionBody<'_>) -> RequestBuilder {
        client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .json(body)
    }
}

#[async_trait]
impl ChatService for OpenAiService {
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
                let req = self.request(client, &self.body(messages, true));
                drain(compat::stream(NAME, req).await?, on_chunk).await
            }
            None => compat::complete(NAME, self.request(client, &self.body(messages, false))).await,
        }
    }
}
