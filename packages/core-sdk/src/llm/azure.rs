use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use super::{build_client, compat, drain, ChatService, ChunkSink};
use crate::{
    error::ChatError,
    models::{
        AzureConfig, Message, DEFAULT_AZURE_API_VERSION, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
        DEFAULT_TOP_P,
    },
};

const NAME: &str = "Azure OpenAI";

/**
 * \brief Azure OpenAI adapter: deployment-scoped URL, `api-key` header.
 */
pub struct AzureOpenAiService {
    config: AzureConfig,
    client: Option<Client>,
}

impl AzureOpenAiService {
    pub fn new(config: AzureConfig) -> Self {
        let client = build_client(NAME, config.is_valid());
        Self { config, client }
    }

    /**
     * \brief `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=…`
     */
    pub fn completions_url(&self) -> String {
        let api_version = if self.config.api_version.is_empty() {
            DEFAULT_AZURE_API_VERSION
        } else {
            self.config.api_version.as_str()
        };
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment_name,
            api_version
        )
    }

    fn body<'a>(&'a self, messages: &'a [Message], stream: bool) -> compat::CompletionBody<'a> {
        compat::CompletionBody {
            model: Some(&self.config.deployment_name),
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
            .post(self.completions_url())
            .header("api-key", &self.config.api_key)
            .json(body)
    }
}

#[async_trait]
impl ChatService for AzureOpenAiService {
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
