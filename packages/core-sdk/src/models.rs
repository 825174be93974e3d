use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::ChatError;

/** \brief System prompt every new or cleared conversation starts with. */
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 800;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_AZURE_API_VERSION: &str = "2023-05-15";

/**
 * \brief Message role, serialized in lowercase as the vendor APIs expect.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/**
 * \brief One chat turn as stored and as handed to the adapters.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /** \brief system/user/assistant */
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/**
 * \brief Persisted conversation record.
 * \details `messages[0]` is always the system prompt; it is never displayed.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub created_at: String,
    pub updated_at: String,
    /** \brief Tag of the provider that last answered in this conversation. */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Conversation {
    /**
     * \brief Fresh conversation seeded with the default system prompt.
     */
    pub fn new(name: impl Into<String>, provider: Option<ProviderKind>) -> Self {
        let now = now_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            messages: vec![Message::system(DEFAULT_SYSTEM_PROMPT)],
            created_at: now.clone(),
            updated_at: now,
            provider: provider.map(|p| p.tag().to_string()),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }

    /**
     * \brief Drops every turn and re-seeds the system prompt.
     */
    pub fn reset(&mut self) {
        self.messages = vec![Message::system(DEFAULT_SYSTEM_PROMPT)];
        self.touch();
    }

    /**
     * \brief Messages shown to the user (everything but the system prompt).
     */
    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /**
     * \brief Plain-text transcript, one `User:`/`Assistant:` block per message.
     */
    pub fn transcript(&self) -> String {
        self.visible_messages()
            .map(|m| {
                let speaker = if m.role == Role::User {
                    "User"
                } else {
                    "Assistant"
                };
                format!("{}: {}", speaker, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/**
 * \brief Closed set of supported providers.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Azure,
    OpenAi,
    Claude,
    Gemini,
    Groq,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Azure,
        ProviderKind::OpenAi,
        ProviderKind::Claude,
        ProviderKind::Gemini,
        ProviderKind::Groq,
    ];

    /** \brief Discriminant used in the persisted `provider` field. */
    pub fn tag(&self) -> &'static str {
        match self {
            ProviderKind::Azure => "azure",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
        }
    }

    /** \brief Display label. */
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Azure => "Azure OpenAI",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Claude => "Claude",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Groq => "Groq",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ProviderKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.tag() == s)
            .ok_or_else(|| ChatError::UnsupportedProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub deployment_name: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

/**
 * \brief Anthropic settings. `max_tokens` has no default and must be set.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroqConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl AzureConfig {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.endpoint.is_empty() && !self.deployment_name.is_empty()
    }
}

impl OpenAiConfig {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.model.is_empty()
    }
}

impl ClaudeConfig {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.model.is_empty() && self.max_tokens.unwrap_or(0) > 0
    }
}

impl GeminiConfig {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.model.is_empty()
    }
}

impl GroqConfig {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.model.is_empty()
    }
}

/**
 * \brief Provider configuration, tagged by the `provider` field.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Azure(AzureConfig),
    OpenAi(OpenAiConfig),
    Claude(ClaudeConfig),
    Gemini(GeminiConfig),
    Groq(GroqConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::OpenAi(OpenAiConfig {
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            top_p: Some(DEFAULT_TOP_P),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
        })
    }
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Azure(_) => ProviderKind::Azure,
            ProviderConfig::OpenAi(_) => ProviderKind::OpenAi,
            ProviderConfig::Claude(_) => ProviderKind::Claude,
            ProviderConfig::Gemini(_) => ProviderKind::Gemini,
            ProviderConfig::Groq(_) => ProviderKind::Groq,
        }
    }

    pub fn api_key(&self) -> &str {
        match self {
            ProviderConfig::Azure(c) => &c.api_key,
            ProviderConfig::OpenAi(c) => &c.api_key,
            ProviderConfig::Claude(c) => &c.api_key,
            ProviderConfig::Gemini(c) => &c.api_key,
            ProviderConfig::Groq(c) => &c.api_key,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        match self {
            ProviderConfig::Azure(c) => c.temperature,
            ProviderConfig::OpenAi(c) => c.temperature,
            ProviderConfig::Claude(c) => c.temperature,
            ProviderConfig::Gemini(c) => c.temperature,
            ProviderConfig::Groq(c) => c.temperature,
        }
    }

    pub fn max_tokens(&self) -> Option<u32> {
        match self {
            ProviderConfig::Azure(c) => c.max_tokens,
            ProviderConfig::OpenAi(c) => c.max_tokens,
            ProviderConfig::Claude(c) => c.max_tokens,
            ProviderConfig::Gemini(c) => c.max_tokens,
            ProviderConfig::Groq(c) => c.max_tokens,
        }
    }

    /**
     * \brief Model or deployment name the requests will target.
     */
    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::Azure(c) => &c.deployment_name,
            ProviderConfig::OpenAi(c) => &c.model,
            ProviderConfig::Claude(c) => &c.model,
            ProviderConfig::Gemini(c) => &c.model,
            ProviderConfig::Groq(c) => &c.model,
        }
    }

    /**
     * \brief All required fields of the active variant are present and non-empty.
     */
    pub fn is_valid(&self) -> bool {
        match self {
            ProviderConfig::Azure(c) => c.is_valid(),
            ProviderConfig::OpenAi(c) => c.is_valid(),
            ProviderConfig::Claude(c) => c.is_valid(),
            ProviderConfig::Gemini(c) => c.is_valid(),
            ProviderConfig::Groq(c) => c.is_valid(),
        }
    }

    /**
     * \brief Starting config when the user switches to `kind`.
     * \details Key, temperature and max tokens carry over from `current`.
     */
    pub fn default_for(kind: ProviderKind, current: &ProviderConfig) -> Self {
        let api_key = current.api_key().to_string();
        let temperature = Some(current.temperature().unwrap_or(DEFAULT_TEMPERATURE));
        let max_tokens = Some(current.max_tokens().unwrap_or(DEFAULT_MAX_TOKENS));
        match kind {
            ProviderKind::Azure => ProviderConfig::Azure(AzureConfig {
                api_key,
                endpoint: String::new(),
                deployment_name: String::new(),
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
                temperature,
                max_tokens,
                top_p: Some(DEFAULT_TOP_P),
                frequency_penalty: Some(0.0),
                presence_penalty: Some(0.0),
            }),
            ProviderKind::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key,
                model: "gpt-4-turbo-preview".to_string(),
                temperature,
                max_tokens,
                top_p: Some(DEFAULT_TOP_P),
                frequency_penalty: Some(0.0),
                presence_penalty: Some(0.0),
            }),
            ProviderKind::Claude => ProviderConfig::Claude(ClaudeConfig {
                api_key,
                model: "claude-3-opus-20240229".to_string(),
                temperature,
                max_tokens: Some(4096),
            }),
            ProviderKind::Gemini => ProviderConfig::Gemini(GeminiConfig {
                api_key,
                model: "gemini-pro".to_string(),
                temperature,
                max_tokens,
                top_p: Some(DEFAULT_TOP_P),
                top_k: Some(DEFAULT_TOP_K),
            }),
            ProviderKind::Groq => ProviderConfig::Groq(GroqConfig {
                api_key,
                model: "mixtral-8x7b-32768".to_string(),
                temperature,
                max_tokens,
                top_p: Some(DEFAULT_TOP_P),
                stop: None,
            }),
        }
    }

    /**
     * \brief Parses a stored or imported config object, applying the legacy azure upgrade first.
     */
    pub fn from_value(mut value: Value) -> Result<Self, ChatError> {
        upgrade_legacy_config(&mut value);
        let tag = match value.get("provider") {
            Some(Value::String(tag)) => tag.clone(),
            Some(other) => return Err(ChatError::UnsupportedProvider(other.to_string())),
            None => return Err(ChatError::UnsupportedProvider("<missing>".to_string())),
        };
        tag.parse::<ProviderKind>()?;
        serde_json::from_value(value).map_err(|e| ChatError::ImportParse(e.to_string()))
    }
}

/**
 * \brief Tags pre-multi-provider configs as azure.
 * \details Applies only to objects without a `provider` field that carry an `endpoint`.
 * Returns whether the value was rewritten.
 */
pub fn upgrade_legacy_config(value: &mut Value) -> bool {
    let Some(obj) = value.as_object_mut() else {
        return false;
    };
    if obj.contains_key("provider") || !obj.contains_key("endpoint") {
        return false;
    }
    obj.insert("provider".to_string(), Value::String("azure".to_string()));
    true
}
