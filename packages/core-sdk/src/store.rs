use anyhow::{Context, Result};
use serde_json::Value;

use crate::{
    db::KeyValueStore,
    models::{Conversation, ProviderConfig},
};

pub const CONFIG_KEY: &str = "config";
pub const CONVERSATIONS_KEY: &str = "conversations";
pub const ACTIVE_CONVERSATION_KEY: &str = "activeConversationId";
pub const TELEMETRY_KEY: &str = "telemetryEnabled";

/**
 * \brief Conversation and config persistence over a key-value backend.
 * \details Three independent keys; a crash between writes can leave the active id dangling.
 */
pub struct ConversationStore<S> {
    kv: S,
}

impl<S: KeyValueStore> ConversationStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn backend(&self) -> &S {
        &self.kv
    }

    /**
     * \brief Replaces the stored config wholesale.
     */
    pub fn save_config(&self, config: &ProviderConfig) -> Result<()> {
        let text = serde_json::to_string(config)?;
        self.kv.set(CONFIG_KEY, &text)
    }

    /**
     * \brief Reads the config, tagging legacy azure records on the way out.
     */
    pub fn get_config(&self) -> Result<Option<ProviderConfig>> {
        let Some(text) = self.kv.get(CONFIG_KEY)? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&text).context("stored config is not JSON")?;
        let config = ProviderConfig::from_value(value)?;
        Ok(Some(config))
    }

    /**
     * \brief Upsert by id: replaces in place, otherwise appends.
     */
    pub fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.get_conversations()?;
        match conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation.clone(),
            None => conversations.push(conversation.clone()),
        }
        self.put_conversations(&conversations)
    }

    pub fn get_conversations(&self) -> Result<Vec<Conversation>> {
        match self.kv.get(CONVERSATIONS_KEY)? {
            Some(text) => {
                serde_json::from_str(&text).context("stored conversation list is malformed")
            }
            None => Ok(Vec::new()),
        }
    }

    /**
     * \brief Overwrites the whole conversation list.
     */
    pub fn put_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        let text = serde_json::to_string(conversations)?;
        self.kv.set(CONVERSATIONS_KEY, &text)
    }

    /**
     * \brief Removes a conversation; clears the active pointer if it pointed at it.
     */
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        let conversations: Vec<Conversation> = self
            .get_conversations()?
            .into_iter()
            .filter(|c| c.id != id)
            .collect();
        self.put_conversations(&conversations)?;

        if self.get_active_conversation_id()?.as_deref() == Some(id) {
            self.clear_active_conversation_id()?;
        }
        Ok(())
    }

    pub fn set_active_conversation_id(&self, id: &str) -> Result<()> {
        self.kv.set(ACTIVE_CONVERSATION_KEY, id)
    }

    pub fn clear_active_conversation_id(&self) -> Result<()> {
        self.kv.remove(ACTIVE_CONVERSATION_KEY)
    }

    pub fn get_active_conversation_id(&self) -> Result<Option<String>> {
        self.kv.get(ACTIVE_CONVERSATION_KEY)
    }

    pub fn get_telemetry_enabled(&self) -> Result<bool> {
        Ok(self
            .kv
            .get(TELEMETRY_KEY)?
            .map(|v| v == "1")
            .unwrap_or(false))
    }

    pub fn set_telemetry_enabled(&self, enabled: bool) -> Result<()> {
        self.kv
            .set(TELEMETRY_KEY, if enabled { "1" } else { "0" })
    }
}
