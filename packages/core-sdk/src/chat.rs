//! Session glue: user actions in, store and adapter calls out.

use anyhow::Result;

use crate::{
    db::KeyValueStore,
    error::ChatError,
    llm::{create_service, ChatService, ChunkSink},
    models::{Conversation, Message, ProviderConfig},
    store::ConversationStore,
    telemetry, transfer,
};

/**
 * \brief Phase of the current turn. `Streaming` is entered on the first chunk.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

/**
 * \brief User-visible message produced by an action.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /** \brief The front end should open the configuration form. */
    pub opens_config: bool,
}

/**
 * \brief How a `send_message` call ended.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /** \brief Blank input; nothing happened. */
    Ignored,
    /** \brief Guard failed before any network call. */
    Rejected,
    Completed(String),
    /** \brief The adapter failed; the conversation keeps the user message only. */
    Failed,
}

/**
 * \brief In-memory view of the application state plus the adapter for the current config.
 */
pub struct ChatSession<S> {
    store: ConversationStore<S>,
    config: ProviderConfig,
    service: Box<dyn ChatService>,
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    state: TurnState,
    streaming: bool,
    notifications: Vec<Notification>,
}

impl<S: KeyValueStore> ChatSession<S> {
    /**
     * \brief Restores config, conversations and the active pointer from the store.
     * \details An unusable stored config falls back to the default one with an error notification.
     */
    pub fn load(store: ConversationStore<S>) -> Result<Self> {
        let mut notifications = Vec::new();
        let config = match store.get_config() {
            Ok(Some(config)) => config,
            Ok(None) => ProviderConfig::default(),
            Err(err)
                if err.downcast_ref::<ChatError>().is_some()
                    || err.downcast_ref::<serde_json::Error>().is_some() =>
            {
                telemetry::log_error("chat.load", &format!("{:#}", err));
                notifications.push(Notification {
                    level: NotificationLevel::Error,
                    message: format!("Stored configuration ignored: {:#}", err),
                    opens_config: true,
                });
                ProviderConfig::default()
            }
            Err(err) => return Err(err),
        };

        let conversations = store.get_conversations()?;
        let stored_active = store.get_active_conversation_id()?;
        let active_id = resolve_active(&conversations, stored_active);

        Ok(Self {
            service: create_service(&config),
            store,
            config,
            conversations,
            active_id,
            state: TurnState::Idle,
            streaming: true,
            notifications,
        })
    }

    pub fn store(&self) -> &ConversationStore<S> {
        &self.store
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn service(&self) -> &dyn ChatService {
        self.service.as_ref()
    }

    /**
     * \brief Replaces the adapter without touching the stored config.
     */
    pub fn set_service(&mut self, service: Box<dyn ChatService>) {
        self.service = service;
    }

    /**
     * \brief `false` makes turns use the non-streaming request path.
     */
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_index().map(|i| &self.conversations[i])
    }

    pub fn turn_state(&self) -> TurnState {
        self.state
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /**
     * \brief Creates `Conversation N`, makes it active and persists both.
     */
    pub fn new_conversation(&mut self) -> Result<&Conversation> {
        let name = format!("Conversation {}", self.conversations.len() + 1);
        let conversation = Conversation::new(name, Some(self.config.kind()));
        self.store.save_conversation(&conversation)?;
        self.store.set_active_conversation_id(&conversation.id)?;
        self.active_id = Some(conversation.id.clone());
        self.conversations.push(conversation);
        Ok(&self.conversations[self.conversations.len() - 1])
    }

    /**
     * \brief Returns `false` when no conversation has that id.
     */
    pub fn select_conversation(&mut self, id: &str) -> Result<bool> {
        if !self.conversations.iter().any(|c| c.id == id) {
            return Ok(false);
        }
        self.store.set_active_conversation_id(id)?;
        self.active_id = Some(id.to_string());
        Ok(true)
    }

    pub fn rename_conversation(&mut self, id: &str, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }
        let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        conversation.name = name.to_string();
        conversation.touch();
        self.store.save_conversation(conversation)?;
        Ok(true)
    }

    /**
     * \brief Deletes a conversation; if it was active the first remaining one takes over.
     */
    pub fn delete_conversation(&mut self, id: &str) -> Result<()> {
        self.conversations.retain(|c| c.id != id);
        self.store.delete_conversation(id)?;

        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.conversations.first().map(|c| c.id.clone());
            if let Some(next) = &self.active_id {
                self.store.set_active_conversation_id(next)?;
            }
        }
        Ok(())
    }

    /**
     * \brief Drops all turns of the active conversation, keeping a fresh system prompt.
     */
    pub fn clear_conversation(&mut self) -> Result<bool> {
        let Some(index) = self.active_index() else {
            return Ok(false);
        };
        let conversation = &mut self.conversations[index];
        conversation.reset();
        self.store.save_conversation(conversation)?;
        self.notify(NotificationLevel::Info, "Conversation cleared", false);
        Ok(true)
    }

    /**
     * \brief Persists the config wholesale and rebuilds the adapter.
     */
    pub fn save_config(&mut self, config: ProviderConfig) -> Result<()> {
        self.store.save_config(&config)?;
        self.service = create_service(&config);
        telemetry::log_event(
            "chat.config",
            &format!(
                "provider={} valid={}",
                config.kind(),
                self.service.validate_config()
            ),
        );
        self.config = config;
        self.notify(NotificationLevel::Info, "Configuration saved", false);
        Ok(())
    }

    pub fn export_data(&self) -> Result<String> {
        transfer::export_data(&self.store)
    }

    /**
     * \brief Imports a document and reloads config, conversations and the active pointer.
     * \details A rejected document yields `false` and an error notification carrying the reason.
     */
    pub fn import_data(&mut self, json_text: &str) -> Result<bool> {
        if let Err(err) = transfer::try_import_data(&self.store, json_text) {
            let Some(reason) = err.downcast_ref::<ChatError>() else {
                return Err(err);
            };
            telemetry::log_error("chat.import", &reason.to_string());
            let message = format!("Failed to import data: {}", reason);
            self.notify(NotificationLevel::Error, &message, false);
            return Ok(false);
        }

        if let Some(config) = self.store.get_config()? {
            self.service = create_service(&config);
            self.config = config;
        }
        self.conversations = self.store.get_conversations()?;
        let stored_active = self.store.get_active_conversation_id()?;
        self.active_id = resolve_active(&self.conversations, stored_active);
        self.notify(NotificationLevel::Info, "Data imported successfully", false);
        Ok(true)
    }

    /**
     * \brief Transcript of the active conversation, for copying.
     */
    pub fn transcript(&self) -> Option<String> {
        self.active_conversation().map(|c| c.transcript())
    }

    /**
     * \brief Runs one turn against the active conversation.
     * \param on_update Receives a snapshot of the conversation whenever the displayed state changes:
     *                  once per chunk while streaming, then the final or rolled-back record.
     * \details The user message is persisted before the request; the assistant reply only after it
     *          completes. Adapter errors become a single notification and `TurnOutcome::Failed`;
     *          storage errors propagate.
     */
    pub async fn send_message(
        &mut self,
        input: &str,
        mut on_update: impl FnMut(&Conversation) + Send,
    ) -> Result<TurnOutcome> {
        if input.trim().is_empty() {
            return Ok(TurnOutcome::Ignored);
        }
        let provider = self.service.provider_name();
        let Some(index) = self.active_index() else {
            self.notify(
                NotificationLevel::Error,
                "Create or select a conversation first",
                false,
            );
            return Ok(TurnOutcome::Rejected);
        };
        if !self.service.validate_config() {
            let err = ChatError::ConfigInvalid(provider.to_string());
            self.notify(NotificationLevel::Error, &err.to_string(), true);
            return Ok(TurnOutcome::Rejected);
        }

        let mut conversation = self.conversations[index].clone();
        conversation.messages.push(Message::user(input));
        conversation.provider = Some(self.config.kind().tag().to_string());
        conversation.touch();
        self.conversations[index] = conversation.clone();
        self.store.save_conversation(&conversation)?;
        on_update(&conversation);

        telemetry::log_event(
            "chat.send",
            &format!(
                "provider={} conversation={} prompt_len={} history={}",
                provider,
                conversation.id,
                input.len(),
                conversation.messages.len()
            ),
        );

        self.state = TurnState::AwaitingResponse;
        let history = conversation.messages.clone();
        let result = if self.streaming {
            let state = &mut self.state;
            let service = &self.service;
            let mut live = conversation.clone();
            live.messages.push(Message::assistant(""));
            let mut accumulator = String::new();
            let mut on_chunk = |chunk: &str| {
                *state = TurnState::Streaming;
                accumulator.push_str(chunk);
                if let Some(placeholder) = live.messages.last_mut() {
                    placeholder.content.clone_from(&accumulator);
                }
                on_update(&live);
            };
            let sink: &mut ChunkSink<'_> = &mut on_chunk;
            match service.send_message(&history, Some(sink)).await {
                Ok(_) => Ok(accumulator),
                Err(err) => Err(err),
            }
        } else {
            self.service.send_message(&history, None).await
        };
        self.state = TurnState::Idle;

        match result {
            Ok(reply) => {
                conversation.messages.push(Message::assistant(reply.clone()));
                conversation.touch();
                self.conversations[index] = conversation.clone();
                self.store.save_conversation(&conversation)?;
                on_update(&conversation);
                telemetry::log_event(
                    "chat.reply",
                    &format!(
                        "provider={} conversation={} reply_len={}",
                        provider,
                        conversation.id,
                        reply.len()
                    ),
                );
                Ok(TurnOutcome::Completed(reply))
            }
            Err(err) => {
                conversation.touch();
                self.conversations[index] = conversation.clone();
                self.store.save_conversation(&conversation)?;
                on_update(&conversation);
                telemetry::log_error(
                    "chat.send",
                    &format!("provider={} error={}", provider, err),
                );
                self.notify(NotificationLevel::Error, &err.to_string(), err.is_configuration());
                Ok(TurnOutcome::Failed)
            }
        }
    }

    fn active_index(&self) -> Option<usize> {
        let id = self.active_id.as_deref()?;
        self.conversations.iter().position(|c| c.id == id)
    }

    fn notify(&mut self, level: NotificationLevel, message: &str, opens_config: bool) {
        self.notifications.push(Notification {
            level,
            message: message.to_string(),
            opens_config,
        });
    }
}

/**
 * \brief Keeps the stored id if it still exists, else falls back to the first conversation.
 */
fn resolve_active(conversations: &[Conversation], stored: Option<String>) -> Option<String> {
    match stored {
        Some(id) if conversations.iter().any(|c| c.id == id) => Some(id),
        _ => conversations.first().map(|c| c.id.clone()),
    }
}
