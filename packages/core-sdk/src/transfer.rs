//! Whole-state export and import as a JSON document.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::{
    db::KeyValueStore,
    error::ChatError,
    models::{Conversation, ProviderConfig},
    store::ConversationStore,
    telemetry,
};

pub const EXPORT_VERSION: &str = "2.0";

#[derive(Serialize)]
struct ExportDocument<'a> {
    config: Option<&'a ProviderConfig>,
    conversations: &'a [Conversation],
    version: &'static str,
}

/**
 * \brief Pretty-printed `{config, conversations, version}` document.
 */
pub fn export_data<S: KeyValueStore>(store: &ConversationStore<S>) -> Result<String> {
    let config = store.get_config()?;
    let conversations = store.get_conversations()?;
    let doc = ExportDocument {
        config: config.as_ref(),
        conversations: &conversations,
        version: EXPORT_VERSION,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/**
 * \brief Applies an export document; `false` on a malformed document.
 * \details A rejected document leaves the store untouched. Storage errors still propagate.
 */
pub fn import_data<S: KeyValueStore>(store: &ConversationStore<S>, json_text: &str) -> Result<bool> {
    match try_import_data(store, json_text) {
        Ok(()) => Ok(true),
        Err(err) => match err.downcast_ref::<ChatError>() {
            Some(chat_err) => {
                telemetry::log_error("transfer.import", &chat_err.to_string());
                Ok(false)
            }
            None => Err(err),
        },
    }
}

/**
 * \brief Fallible import: validates the whole document, then overwrites config and conversations.
 * \details Documents from before versioning (no `version`, untagged azure config) are accepted.
 */
pub fn try_import_data<S: KeyValueStore>(store: &ConversationStore<S>, json_text: &str) -> Result<()> {
    let doc: Value =
        serde_json::from_str(json_text).map_err(|e| ChatError::ImportParse(e.to_string()))?;
    let Some(obj) = doc.as_object() else {
        return Err(ChatError::ImportParse("expected a JSON object".to_string()).into());
    };

    let config = match obj.get("config") {
        Some(Value::Null) | None => None,
        Some(value) => Some(ProviderConfig::from_value(value.clone()).map_err(|e| match e {
            ChatError::ImportParse(msg) => ChatError::ImportParse(format!("config: {}", msg)),
            other => other,
        })?),
    };

    let conversations = match obj.get("conversations") {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    serde_json::from_value::<Conversation>(item.clone()).map_err(|e| {
                        ChatError::ImportParse(format!("conversations[{}]: {}", i, e))
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
        ),
        _ => None,
    };

    if let Some(config) = &config {
        store.save_config(config)?;
    }
    if let Some(conversations) = &conversations {
        store.put_conversations(conversations)?;
    }

    telemetry::log_event(
        "transfer.import",
        &format!(
            "version={} config={} conversations={}",
            obj.get("version").and_then(|v| v.as_str()).unwrap_or("1.0"),
            config.is_some(),
            conversations.as_ref().map(|c| c.len()).unwrap_or(0)
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{ClaudeConfig, Message, ProviderKind};

    fn seeded_store() -> ConversationStore<MemoryStore> {
        let store = ConversationStore::new(MemoryStore::new());
        store
            .save_config(&ProviderConfig::Claude(ClaudeConfig {
                api_key: "k".into(),
                model: "claude-3-haiku-20240307".into(),
                temperature: Some(0.3),
                max_tokens: Some(1024),
            }))
            .unwrap();
        let mut first = Conversation::new("first", Some(ProviderKind::Claude));
        first.messages.push(Message::user("Hello"));
        first.messages.push(Message::assistant("Hi there"));
        store.save_conversation(&first).unwrap();
        store
            .save_conversation(&Conversation::new("second", None))
            .unwrap();
        store
    }

    #[test]
    fn test_export_document_shape() {
        let store = seeded_store();
        let text = export_data(&store).expect("export");
        assert!(text.contains('\n'), "export should be pretty-printed");
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["version"], "2.0");
        assert_eq!(v["config"]["provider"], "claude");
        assert_eq!(v["conversations"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_export_without_config_writes_null() {
        let store = ConversationStore::new(MemoryStore::new());
        let v: Value = serde_json::from_str(&export_data(&store).unwrap()).unwrap();
        assert!(v["config"].is_null());
        assert_eq!(v["conversations"], Value::Array(vec![]));
    }

    #[test]
    fn test_round_trip_restores_config_and_order() {
        let source = seeded_store();
        let text = export_data(&source).unwrap();

        let target = ConversationStore::new(MemoryStore::new());
        assert!(import_data(&target, &text).unwrap());
        assert_eq!(target.get_config().unwrap(), source.get_config().unwrap());
        assert_eq!(
            target.get_conversations().unwrap(),
            source.get_conversations().unwrap()
        );
    }

    #[test]
    fn test_not_json_returns_false_and_keeps_state() {
        let store = seeded_store();
        let before_cfg = store.get_config().unwrap();
        let before_convs = store.get_conversations().unwrap();

        assert!(!import_data(&store, "not json").unwrap());
        assert_eq!(store.get_config().unwrap(), before_cfg);
        assert_eq!(store.get_conversations().unwrap(), before_convs);
    }

    #[test]
    fn test_bad_conversation_rejects_whole_document() {
        let store = seeded_store();
        let before_cfg = store.get_config().unwrap();
        let doc = r#"{
            "config": {"provider": "groq", "apiKey": "g", "model": "mixtral-8x7b-32768"},
            "conversations": [{"id": 1}]
        }"#;
        let err = try_import_data(&store, doc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::ImportParse(_))
        ));
        assert_eq!(store.get_config().unwrap(), before_cfg);
    }

    #[test]
    fn test_empty_object_is_accepted_without_changes() {
        let store = seeded_store();
        let before = store.get_conversations().unwrap();
        assert!(import_data(&store, "{}").unwrap());
        assert_eq!(store.get_conversations().unwrap(), before);
    }

    #[test]
    fn test_conversations_are_replaced_not_merged() {
        let store = seeded_store();
        let incoming = Conversation::new("only", None);
        let doc = serde_json::json!({ "conversations": [incoming.clone()] }).to_string();
        assert!(import_data(&store, &doc).unwrap());
        assert_eq!(store.get_conversations().unwrap(), vec![incoming]);
        assert_eq!(store.get_config().unwrap().unwrap().kind(), ProviderKind::Claude);
    }

    #[test]
    fn test_legacy_v1_document_upgrades_azure_config() {
        let store = ConversationStore::new(MemoryStore::new());
        let doc = r#"{
            "config": {
                "apiKey": "k",
                "endpoint": "https://legacy.openai.azure.com",
                "deploymentName": "gpt35",
                "apiVersion": "2023-05-15",
                "temperature": 0.7,
                "maxTokens": 800,
                "topP": 0.95,
                "frequencyPenalty": 0,
                "presencePenalty": 0
            },
            "conversations": [{
                "id": "c1",
                "name": "Old chat",
                "messages": [{"role": "system", "content": "You are a helpful assistant."}],
                "createdAt": "2024-01-01T00:00:00.000Z",
                "updatedAt": "2024-01-01T00:00:00.000Z"
            }]
        }"#;
        assert!(import_data(&store, doc).unwrap());
        let cfg = store.get_config().unwrap().unwrap();
        assert_eq!(cfg.kind(), ProviderKind::Azure);
        assert!(cfg.is_valid());
        let convs = store.get_conversations().unwrap();
        assert_eq!(convs[0].provider, None);
    }

    #[test]
    fn test_unknown_provider_rejects_document() {
        let store = seeded_store();
        let doc = r#"{"config": {"provider": "cohere", "apiKey": "k"}}"#;
        assert!(!import_data(&store, doc).unwrap());
        assert_eq!(store.get_config().unwrap().unwrap().kind(), ProviderKind::Claude);
    }
}
