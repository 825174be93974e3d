pub mod chat;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod store;
pub mod telemetry;
pub mod transfer;

/**
 * \brief Re-exports of the modules front ends reach for most.
 */
pub mod prelude {
    pub use crate::chat::{ChatSession, Notification, NotificationLevel, TurnOutcome, TurnState};
    pub use crate::db::{self, KeyValueStore, MemoryStore, SqliteStore};
    pub use crate::error::ChatError;
    pub use crate::llm::{self, create_service, ChatService, ChunkSink};
    pub use crate::models::{self, Conversation, Message, ProviderConfig, ProviderKind, Role};
    pub use crate::store::ConversationStore;
    pub use crate::telemetry;
    pub use crate::transfer;
}
