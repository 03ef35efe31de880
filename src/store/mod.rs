mod locks;
mod sqlite;
mod storage;
mod types;

pub(crate) use locks::KeyedLocks;
pub use sqlite::SqliteStore;
pub use storage::ConversationStore;
pub use types::{
    Conversation, ConversationSummary, CustomerRecord, Identity, NewMessage, Role, Scenario,
    StoredMessage,
};
