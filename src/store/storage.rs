use anyhow::Result;
use async_trait::async_trait;

use super::{Conversation, ConversationSummary, CustomerRecord, NewMessage, StoredMessage};

/// Durable home of conversations, their messages and customer records
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// All conversations, most recently updated first
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    async fn set_active(&self, id: &str, active: bool) -> Result<()>;

    /// Remove a conversation with its messages and summary; false if unknown
    async fn delete_conversation(&self, id: &str) -> Result<bool>;

    /// Append a message, assigning the next `seq` of the conversation.
    ///
    /// Appends to one conversation are serialized; appends to different
    /// conversations proceed independently.
    async fn append_message(&self, conversation_id: &str, message: NewMessage)
    -> Result<StoredMessage>;

    /// Messages ordered by `seq`
    async fn messages(&self, conversation_id: &str, include_deleted: bool)
    -> Result<Vec<StoredMessage>>;

    /// Mark a message deleted; false if it does not exist
    async fn soft_delete_message(&self, conversation_id: &str, message_id: &str) -> Result<bool>;

    async fn save_summary(&self, summary: &ConversationSummary) -> Result<()>;

    async fn summary(&self, conversation_id: &str) -> Result<Option<ConversationSummary>>;

    async fn upsert_customer(&self, customer: &CustomerRecord) -> Result<()>;

    async fn get_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>>;
}
