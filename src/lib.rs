pub mod chat;
pub mod config;
mod error;
pub mod llm;
pub mod store;
pub mod tools;

pub use chat::{ChatController, ChatControllerBuilder, ChatEvent, ChatResponse, TurnHandle};
pub use config::{AppConfig, ToolPolicy};
pub use error::AdvisorError;
pub use llm::{HostedProvider, LlmProvider, LlmResponse, Message, MessageRole, ToolCall};
pub use store::{ConversationStore, Scenario, SqliteStore};
pub use tools::{
    DiscoveryReport, RuntimeTool, Tool, ToolCatalog, ToolContext, ToolError, ToolOutput,
    ToolPayload, ToolRegistry, ToolUnit,
};
