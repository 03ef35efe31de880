mod backend;
mod message;
mod provider;
mod retry;

pub use backend::HostedProvider;
pub use message::{Message, MessageRole, ToolCall, ToolResult};
pub use provider::{LlmProvider, LlmResponse};
pub use retry::{RetryConfig, is_retryable_error, retry_with_backoff};
