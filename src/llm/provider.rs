use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Message, ToolCall};
use crate::tools::RuntimeTool;

/// Response from the model for one round-trip
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: Message,
    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,
}

/// The agent runtime's model backend.
///
/// Tools arrive as [`RuntimeTool`] adapters; providers only read their
/// name, description and parameter schema.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[RuntimeTool],
    ) -> Result<LlmResponse>;

    /// Like [`chat`](Self::chat), sending each text delta through `token_sender`
    /// as it arrives.
    ///
    /// The default sends the whole reply as one delta.
    async fn chat_stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[RuntimeTool],
        token_sender: mpsc::Sender<String>,
    ) -> Result<LlmResponse> {
        let response = self.chat(system, messages, tools).await?;
        if !response.message.content.is_empty() {
            let _ = token_sender.send(response.message.content.clone()).await;
        }
        Ok(response)
    }

    /// Whether [`chat_stream`](Self::chat_stream) emits incremental deltas
    fn supports_streaming(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}
