use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use llm::builder::{FunctionBuilder, LLMBackend, LLMBuilder};
use llm::chat::{ChatMessage, ChatRole, FunctionTool, MessageType, StreamChunk, Tool as LlmTool};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use super::retry::{RetryConfig, retry_with_backoff};
use super::{LlmProvider, LlmResponse, Message, MessageRole, ToolCall};
use crate::tools::RuntimeTool;

const DEFAULT_MAX_TOKENS: u32 = 4096;
const API_TIMEOUT_SECS: u64 = 120;

/// A hosted model reached through the `llm` crate
pub struct HostedProvider {
    backend: LLMBackend,
    label: &'static str,
    model: String,
    api_key: String,
    max_tokens: u32,
    retry: RetryConfig,
}

impl HostedProvider {
    fn from_env(
        backend: LLMBackend,
        label: &'static str,
        key_var: &str,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key =
            std::env::var(key_var).with_context(|| format!("{} environment variable not set", key_var))?;
        Ok(Self {
            backend,
            label,
            model: model.into(),
            api_key,
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryConfig::default(),
        })
    }

    /// Anthropic, keyed by `ANTHROPIC_API_KEY`
    pub fn anthropic(model: Option<&str>) -> Result<Self> {
        Self::from_env(
            LLMBackend::Anthropic,
            "anthropic",
            "ANTHROPIC_API_KEY",
            model.unwrap_or("claude-sonnet-4-20250514"),
        )
    }

    /// OpenAI, keyed by `OPENAI_API_KEY`
    pub fn openai(model: Option<&str>) -> Result<Self> {
        Self::from_env(
            LLMBackend::OpenAI,
            "openai",
            "OPENAI_API_KEY",
            model.unwrap_or("gpt-4o"),
        )
    }

    /// Resolve a provider from its configured name
    pub fn by_name(provider: &str, model: Option<&str>) -> Result<Self> {
        match provider {
            "anthropic" => Self::anthropic(model),
            "openai" => Self::openai(model),
            other => anyhow::bail!("unknown provider: {}", other),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    // The llm crate fixes the tool list at build time, so each call builds a client.
    fn client(&self, system: &str, tools: &[LlmTool]) -> Result<Box<dyn llm::LLMProvider>> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .api_key(&self.api_key)
            .model(&self.model)
            .system(system)
            .max_tokens(self.max_tokens);

        for tool in tools {
            builder = builder.function(
                FunctionBuilder::new(&tool.function.name)
                    .description(&tool.function.description)
                    .json_schema(tool.function.parameters.clone()),
            );
        }

        builder.build().context("failed to build LLM client")
    }

    async fn chat_once(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[LlmTool],
    ) -> Result<LlmResponse> {
        let client = self.client(system, tools)?;
        let limit = Duration::from_secs(API_TIMEOUT_SECS);

        let call = async {
            if tools.is_empty() {
                client.chat(messages).await
            } else {
                client.chat_with_tools(messages, Some(tools)).await
            }
        };
        let response = timeout(limit, call)
            .await
            .with_context(|| format!("{} call timed out after {}s", self.label, API_TIMEOUT_SECS))?
            .with_context(|| format!("failed to call {} API", self.label))?;

        let tool_calls: Vec<ToolCall> = response
            .tool_calls()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| to_tool_call(&tc.id, &tc.function.name, &tc.function.arguments))
                    .collect()
            })
            .unwrap_or_default();

        let content = response.text().unwrap_or_default();
        if content.is_empty() && tool_calls.is_empty() {
            warn!(provider = self.label, "model returned neither text nor tool calls");
        }

        Ok(LlmResponse {
            message: Message::assistant(content),
            tool_calls,
        })
    }
}

/// Describe runtime tools the way the `llm` crate expects
fn build_llm_tools(tools: &[RuntimeTool]) -> Vec<LlmTool> {
    tools
        .iter()
        .map(|t| LlmTool {
            tool_type: "function".to_string(),
            function: FunctionTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            },
            cache_control: None,
        })
        .collect()
}

fn to_tool_call(id: &str, name: &str, raw_arguments: &str) -> ToolCall {
    let arguments = serde_json::from_str(raw_arguments).unwrap_or_else(|e| {
        warn!(tool = %name, error = %e, "tool call arguments are not valid JSON");
        serde_json::json!({ "error": format!("unparseable arguments: {}", e) })
    });
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

fn convert_message(msg: &Message) -> Option<ChatMessage> {
    match msg.role {
        MessageRole::User => Some(ChatMessage {
            role: ChatRole::User,
            message_type: MessageType::Text,
            content: msg.content.clone(),
        }),
        MessageRole::Assistant if msg.tool_calls.is_empty() => Some(ChatMessage {
            role: ChatRole::Assistant,
            message_type: MessageType::Text,
            content: msg.content.clone(),
        }),
        MessageRole::Assistant => {
            let calls = msg
                .tool_calls
                .iter()
                .map(|tc| llm::ToolCall {
                    id: tc.id.clone(),
                    call_type: "function".to_string(),
                    function: llm::FunctionCall {
                        name: tc.name.clone(),
                        arguments: tc.arguments.to_string(),
                    },
                })
                .collect();
            Some(ChatMessage {
                role: ChatRole::Assistant,
                message_type: MessageType::ToolUse(calls),
                content: msg.content.clone(),
            })
        }
        MessageRole::Tool => msg.tool_result.as_ref().map(|result| ChatMessage {
            role: ChatRole::User,
            message_type: MessageType::ToolResult(vec![llm::ToolCall {
                id: result.tool_call_id.clone(),
                call_type: "function".to_string(),
                function: llm::FunctionCall {
                    name: result.tool_name.clone(),
                    arguments: result.result.clone(),
                },
            }]),
            content: String::new(),
        }),
        // System text travels through the builder, not the transcript.
        MessageRole::System => None,
    }
}

#[async_trait]
impl LlmProvider for HostedProvider {
    fn name(&self) -> &str {
        self.label
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[RuntimeTool],
    ) -> Result<LlmResponse> {
        let llm_tools = build_llm_tools(tools);
        let chat_messages: Vec<ChatMessage> = messages.iter().filter_map(convert_message).collect();

        retry_with_backoff(&self.retry, self.label, || {
            self.chat_once(system, &chat_messages, &llm_tools)
        })
        .await
    }

    async fn chat_stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[RuntimeTool],
        token_sender: mpsc::Sender<String>,
    ) -> Result<LlmResponse> {
        let llm_tools = build_llm_tools(tools);
        let client = self.client(system, &llm_tools)?;
        let chat_messages: Vec<ChatMessage> = messages.iter().filter_map(convert_message).collect();

        let mut stream = timeout(
            Duration::from_secs(API_TIMEOUT_SECS),
            client.chat_stream_with_tools(&chat_messages, Some(&llm_tools)),
        )
        .await
        .with_context(|| format!("{} stream timed out after {}s", self.label, API_TIMEOUT_SECS))?
        .with_context(|| format!("failed to start {} stream", self.label))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(StreamChunk::Text(text)) => {
                    content.push_str(&text);
                    if token_sender.send(text).await.is_err() {
                        debug!(provider = self.label, "token receiver closed, stopping stream");
                        break;
                    }
                }
                Ok(StreamChunk::ToolUseComplete { tool_call, .. }) => {
                    tool_calls.push(to_tool_call(
                        &tool_call.id,
                        &tool_call.function.name,
                        &tool_call.function.arguments,
                    ));
                }
                Ok(StreamChunk::Done { .. }) => break,
                Ok(_) => {}
                Err(e) => anyhow::bail!("{} stream error: {}", self.label, e),
            }
        }

        Ok(LlmResponse {
            message: Message::assistant(content),
            tool_calls,
        })
    }
}
