#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use advisor_chat::tools::builtin::{DebtPayoffTool, LetterCounterTool};
use advisor_chat::{
    ChatController, LlmProvider, LlmResponse, Message, RuntimeTool, SqliteStore, Tool, ToolCall,
    ToolCatalog, ToolContext, ToolRegistry, tool_catalog,
};

/// Message lists a mock was called with, one entry per call.
pub type CallLog = Arc<Mutex<Vec<Vec<Message>>>>;

/// A mock LLM provider that replays scripted responses in order.
pub struct MockLlmProvider {
    responses: Mutex<VecDeque<Result<LlmResponse, String>>>,
    seen: CallLog,
}

impl MockLlmProvider {
    /// Create a mock that returns a single text response with no tool calls.
    pub fn single_response(text: &str) -> Self {
        Self::with_responses(vec![text_response(text)])
    }

    /// Create a mock from a sequence of responses (popped in order).
    pub fn with_responses(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            seen: CallLog::default(),
        }
    }

    /// Queue a provider failure after the scripted responses.
    pub fn then_fail(self, error: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(error.to_string()));
        self
    }

    /// Shared handle on the calls this mock receives.
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn chat(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[RuntimeTool],
    ) -> Result<LlmResponse> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let mut queue = self.responses.lock().unwrap();
        match queue.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(anyhow::anyhow!(error)),
            None => Err(anyhow::anyhow!(
                "MockLlmProvider: no more responses in queue"
            )),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A streaming mock that sends its reply in fragments with a pause between each.
pub struct SlowStreamProvider {
    fragments: Vec<String>,
    delay: Duration,
}

impl SlowStreamProvider {
    pub fn new(fragments: &[&str], delay: Duration) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            delay,
        }
    }
}

#[async_trait]
impl LlmProvider for SlowStreamProvider {
    async fn chat(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[RuntimeTool],
    ) -> Result<LlmResponse> {
        Ok(text_response(&self.fragments.concat()))
    }

    async fn chat_stream(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[RuntimeTool],
        token_sender: mpsc::Sender<String>,
    ) -> Result<LlmResponse> {
        for fragment in &self.fragments {
            if token_sender.send(fragment.clone()).await.is_err() {
                break;
            }
            tokio::time::sleep(self.delay).await;
        }
        Ok(text_response(&self.fragments.concat()))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "slow-stream"
    }
}

/// Replies "reply to <last user message>" after a pause.
pub struct SlowReplyProvider {
    delay: Duration,
}

impl SlowReplyProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl LlmProvider for SlowReplyProvider {
    async fn chat(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[RuntimeTool],
    ) -> Result<LlmResponse> {
        tokio::time::sleep(self.delay).await;
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(text_response(&format!("reply to {} ({} in context)", last, messages.len())))
    }

    fn name(&self) -> &str {
        "slow-reply"
    }
}

pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        message: Message::assistant(text),
        tool_calls: vec![],
    }
}

pub fn tool_response(
    text: &str,
    id: &str,
    name: &str,
    arguments: serde_json::Value,
) -> LlmResponse {
    let call = ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    };
    LlmResponse {
        message: Message::assistant_with_tools(text, vec![call.clone()]),
        tool_calls: vec![call],
    }
}

/// Ask the model-side of a turn to count letters in `text`.
pub fn count_letters(id: &str, text: &str) -> LlmResponse {
    tool_response("", id, "letter_counter", json!({ "text": text }))
}

fn load_letter_counter(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    Ok(vec![Box::new(LetterCounterTool)])
}

fn load_debt_payoff(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    Ok(vec![Box::new(DebtPayoffTool)])
}

fn load_broken(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    anyhow::bail!("broken_tool failed to initialize")
}

fn load_duplicate_counter(_ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    Ok(vec![Box::new(LetterCounterTool)])
}

/// Two working units and one whose loader fails.
pub fn fixture_catalog() -> ToolCatalog {
    tool_catalog![
        "letter_counter" => load_letter_counter,
        "broken_tool" => load_broken,
        "debt_payoff" => load_debt_payoff,
    ]
}

/// Two units that both provide `letter_counter`.
pub fn conflicting_catalog() -> ToolCatalog {
    tool_catalog![
        "letter_counter" => load_letter_counter,
        "letter_counter_copy" => load_duplicate_counter,
    ]
}

pub fn fixture_registry() -> ToolRegistry {
    ToolRegistry::discovered(&fixture_catalog(), &ToolContext::new())
        .expect("fixture discovery should succeed")
}

/// A controller over a fresh database in `tmp_dir`.
pub fn controller(tmp_dir: &TempDir, provider: impl LlmProvider + 'static) -> ChatController {
    ChatController::builder()
        .provider(provider)
        .registry(fixture_registry())
        .sqlite_store(tmp_dir.path().join("advisor.db"))
        .expect("open store")
        .build()
        .expect("build controller")
}

pub fn store(tmp_dir: &TempDir) -> SqliteStore {
    SqliteStore::new(tmp_dir.path().join("advisor.db")).expect("open store")
}
