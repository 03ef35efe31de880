use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::reconcile::{HistoryEntry, drop_trailing_echo, strip_echo};
use super::turn::{TurnRunner, TurnSink};
use super::{ChatControllerBuilder, ChatEvent, TurnHandle};
use crate::error::AdvisorError;
use crate::llm::{LlmProvider, Message};
use crate::store::{
    Conversation, ConversationStore, ConversationSummary, Identity, KeyedLocks, NewMessage, Role,
    Scenario, StoredMessage,
};
use crate::tools::{RuntimeTool, ToolRegistry};

/// Event channel capacity for streaming turns.
const EVENT_CHANNEL_CAPACITY: usize = 64;

const MAX_TITLE_CHARS: usize = 80;

pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are a careful personal finance advisor. \
Answer in plain language and keep answers short. When a question involves numbers \
(loan payoff, renting versus buying, the customer's records) call the matching tool \
instead of estimating, then explain the result. Use chart_builder when a comparison \
is easier to read as a chart. Never invent customer data.";

const SUMMARY_PROMPT: &str = "You summarize financial advisory conversations. \
Reply with a JSON object {\"title\": ..., \"summary\": ...}: a title of at most eight \
words, and one paragraph covering the questions asked, the figures discussed and any \
recommendation made.";

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    /// The persisted assistant message
    pub message: StoredMessage,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    title: String,
    summary: String,
}

/// Orchestrates turns between a user, the model and the conversation store.
///
/// Cheap to clone; clones share the provider, tools and store.
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Box<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    tools: Vec<RuntimeTool>,
    store: Arc<dyn ConversationStore>,
    system_prompt: String,
    max_iterations: usize,
    /// Held from the user append through the assistant append
    turns: KeyedLocks,
}

fn storage_error(e: anyhow::Error) -> AdvisorError {
    AdvisorError::Storage(format!("{:#}", e))
}

impl ChatController {
    pub fn builder() -> ChatControllerBuilder {
        ChatControllerBuilder::new()
    }

    pub(crate) fn from_parts(
        provider: Box<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        system_prompt: String,
        max_iterations: usize,
    ) -> Self {
        let tools = registry.export_for_runtime();
        Self {
            inner: Arc::new(Inner {
                provider,
                registry,
                tools,
                store,
                system_prompt,
                max_iterations,
                turns: KeyedLocks::default(),
            }),
        }
    }

    /// Open a conversation and return its id; see [`open_conversation`].
    pub async fn start(
        &self,
        scenario: Scenario,
        customer_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<String, AdvisorError> {
        let conversation =
            open_conversation(self.inner.store.as_ref(), scenario, customer_id, session_id)
                .await?;
        Ok(conversation.id)
    }

    /// Run a turn to completion.
    ///
    /// `history` replaces the persisted transcript as model context when given.
    /// Turns on one conversation run one at a time, in call order.
    pub async fn send(
        &self,
        conversation_id: &str,
        message: &str,
        history: Option<Vec<HistoryEntry>>,
    ) -> Result<ChatResponse, AdvisorError> {
        let _turn = self.inner.turns.lock(conversation_id).await;
        let messages = self
            .inner
            .prepare_turn(conversation_id, message, history)
            .await?;

        let mut sink = TurnSink::collecting();
        let outcome = self.inner.runner().run(messages, &mut sink).await;
        self.inner
            .finish_turn(conversation_id, message, sink, outcome)
            .await
    }

    /// Start a turn and stream its events.
    ///
    /// Validation and the user message are handled before this returns; the
    /// model loop runs in its own task. Waits for an earlier turn on the same
    /// conversation to finish.
    pub async fn send_stream(
        &self,
        conversation_id: &str,
        message: &str,
        history: Option<Vec<HistoryEntry>>,
    ) -> Result<TurnHandle, AdvisorError> {
        let turn = self.inner.turns.lock(conversation_id).await;
        let messages = self
            .inner
            .prepare_turn(conversation_id, message, history)
            .await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::clone(&self.inner);
        let id = conversation_id.to_string();
        let prompt = message.to_string();

        let completion = tokio::spawn(async move {
            let _turn = turn;
            let mut sink = TurnSink::streaming(tx);
            let outcome = inner.runner().run(messages, &mut sink).await;
            inner.finish_turn(&id, &prompt, sink, outcome).await
        });

        Ok(TurnHandle::new(conversation_id.to_string(), rx, completion))
    }

    /// Persisted messages in order, deleted ones excluded
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, AdvisorError> {
        self.inner.conversation(conversation_id).await?;
        self.inner
            .store
            .messages(conversation_id, false)
            .await
            .map_err(storage_error)
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, AdvisorError> {
        self.inner.conversation(conversation_id).await
    }

    /// All conversations, most recently updated first
    pub async fn conversations(&self) -> Result<Vec<Conversation>, AdvisorError> {
        self.inner
            .store
            .list_conversations()
            .await
            .map_err(storage_error)
    }

    /// Have the model title and summarize the conversation, and store the result
    pub async fn summarize(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationSummary, AdvisorError> {
        let transcript = self.history(conversation_id).await?;
        if transcript.is_empty() {
            return Err(AdvisorError::Conversation(format!(
                "conversation '{}' has nothing to summarize",
                conversation_id
            )));
        }

        let text = transcript
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| format!("{}: {}", m.role, m.content.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let reply = self
            .inner
            .provider
            .chat(SUMMARY_PROMPT, &[Message::user(text)], &[])
            .await
            .map_err(|e| AdvisorError::Provider(format!("{:#}", e)))?;

        let (title, summary) = parse_summary(&reply.message.content);
        let summary = ConversationSummary {
            conversation_id: conversation_id.to_string(),
            title,
            summary,
            updated_at: Utc::now(),
        };
        self.inner
            .store
            .save_summary(&summary)
            .await
            .map_err(storage_error)?;

        info!(id = %conversation_id, title = %summary.title, "conversation summarized");
        Ok(summary)
    }

    /// The stored summary, if one was made
    pub async fn summary(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSummary>, AdvisorError> {
        self.inner
            .store
            .summary(conversation_id)
            .await
            .map_err(storage_error)
    }

    /// Hide a message from history; it stays in the store
    pub async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<(), AdvisorError> {
        let deleted = self
            .inner
            .store
            .soft_delete_message(conversation_id, message_id)
            .await
            .map_err(storage_error)?;
        if !deleted {
            return Err(AdvisorError::Conversation(format!(
                "message '{}' not found in conversation '{}'",
                message_id, conversation_id
            )));
        }
        Ok(())
    }

    /// Deactivate a conversation; later turns are rejected
    pub async fn close(&self, conversation_id: &str) -> Result<(), AdvisorError> {
        self.inner.conversation(conversation_id).await?;
        self.inner
            .store
            .set_active(conversation_id, false)
            .await
            .map_err(storage_error)?;
        info!(id = %conversation_id, "conversation closed");
        Ok(())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), AdvisorError> {
        let deleted = self
            .inner
            .store
            .delete_conversation(conversation_id)
            .await
            .map_err(storage_error)?;
        if !deleted {
            return Err(AdvisorError::Conversation(format!(
                "conversation '{}' not found",
                conversation_id
            )));
        }
        Ok(())
    }

    /// Tools offered to the model, in registration order
    pub fn tools(&self) -> &[RuntimeTool] {
        &self.inner.tools
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> Arc<dyn ConversationStore> {
        Arc::clone(&self.inner.store)
    }
}

/// Create a conversation after checking its identity.
///
/// `existing` takes a known customer id and no session id; `new` takes no
/// customer id and uses `session_id` or a fresh one.
pub async fn open_conversation(
    store: &dyn ConversationStore,
    scenario: Scenario,
    customer_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<Conversation, AdvisorError> {
    let customer_id = customer_id.map(str::trim).filter(|id| !id.is_empty());
    let session_id = session_id.map(str::trim).filter(|id| !id.is_empty());

    let identity = match (scenario, customer_id, session_id) {
        (Scenario::Existing, Some(customer), None) => {
            let known = store.get_customer(customer).await.map_err(storage_error)?;
            if known.is_none() {
                return Err(AdvisorError::InvalidIdentity(format!(
                    "unknown customer '{}'",
                    customer
                )));
            }
            Identity::Customer(customer.to_string())
        }
        (Scenario::Existing, None, _) => {
            return Err(AdvisorError::InvalidIdentity(
                "an existing-customer conversation needs a customer id".into(),
            ));
        }
        (Scenario::Existing, Some(_), Some(_)) => {
            return Err(AdvisorError::InvalidIdentity(
                "an existing-customer conversation cannot carry a session id".into(),
            ));
        }
        (Scenario::New, Some(_), _) => {
            return Err(AdvisorError::InvalidIdentity(
                "a new-visitor conversation cannot carry a customer id".into(),
            ));
        }
        (Scenario::New, None, session) => Identity::Session(
            session.map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
        ),
    };

    let conversation = Conversation::new(identity);
    store
        .create_conversation(&conversation)
        .await
        .map_err(storage_error)?;

    info!(id = %conversation.id, scenario = %scenario, "conversation started");
    Ok(conversation)
}

impl Inner {
    fn runner(&self) -> TurnRunner<'_> {
        TurnRunner {
            provider: self.provider.as_ref(),
            tools: &self.tools,
            system_prompt: &self.system_prompt,
            max_iterations: self.max_iterations,
        }
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Conversation, AdvisorError> {
        self.store
            .get_conversation(conversation_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                AdvisorError::Conversation(format!("conversation '{}' not found", conversation_id))
            })
    }

    /// Check the conversation, persist the user message and build model context
    async fn prepare_turn(
        &self,
        conversation_id: &str,
        message: &str,
        history: Option<Vec<HistoryEntry>>,
    ) -> Result<Vec<Message>, AdvisorError> {
        if message.trim().is_empty() {
            return Err(AdvisorError::Conversation("message cannot be empty".into()));
        }
        let conversation = self.conversation(conversation_id).await?;
        if !conversation.is_active {
            return Err(AdvisorError::Conversation(format!(
                "conversation '{}' is closed",
                conversation_id
            )));
        }

        self.store
            .append_message(conversation_id, NewMessage::user(message))
            .await
            .map_err(storage_error)?;

        let mut history = match history {
            Some(history) => history,
            None => self
                .store
                .messages(conversation_id, false)
                .await
                .map_err(storage_error)?
                .iter()
                .map(HistoryEntry::from)
                .collect(),
        };
        drop_trailing_echo(&mut history, message);

        let mut messages: Vec<Message> = history
            .into_iter()
            .filter(|entry| !entry.content.trim().is_empty())
            .filter_map(|entry| match entry.role {
                Role::User => Some(Message::user(entry.content)),
                Role::Assistant => Some(Message::assistant(entry.content)),
                Role::Tool => None,
            })
            .collect();
        messages.push(Message::user(message));
        Ok(messages)
    }

    /// Persist the turn's single assistant message and report the outcome
    async fn finish_turn(
        &self,
        conversation_id: &str,
        prompt: &str,
        sink: TurnSink,
        outcome: Result<(), AdvisorError>,
    ) -> Result<ChatResponse, AdvisorError> {
        let mut record = NewMessage::assistant(strip_echo(prompt, &sink.content))
            .with_payloads(sink.payloads.clone());
        if let Some(label) = sink.tool_label() {
            record = record.with_tool_name(label);
        }
        if let Err(e) = &outcome {
            record = record.with_error(e.to_string());
        }

        let stored = self
            .store
            .append_message(conversation_id, record)
            .await
            .map_err(storage_error);

        match (outcome, stored) {
            (Ok(()), Ok(message)) => {
                let _ = sink
                    .emit(ChatEvent::Complete {
                        conversation_id: conversation_id.to_string(),
                        message_id: message.id.clone(),
                    })
                    .await;
                Ok(ChatResponse {
                    conversation_id: conversation_id.to_string(),
                    message,
                })
            }
            (Ok(()), Err(e)) => {
                error!(id = %conversation_id, error = %e, "failed to persist assistant message");
                let _ = sink
                    .emit(ChatEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                Err(e)
            }
            (Err(e), stored) => {
                if let Err(store_err) = stored {
                    warn!(id = %conversation_id, error = %store_err, "partial reply was not persisted");
                }
                match e {
                    AdvisorError::Interrupted => {
                        warn!(id = %conversation_id, "consumer left mid-turn, kept delivered text");
                    }
                    ref other => {
                        error!(id = %conversation_id, error = %other, "turn failed");
                        let _ = sink
                            .emit(ChatEvent::Error {
                                message: other.to_string(),
                            })
                            .await;
                    }
                }
                Err(e)
            }
        }
    }
}

/// Split a model reply into a title and a summary paragraph.
///
/// Accepts the requested JSON object, optionally fenced; otherwise the first
/// line is the title and the rest the summary.
fn parse_summary(reply: &str) -> (String, String) {
    let unfenced = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let (title, summary) = match serde_json::from_str::<SummaryReply>(unfenced) {
        Ok(parsed) => (parsed.title, parsed.summary),
        Err(_) => {
            let mut lines = reply.trim().lines();
            let title = lines.next().unwrap_or_default().to_string();
            let rest = lines
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (title, rest)
        }
    };

    let title = title.trim().trim_start_matches('#').trim().to_string();
    let title: String = title.chars().take(MAX_TITLE_CHARS).collect();
    let summary = if summary.trim().is_empty() {
        title.clone()
    } else {
        summary.trim().to_string()
    };
    (title, summary)
}
