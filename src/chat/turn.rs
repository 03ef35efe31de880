use std::future::pending;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ChatEvent;
use crate::error::AdvisorError;
use crate::llm::{LlmProvider, LlmResponse, Message, ToolCall};
use crate::tools::{RuntimeTool, ToolOutput, ToolPayload};

/// Token channel capacity for streaming.
const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Inserted between text from successive model round-trips
const SEGMENT_SEPARATOR: &str = "\n\n";

/// Collects what a turn produced and forwards it to the consumer, if any.
///
/// `content` only ever holds text the consumer accepted.
pub(crate) struct TurnSink {
    events: Option<mpsc::Sender<ChatEvent>>,
    pub(crate) content: String,
    pub(crate) payloads: Vec<ToolPayload>,
    pub(crate) tool_names: Vec<String>,
    separate_next: bool,
}

impl TurnSink {
    /// Sink for a non-streaming turn
    pub(crate) fn collecting() -> Self {
        Self {
            events: None,
            content: String::new(),
            payloads: Vec::new(),
            tool_names: Vec::new(),
            separate_next: false,
        }
    }

    pub(crate) fn streaming(events: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::collecting()
        }
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.events.is_some()
    }

    /// Deliver an event; fails once the consumer has gone away
    pub(crate) async fn emit(&self, event: ChatEvent) -> Result<(), AdvisorError> {
        match &self.events {
            Some(sender) => sender
                .send(event)
                .await
                .map_err(|_| AdvisorError::Interrupted),
            None => Ok(()),
        }
    }

    fn begin_segment(&mut self) {
        self.separate_next = !self.content.is_empty();
    }

    async fn text(&mut self, delta: String) -> Result<(), AdvisorError> {
        if delta.is_empty() {
            return Ok(());
        }
        if self.separate_next {
            self.emit(ChatEvent::Data {
                text: SEGMENT_SEPARATOR.to_string(),
            })
            .await?;
            self.content.push_str(SEGMENT_SEPARATOR);
            self.separate_next = false;
        }
        self.emit(ChatEvent::Data {
            text: delta.clone(),
        })
        .await?;
        self.content.push_str(&delta);
        Ok(())
    }

    /// Tool names in first-use order, comma separated
    pub(crate) fn tool_label(&self) -> Option<String> {
        (!self.tool_names.is_empty()).then(|| self.tool_names.join(","))
    }

    fn record_tool(&mut self, name: &str) {
        if !self.tool_names.iter().any(|n| n == name) {
            self.tool_names.push(name.to_string());
        }
    }
}

fn agent_error(e: anyhow::Error) -> AdvisorError {
    AdvisorError::Agent(format!("{:#}", e))
}

/// The model-and-tools loop for a single turn.
pub(crate) struct TurnRunner<'a> {
    pub(crate) provider: &'a dyn LlmProvider,
    pub(crate) tools: &'a [RuntimeTool],
    pub(crate) system_prompt: &'a str,
    pub(crate) max_iterations: usize,
}

impl TurnRunner<'_> {
    /// Call the model until it stops requesting tools.
    ///
    /// Text and payloads land in `sink` as they are produced, so a failed
    /// turn still leaves the partial result there.
    pub(crate) async fn run(
        &self,
        mut messages: Vec<Message>,
        sink: &mut TurnSink,
    ) -> Result<(), AdvisorError> {
        for iteration in 0..self.max_iterations {
            debug!(iteration, max = self.max_iterations, "turn iteration");
            sink.begin_segment();

            let response = if sink.is_streaming() {
                self.call_streaming(&messages, sink).await?
            } else {
                let response = self
                    .provider
                    .chat(self.system_prompt, &messages, self.tools)
                    .await
                    .map_err(agent_error)?;
                sink.text(response.message.content.clone()).await?;
                response
            };

            let tool_calls = response.tool_calls;
            if tool_calls.is_empty() {
                info!(iterations = iteration + 1, "turn completed");
                return Ok(());
            }

            let mut results = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                let output = self.invoke(call, sink).await?;
                results.push(Message::tool_result(
                    &call.id,
                    &call.name,
                    output.to_model_text(),
                ));
            }

            messages.push(Message::assistant_with_tools(
                response.message.content,
                tool_calls,
            ));
            messages.extend(results);
        }

        Err(AdvisorError::MaxIterations {
            iterations: self.max_iterations,
        })
    }

    /// Stream one model call, forwarding deltas as they arrive
    async fn call_streaming(
        &self,
        messages: &[Message],
        sink: &mut TurnSink,
    ) -> Result<LlmResponse, AdvisorError> {
        let (token_tx, mut token_rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);

        let watcher = sink.events.clone();
        let disconnected = async move {
            match watcher {
                Some(sender) => sender.closed().await,
                None => pending::<()>().await,
            }
        };
        tokio::pin!(disconnected);

        let call = self
            .provider
            .chat_stream(self.system_prompt, messages, self.tools, token_tx);
        tokio::pin!(call);

        let mut finished = None;
        loop {
            tokio::select! {
                biased;
                token = token_rx.recv() => match token {
                    Some(token) => sink.text(token).await?,
                    None => break,
                },
                result = &mut call, if finished.is_none() => finished = Some(result),
                _ = &mut disconnected => {
                    debug!("consumer disconnected while waiting on the model");
                    return Err(AdvisorError::Interrupted);
                }
            }
        }

        let result = match finished {
            Some(result) => result,
            None => call.await,
        };
        result.map_err(agent_error)
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        sink: &mut TurnSink,
    ) -> Result<ToolOutput, AdvisorError> {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return Ok(ToolOutput::failure(
                format!("unknown tool '{}'", call.name),
                "unknown_tool",
            ));
        };

        sink.emit(ChatEvent::Tool {
            name: call.name.clone(),
            note: format!("Running {}", call.name),
        })
        .await?;

        let output = tool.invoke(call.arguments.clone()).await;
        sink.record_tool(&call.name);

        if let Some(payload) = &output.payload {
            sink.payloads.push(payload.clone());
            if let Some(event) = ChatEvent::from_payload(payload) {
                sink.emit(event).await?;
            }
        }

        Ok(output)
    }
}
