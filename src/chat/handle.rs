use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ChatEvent, ChatResponse};
use crate::error::AdvisorError;

/// Handle to a streaming turn.
///
/// Call [`next_event()`](Self::next_event) until it returns `None`, then
/// [`wait()`](Self::wait) for the persisted result. Dropping the handle, or
/// calling [`abandon()`](Self::abandon), stops the turn; whatever text was
/// already delivered is still persisted.
///
/// ```no_run
/// # use advisor_chat::chat::{TurnHandle, ChatResponse};
/// # use advisor_chat::AdvisorError;
/// # async fn example(mut handle: TurnHandle) -> Result<ChatResponse, AdvisorError> {
/// while let Some(event) = handle.next_event().await {
///     print!("{}", event.to_sse());
/// }
/// handle.wait().await
/// # }
/// ```
pub struct TurnHandle {
    conversation_id: String,
    events: mpsc::Receiver<ChatEvent>,
    completion: JoinHandle<Result<ChatResponse, AdvisorError>>,
}

impl TurnHandle {
    pub(crate) fn new(
        conversation_id: String,
        events: mpsc::Receiver<ChatEvent>,
        completion: JoinHandle<Result<ChatResponse, AdvisorError>>,
    ) -> Self {
        Self {
            conversation_id,
            events,
            completion,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Receive the next event; `None` once the turn has finished
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Wait for the turn to finish.
    ///
    /// Remaining events are discarded.
    pub async fn wait(self) -> Result<ChatResponse, AdvisorError> {
        let Self {
            events, completion, ..
        } = self;
        // The turn blocks on a full channel, so keep draining while it runs.
        let drain = tokio::spawn(async move {
            let mut events = events;
            while events.recv().await.is_some() {}
        });
        let result = join(completion).await;
        let _ = drain.await;
        result
    }

    /// Drain events and return the persisted assistant text
    pub async fn output(self) -> Result<String, AdvisorError> {
        Ok(self.wait().await?.message.content)
    }

    /// Disconnect from the turn and wait for it to persist what it delivered.
    ///
    /// Returns [`AdvisorError::Interrupted`] unless the turn had already
    /// finished.
    pub async fn abandon(self) -> Result<ChatResponse, AdvisorError> {
        let Self {
            events, completion, ..
        } = self;
        drop(events);
        join(completion).await
    }
}

async fn join(
    completion: JoinHandle<Result<ChatResponse, AdvisorError>>,
) -> Result<ChatResponse, AdvisorError> {
    completion
        .await
        .map_err(|e| AdvisorError::Internal(anyhow::anyhow!("turn task join error: {}", e)))?
}
