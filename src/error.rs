use crate::tools::RegistryError;

/// Errors surfaced by the chat controller and its builder
#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("conversation error: {0}")]
    Conversation(String),

    #[error("invalid conversation identity: {0}")]
    InvalidIdentity(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("max iterations exceeded after {iterations} model round-trips")]
    MaxIterations { iterations: usize },

    /// The event consumer went away before the turn finished
    #[error("stream interrupted")]
    Interrupted,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
