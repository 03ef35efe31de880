use std::sync::Arc;

use tracing::{debug, warn};

use super::ChatController;
use super::controller::DEFAULT_SYSTEM_PROMPT;
use crate::config::AppConfig;
use crate::error::AdvisorError;
use crate::llm::{HostedProvider, LlmProvider};
use crate::store::{ConversationStore, SqliteStore};
use crate::tools::{ToolRegistry, builtin};

/// Builder for a [`ChatController`].
///
/// ```no_run
/// # use advisor_chat::chat::ChatController;
/// # use advisor_chat::store::Scenario;
/// # async fn example() -> Result<(), advisor_chat::AdvisorError> {
/// let controller = ChatController::builder()
///     .anthropic(None)?
///     .sqlite_store("advisor.db")?
///     .builtin_tools()
///     .build()?;
///
/// let id = controller.start(Scenario::New, None, None).await?;
/// let reply = controller.send(&id, "How long to pay off $5,000 at 18%?", None).await?;
/// println!("{}", reply.message.content);
/// # Ok(())
/// # }
/// ```
pub struct ChatControllerBuilder {
    provider: Option<Box<dyn LlmProvider>>,
    registry: Option<ToolRegistry>,
    store: Option<Arc<dyn ConversationStore>>,
    config: AppConfig,
    use_builtin_tools: bool,
}

impl ChatControllerBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            registry: None,
            store: None,
            config: AppConfig::default(),
            use_builtin_tools: false,
        }
    }

    /// Set a custom LLM provider.
    pub fn provider(mut self, provider: impl LlmProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// Configure the Anthropic provider; `None` picks the default model.
    pub fn anthropic(self, model: Option<&str>) -> Result<Self, AdvisorError> {
        self.provider_by_name("anthropic", model)
    }

    /// Configure the OpenAI provider; `None` picks the default model.
    pub fn openai(self, model: Option<&str>) -> Result<Self, AdvisorError> {
        self.provider_by_name("openai", model)
    }

    /// Configure a provider by name ("anthropic" or "openai").
    pub fn provider_by_name(
        mut self,
        name: &str,
        model: Option<&str>,
    ) -> Result<Self, AdvisorError> {
        let provider = HostedProvider::by_name(name, model)
            .map_err(|e| AdvisorError::Provider(format!("{:#}", e)))?;
        self.provider = Some(Box::new(provider));
        Ok(self)
    }

    /// Use an already discovered registry (overrides built-in tools).
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self.use_builtin_tools = false;
        self
    }

    /// Discover the built-in tool catalog during [`build()`](Self::build).
    ///
    /// Discovery uses the store's database and the configured tool policy.
    pub fn builtin_tools(mut self) -> Self {
        self.use_builtin_tools = true;
        self
    }

    /// Set a custom conversation store.
    pub fn store(mut self, store: impl ConversationStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Share an existing store.
    pub fn shared_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Open a SQLite store at `path` and point query tools at it.
    pub fn sqlite_store(
        mut self,
        path: impl Into<std::path::PathBuf>,
    ) -> Result<Self, AdvisorError> {
        let path = path.into();
        let store = SqliteStore::new(&path).map_err(|e| {
            AdvisorError::Storage(format!("failed to open conversation store: {:#}", e))
        })?;
        self.config.database_path = Some(path);
        self.store = Some(Arc::new(store));
        Ok(self)
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Apply loaded configuration.
    ///
    /// Sets the provider when none was set yet and opens the configured
    /// database when no store was set yet. Later builder calls still win.
    pub fn config(mut self, config: AppConfig) -> Result<Self, AdvisorError> {
        self.config = config;
        debug!(provider = %self.config.provider, "applying configuration");

        if self.provider.is_none() {
            let provider = self.config.provider.clone();
            let model = self.config.model.clone();
            self = self.provider_by_name(&provider, model.as_deref())?;
        }
        if self.store.is_none() {
            let path = self
                .config
                .database_path()
                .map_err(|e| AdvisorError::Config(format!("{:#}", e)))?;
            self = self.sqlite_store(path)?;
        }
        Ok(self)
    }

    /// Build the controller.
    ///
    /// Fails without a provider or a store, or when built-in discovery hits
    /// a tool name conflict.
    pub fn build(self) -> Result<ChatController, AdvisorError> {
        let provider = self
            .provider
            .ok_or_else(|| AdvisorError::Config("no LLM provider configured".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| AdvisorError::Config("no conversation store configured".to_string()))?;

        if self.config.max_iterations == 0 {
            return Err(AdvisorError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let registry = match self.registry {
            Some(registry) => registry,
            None if self.use_builtin_tools => {
                let ctx = self
                    .config
                    .tool_context()
                    .map_err(|e| AdvisorError::Config(format!("{:#}", e)))?;
                let registry = ToolRegistry::discovered(&builtin::catalog(), &ctx)?;
                if let Some(report) = registry.last_report().filter(|r| !r.is_clean()) {
                    warn!(report = %report, "tool discovery finished with failures");
                }
                registry
            }
            None => ToolRegistry::new(),
        };

        let system_prompt = self
            .config
            .system_prompt
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        Ok(ChatController::from_parts(
            provider,
            Arc::new(registry),
            store,
            system_prompt,
            self.config.max_iterations,
        ))
    }
}

impl Default for ChatControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
