use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ToolPolicy;
use crate::tools::ToolContext;

/// Project-local config file, looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = ".advisor-chat.toml";
/// Environment override for the database location
pub const DB_PATH_ENV: &str = "ADVISOR_DB_PATH";

const DEFAULT_PROVIDER: &str = "anthropic";
const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Effective application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider ("anthropic" or "openai")
    pub provider: String,
    /// Model override; the provider's default when unset
    pub model: Option<String>,
    /// SQLite file holding conversations and customer records
    pub database_path: Option<PathBuf>,
    /// Upper bound on model round-trips per turn
    pub max_iterations: usize,
    /// Stream replies token by token in the CLI
    pub stream: bool,
    /// Replaces the built-in advisor system prompt
    pub system_prompt: Option<String>,
    pub tools: ToolPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: None,
            database_path: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            stream: true,
            system_prompt: None,
            tools: ToolPolicy::default(),
        }
    }
}

/// One config file; every field is optional so layers can be merged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    provider: Option<String>,
    model: Option<String>,
    database_path: Option<PathBuf>,
    max_iterations: Option<usize>,
    stream: Option<bool>,
    system_prompt: Option<String>,
    tools: Option<ToolPolicy>,
}

impl ConfigLayer {
    fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let layer = toml::from_str(&text)
            .with_context(|| format!("invalid config: {}", path.display()))?;
        debug!(path = %path.display(), "loaded config layer");
        Ok(Some(layer))
    }
}

impl AppConfig {
    /// Load global then project config, then apply the environment.
    ///
    /// CLI flags are applied afterwards by the caller.
    pub fn load() -> Result<Self> {
        let global = global_config_path();
        let project = PathBuf::from(PROJECT_CONFIG_FILE);
        let mut config = Self::load_from(global.as_deref(), Some(&project))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Merge the given files over the defaults, later files winning
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        for path in [global, project].into_iter().flatten() {
            if let Some(layer) = ConfigLayer::read(path)? {
                config.merge(layer);
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn merge(&mut self, layer: ConfigLayer) {
        if let Some(provider) = layer.provider {
            self.provider = provider;
        }
        if layer.model.is_some() {
            self.model = layer.model;
        }
        if layer.database_path.is_some() {
            self.database_path = layer.database_path;
        }
        if let Some(max) = layer.max_iterations {
            self.max_iterations = max;
        }
        if let Some(stream) = layer.stream {
            self.stream = stream;
        }
        if layer.system_prompt.is_some() {
            self.system_prompt = layer.system_prompt;
        }
        if let Some(tools) = layer.tools {
            self.tools = tools;
        }
    }

    /// Apply environment overrides through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(DB_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }
        if self.provider.trim().is_empty() {
            anyhow::bail!("provider cannot be empty");
        }
        Ok(())
    }

    /// The configured database, or `~/.advisor-chat/advisor.db`
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".advisor-chat").join("advisor.db"))
    }

    /// Discovery context: the database for query tools plus disabled units
    pub fn tool_context(&self) -> Result<ToolContext> {
        let ctx = ToolContext::new().with_database(self.database_path()?);
        Ok(self.tools.apply(ctx))
    }
}

fn global_config_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".advisor-chat").join("config.toml"))
}
