use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::discovery::{DiscoveryReport, ToolCatalog, ToolContext, run_discovery};
use super::{RuntimeTool, Tool};

/// Errors raised while populating a registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool name must be non-empty")]
    EmptyName,

    #[error("tool name already registered: {0}")]
    NameConflict(String),
}

/// Lifecycle of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryState {
    #[default]
    Empty,
    Discovering,
    Populated,
}

/// Registry for tools.
///
/// Keys are unique. Listing follows insertion order; lookup goes through a
/// name index.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
    state: RegistryState,
    last_report: Option<DiscoveryReport>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            state: RegistryState::Empty,
            last_report: None,
        }
    }

    /// Build a registry from a catalog in one step
    pub fn discovered(catalog: &ToolCatalog, ctx: &ToolContext) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.discover(catalog, ctx)?;
        Ok(registry)
    }

    /// Load every unit of `catalog` and register the tools it provides.
    ///
    /// A unit that fails to load is recorded in the report and skipped.
    /// A duplicate tool name aborts discovery.
    pub fn discover(
        &mut self,
        catalog: &ToolCatalog,
        ctx: &ToolContext,
    ) -> Result<DiscoveryReport, RegistryError> {
        self.state = RegistryState::Discovering;
        info!(units = catalog.len(), "discovering tools");

        let report = run_discovery(catalog, ctx, |tool| self.insert(Arc::from(tool)))?;

        self.state = RegistryState::Populated;
        info!(
            registered = report.registered.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "tool discovery finished"
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Register a tool.
    ///
    /// Fails if a tool with the same name is already registered; the
    /// existing tool is kept.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register an already shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        self.insert(tool)?;
        if self.state == RegistryState::Empty {
            self.state = RegistryState::Populated;
        }
        Ok(())
    }

    fn insert(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.index.contains_key(&name) {
            return Err(RegistryError::NameConflict(name));
        }
        debug!(tool = %name, "registered tool");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    /// Get all tools, in registration order
    pub fn all(&self) -> Vec<&dyn Tool> {
        self.tools.iter().map(|t| t.as_ref()).collect()
    }

    /// Get tool names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    /// Report of the most recent discovery, if any ran
    pub fn last_report(&self) -> Option<&DiscoveryReport> {
        self.last_report.as_ref()
    }

    /// Adapters for every registered tool, in the shape the agent runtime consumes
    pub fn export_for_runtime(&self) -> Vec<RuntimeTool> {
        self.tools
            .iter()
            .map(|t| RuntimeTool::new(Arc::clone(t)))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("state", &self.state)
            .finish()
    }
}
