pub mod builtin;
mod discovery;
mod output;
mod registry;
mod runtime;

pub use discovery::{
    DiscoveryFailure, DiscoveryReport, RESERVED_UNITS, ToolCatalog, ToolContext, ToolUnit,
};
pub use output::{
    CalculationDetails, CalculationStep, ChartDataset, ChartSpec, ChartType, SqlDetails,
    ToolOutput, ToolPayload,
};
pub use registry::{RegistryError, RegistryState, ToolRegistry};
pub use runtime::RuntimeTool;

use async_trait::async_trait;
use serde_json::Value;

/// A financial capability the agent runtime can call by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool, also used as the function name shown to the model
    fn name(&self) -> &str;

    /// What the tool does, its parameters and the shape of its result.
    ///
    /// This text is given to the model when it chooses a tool.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters
    fn schema(&self) -> Value;

    /// Execute the tool with the given keyword arguments
    async fn execute(&self, args: Value) -> Result<ToolPayload, ToolError>;
}

/// Failure raised inside a tool.
///
/// Never crosses the tool boundary as an error: [`RuntimeTool::invoke`]
/// turns it into a failed [`ToolOutput`].
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("calculation failed: {0}")]
    Calculation(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("tool unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    /// Stable identifier reported as `error_type`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Calculation(_) => "calculation",
            Self::Query(_) => "query",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

/// Read a required numeric argument.
pub(crate) fn require_f64(args: &Value, key: &str) -> Result<f64, ToolError> {
    let value = args
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing numeric '{}'", key)))?;
    if !value.is_finite() {
        return Err(ToolError::InvalidArguments(format!(
            "'{}' must be a finite number",
            key
        )));
    }
    Ok(value)
}

/// Read an optional numeric argument, falling back to `default`.
pub(crate) fn optional_f64(args: &Value, key: &str, default: f64) -> Result<f64, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => require_f64(args, key),
    }
}

/// Read a required string argument.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string '{}'", key)))
}
