use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ToolError;

/// Structured result of one tool invocation, as seen by the agent runtime.
///
/// Serializes to `{"success": true, "payload": {...}}` or
/// `{"success": false, "error": "...", "error_type": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ToolPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ToolOutput {
    pub fn success(payload: ToolPayload) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            error_type: None,
        }
    }

    pub fn failure(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.into()),
            error_type: Some(error_type.into()),
        }
    }

    pub fn from_error(error: &ToolError) -> Self {
        Self::failure(error.to_string(), error.kind())
    }

    /// JSON text handed back to the model as the tool result
    pub fn to_model_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"error":"unserializable tool output: {}","error_type":"internal"}}"#,
                e
            )
        })
    }
}

/// Machine-readable attachment produced by a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolPayload {
    Sql(SqlDetails),
    Calculation(CalculationDetails),
    Chart(ChartSpec),
    Generic {
        data: Value,
    },
    /// A payload kind this build does not know about
    #[serde(other)]
    Other,
}

impl ToolPayload {
    /// Short label used in tool narration events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sql(_) => "sql",
            Self::Calculation(_) => "calculation",
            Self::Chart(_) => "chart",
            Self::Generic { .. } => "generic",
            Self::Other => "other",
        }
    }
}

/// Result of a read-only query against customer records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlDetails {
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    #[serde(default)]
    pub truncated: bool,
}

/// Step-by-step trace of a financial calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationDetails {
    pub calculation: String,
    pub inputs: Value,
    pub steps: Vec<CalculationStep>,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationStep {
    pub label: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl CalculationStep {
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            formula: None,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }
}

/// Chart description for the client renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<ChartDataset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDataset {
    pub label: String,
    pub values: Vec<f64>,
}
