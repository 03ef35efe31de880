use serde_json::{Value, json};

use crate::tools::{CalculationDetails, ChartSpec, SqlDetails, ToolPayload};

/// One fragment of a streamed turn.
///
/// Consumers receive these through [`TurnHandle::next_event()`](crate::chat::TurnHandle::next_event).
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A text delta from the model
    Data { text: String },
    /// The model invoked a tool
    Tool { name: String, note: String },
    SqlDetails(SqlDetails),
    CalculationDetails(CalculationDetails),
    ChartData(ChartSpec),
    /// The assistant message was persisted; nothing follows
    Complete {
        conversation_id: String,
        message_id: String,
    },
    /// The turn failed; nothing follows
    Error { message: String },
}

impl ChatEvent {
    /// The structured-payload event for `payload`, if it has one
    pub fn from_payload(payload: &ToolPayload) -> Option<Self> {
        match payload {
            ToolPayload::Sql(details) => Some(Self::SqlDetails(details.clone())),
            ToolPayload::Calculation(details) => Some(Self::CalculationDetails(details.clone())),
            ToolPayload::Chart(spec) => Some(Self::ChartData(spec.clone())),
            ToolPayload::Generic { .. } | ToolPayload::Other => None,
        }
    }

    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::Tool { .. } => "tool",
            Self::SqlDetails(_) => "sql_details",
            Self::CalculationDetails(_) => "calculation_details",
            Self::ChartData(_) => "chart_data",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// JSON body carried in the SSE `data:` line
    pub fn data(&self) -> Value {
        let body = match self {
            Self::Data { text } => Ok(json!({ "text": text })),
            Self::Tool { name, note } => Ok(json!({ "name": name, "note": note })),
            Self::SqlDetails(details) => serde_json::to_value(details),
            Self::CalculationDetails(details) => serde_json::to_value(details),
            Self::ChartData(spec) => serde_json::to_value(spec),
            Self::Complete {
                conversation_id,
                message_id,
            } => Ok(json!({ "conversation_id": conversation_id, "message_id": message_id })),
            Self::Error { message } => Ok(json!({ "message": message })),
        };
        body.unwrap_or_else(|e| json!({ "message": format!("unserializable event: {}", e) }))
    }

    /// Encode as one Server-Sent-Events frame
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind(), self.data())
    }
}
