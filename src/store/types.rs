use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tools::{CalculationDetails, ChartSpec, SqlDetails, ToolPayload};

/// Whether the user is a known customer or an anonymous visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Existing,
    New,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Existing => write!(f, "existing"),
            Self::New => write!(f, "new"),
        }
    }
}

impl FromStr for Scenario {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "existing" => Ok(Self::Existing),
            "new" => Ok(Self::New),
            _ => anyhow::bail!("invalid scenario '{}' (expected: existing, new)", s),
        }
    }
}

/// Who a conversation belongs to.
///
/// An `existing` conversation carries a customer id and a `new` one a
/// session id, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    Customer(String),
    Session(String),
}

impl Identity {
    pub fn scenario(&self) -> Scenario {
        match self {
            Self::Customer(_) => Scenario::Existing,
            Self::Session(_) => Scenario::New,
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        match self {
            Self::Customer(id) => Some(id),
            Self::Session(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Session(id) => Some(id),
            Self::Customer(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub identity: Identity,
    pub is_active: bool,
    /// Messages appended so far, soft-deleted ones included
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Value,
}

impl Conversation {
    pub fn new(identity: Identity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            identity,
            is_active: true,
            message_count: 0,
            created_at: now,
            updated_at: now,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.identity.scenario()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            _ => anyhow::bail!("invalid role '{}' (expected: user, assistant, tool)", s),
        }
    }
}

/// A message about to be appended; the store assigns id, seq and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub tool_name: Option<String>,
    pub payloads: Vec<ToolPayload>,
    pub error: Option<String>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            payloads: Vec::new(),
            error: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn with_payloads(mut self, payloads: Vec<ToolPayload>) -> Self {
        self.payloads = payloads;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A persisted message.
///
/// `tool_payload` holds every payload of the turn in order; the typed
/// columns hold the last payload of their kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub seq: i64,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_payload: Vec<ToolPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_details: Option<SqlDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation_details: Option<CalculationDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<ChartSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn has_payload(&self) -> bool {
        !self.tool_payload.is_empty()
    }
}

/// Model-written title and paragraph for one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub title: String,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

/// Financial profile of a known customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub name: String,
    pub annual_income: f64,
    pub monthly_debt_payments: f64,
    pub credit_score: i64,
    pub savings: f64,
    pub created_at: DateTime<Utc>,
}

impl CustomerRecord {
    /// Monthly debt payments as a share of monthly gross income
    pub fn debt_to_income(&self) -> Option<f64> {
        (self.annual_income > 0.0).then(|| self.monthly_debt_payments / (self.annual_income / 12.0))
    }
}
