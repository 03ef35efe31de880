use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task;
use tracing::debug;
use uuid::Uuid;

use super::locks::KeyedLocks;
use super::{
    Conversation, ConversationStore, ConversationSummary, CustomerRecord, Identity, NewMessage,
    Scenario, StoredMessage,
};
use crate::tools::ToolPayload;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    customer_id TEXT,
    session_id TEXT,
    scenario TEXT NOT NULL CHECK (scenario IN ('existing', 'new')),
    is_active INTEGER NOT NULL DEFAULT 1,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    CHECK ((customer_id IS NULL) <> (session_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'tool')),
    content TEXT NOT NULL,
    tool_name TEXT,
    tool_payload TEXT,
    sql_details TEXT,
    calculation_details TEXT,
    chart_data TEXT,
    error TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (conversation_id, seq)
);

CREATE TABLE IF NOT EXISTS conversation_summaries (
    conversation_id TEXT PRIMARY KEY REFERENCES conversations(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    summary TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    customer_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    annual_income REAL NOT NULL,
    monthly_debt_payments REAL NOT NULL,
    credit_score INTEGER NOT NULL,
    savings REAL NOT NULL,
    created_at TEXT NOT NULL
);
";

const CONVERSATION_COLUMNS: &str =
    "id, customer_id, session_id, scenario, is_active, message_count, created_at, updated_at, metadata";

const MESSAGE_COLUMNS: &str = "id, conversation_id, seq, role, content, tool_name, tool_payload, \
     sql_details, calculation_details, chart_data, error, is_deleted, created_at";

/// SQLite-backed conversation store.
///
/// Every operation opens its own connection on the blocking pool.
pub struct SqliteStore {
    db_path: PathBuf,
    /// One append lock per conversation id
    locks: KeyedLocks,
}

/// Open a SQLite connection with standard pragmas.
fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;
    conn.execute_batch("PRAGMA busy_timeout=5000; PRAGMA foreign_keys=ON;")
        .context("failed to set connection pragmas")?;
    Ok(conn)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn to_column<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .context("failed to serialize column")
}

fn from_column<T: DeserializeOwned>(raw: Option<String>, column: &str) -> Result<Option<T>> {
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .with_context(|| format!("corrupt {} column", column))
}

struct ConversationRow {
    id: String,
    customer_id: Option<String>,
    session_id: Option<String>,
    scenario: String,
    is_active: bool,
    message_count: i64,
    created_at: String,
    updated_at: String,
    metadata: String,
}

impl ConversationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            session_id: row.get(2)?,
            scenario: row.get(3)?,
            is_active: row.get(4)?,
            message_count: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            metadata: row.get(8)?,
        })
    }

    fn into_conversation(self) -> Result<Conversation> {
        let scenario: Scenario = self.scenario.parse()?;
        let identity = match (scenario, self.customer_id, self.session_id) {
            (Scenario::Existing, Some(customer), None) => Identity::Customer(customer),
            (Scenario::New, None, Some(session)) => Identity::Session(session),
            _ => anyhow::bail!("conversation '{}' has inconsistent identity columns", self.id),
        };
        Ok(Conversation {
            identity,
            is_active: self.is_active,
            message_count: self.message_count,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            metadata: serde_json::from_str(&self.metadata).context("corrupt metadata column")?,
            id: self.id,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    seq: i64,
    role: String,
    content: String,
    tool_name: Option<String>,
    tool_payload: Option<String>,
    sql_details: Option<String>,
    calculation_details: Option<String>,
    chart_data: Option<String>,
    error: Option<String>,
    is_deleted: bool,
    created_at: String,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            seq: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            tool_name: row.get(5)?,
            tool_payload: row.get(6)?,
            sql_details: row.get(7)?,
            calculation_details: row.get(8)?,
            chart_data: row.get(9)?,
            error: row.get(10)?,
            is_deleted: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_message(self) -> Result<StoredMessage> {
        Ok(StoredMessage {
            role: self.role.parse()?,
            tool_payload: from_column(self.tool_payload, "tool_payload")?.unwrap_or_default(),
            sql_details: from_column(self.sql_details, "sql_details")?,
            calculation_details: from_column(self.calculation_details, "calculation_details")?,
            chart_data: from_column(self.chart_data, "chart_data")?,
            created_at: parse_time(&self.created_at)?,
            id: self.id,
            conversation_id: self.conversation_id,
            seq: self.seq,
            content: self.content,
            tool_name: self.tool_name,
            error: self.error,
            is_deleted: self.is_deleted,
        })
    }
}

impl SqliteStore {
    /// Open (creating if needed) the store at `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }

        let store = Self {
            db_path,
            locks: KeyedLocks::default(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = open_connection(&self.db_path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("failed to set WAL mode")?;
        conn.execute_batch(SCHEMA)
            .context("failed to create schema")?;

        debug!(path = %self.db_path.display(), "initialized conversation store");
        Ok(())
    }

    /// Run `op` against a fresh connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_connection(&db_path)?;
            op(&mut conn)
        })
        .await
        .context("spawn_blocking failed")?
    }
}

fn last_payload<'a, T>(
    payloads: &'a [ToolPayload],
    pick: impl Fn(&'a ToolPayload) -> Option<&'a T>,
) -> Option<&'a T> {
    payloads.iter().rev().find_map(pick)
}

fn insert_message(
    conn: &mut Connection,
    conversation_id: &str,
    message: NewMessage,
) -> Result<StoredMessage> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to begin append transaction")?;

    let known: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_none() {
        anyhow::bail!("conversation '{}' not found", conversation_id);
    }

    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;

    let stored = StoredMessage {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        seq,
        role: message.role,
        content: message.content,
        tool_name: message.tool_name,
        sql_details: last_payload(&message.payloads, |p| match p {
            ToolPayload::Sql(d) => Some(d),
            _ => None,
        })
        .cloned(),
        calculation_details: last_payload(&message.payloads, |p| match p {
            ToolPayload::Calculation(d) => Some(d),
            _ => None,
        })
        .cloned(),
        chart_data: last_payload(&message.payloads, |p| match p {
            ToolPayload::Chart(d) => Some(d),
            _ => None,
        })
        .cloned(),
        tool_payload: message.payloads,
        error: message.error,
        is_deleted: false,
        created_at: Utc::now(),
    };

    let tool_payload = if stored.tool_payload.is_empty() {
        None
    } else {
        to_column(Some(&stored.tool_payload))?
    };

    tx.execute(
        &format!(
            "INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
            MESSAGE_COLUMNS
        ),
        params![
            stored.id,
            stored.conversation_id,
            stored.seq,
            stored.role.to_string(),
            stored.content,
            stored.tool_name,
            tool_payload,
            to_column(stored.sql_details.as_ref())?,
            to_column(stored.calculation_details.as_ref())?,
            to_column(stored.chart_data.as_ref())?,
            stored.error,
            stored.created_at.to_rfc3339(),
        ],
    )?;

    tx.execute(
        "UPDATE conversations SET message_count = message_count + 1, updated_at = ?2 WHERE id = ?1",
        params![conversation_id, stored.created_at.to_rfc3339()],
    )?;

    tx.commit().context("failed to commit append")?;
    Ok(stored)
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conversation = conversation.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO conversations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    CONVERSATION_COLUMNS
                ),
                params![
                    conversation.id,
                    conversation.identity.customer_id(),
                    conversation.identity.session_id(),
                    conversation.scenario().to_string(),
                    conversation.is_active,
                    conversation.message_count,
                    conversation.created_at.to_rfc3339(),
                    conversation.updated_at.to_rfc3339(),
                    conversation.metadata.to_string(),
                ],
            )
            .context("failed to insert conversation")?;
            debug!(id = %conversation.id, scenario = %conversation.scenario(), "created conversation");
            Ok(())
        })
        .await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
                    [&id],
                    ConversationRow::read,
                )
                .optional()?;
            row.map(ConversationRow::into_conversation).transpose()
        })
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conversations ORDER BY updated_at DESC, id",
                CONVERSATION_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], ConversationRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(ConversationRow::into_conversation).collect()
        })
        .await
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                anyhow::bail!("conversation '{}' not found", id);
            }
            debug!(id = %id, active, "updated conversation state");
            Ok(())
        })
        .await
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let _guard = self.locks.lock(id).await;

        let owned = id.to_string();
        let deleted = self
            .with_conn(move |conn| {
                let changed = conn.execute("DELETE FROM conversations WHERE id = ?1", [&owned])?;
                Ok(changed > 0)
            })
            .await?;

        if deleted {
            debug!(id = %id, "deleted conversation");
        }
        Ok(deleted)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<StoredMessage> {
        let _guard = self.locks.lock(conversation_id).await;

        let id = conversation_id.to_string();
        let stored = self
            .with_conn(move |conn| insert_message(conn, &id, message))
            .await?;
        debug!(
            conversation = %stored.conversation_id,
            seq = stored.seq,
            role = %stored.role,
            "appended message"
        );
        Ok(stored)
    }

    async fn messages(
        &self,
        conversation_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<StoredMessage>> {
        let id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND (?2 OR is_deleted = 0)
                 ORDER BY seq",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![id, include_deleted], MessageRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
        .await
    }

    async fn soft_delete_message(&self, conversation_id: &str, message_id: &str) -> Result<bool> {
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_deleted = 1 WHERE id = ?1 AND conversation_id = ?2",
                [&message_id, &conversation_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn save_summary(&self, summary: &ConversationSummary) -> Result<()> {
        let summary = summary.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversation_summaries (conversation_id, title, summary, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id) DO UPDATE SET
                     title = excluded.title,
                     summary = excluded.summary,
                     updated_at = excluded.updated_at",
                params![
                    summary.conversation_id,
                    summary.title,
                    summary.summary,
                    summary.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to save summary")?;
            Ok(())
        })
        .await
    }

    async fn summary(&self, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        let id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT conversation_id, title, summary, updated_at
                     FROM conversation_summaries WHERE conversation_id = ?1",
                    [&id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(conversation_id, title, summary, updated_at)| {
                Ok(ConversationSummary {
                    conversation_id,
                    title,
                    summary,
                    updated_at: parse_time(&updated_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn upsert_customer(&self, customer: &CustomerRecord) -> Result<()> {
        let customer = customer.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO customers (customer_id, name, annual_income, monthly_debt_payments,
                                        credit_score, savings, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(customer_id) DO UPDATE SET
                     name = excluded.name,
                     annual_income = excluded.annual_income,
                     monthly_debt_payments = excluded.monthly_debt_payments,
                     credit_score = excluded.credit_score,
                     savings = excluded.savings",
                params![
                    customer.customer_id,
                    customer.name,
                    customer.annual_income,
                    customer.monthly_debt_payments,
                    customer.credit_score,
                    customer.savings,
                    customer.created_at.to_rfc3339(),
                ],
            )
            .context("failed to save customer")?;
            debug!(customer = %customer.customer_id, "saved customer");
            Ok(())
        })
        .await
    }

    async fn get_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>> {
        let id = customer_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT customer_id, name, annual_income, monthly_debt_payments,
                            credit_score, savings, created_at
                     FROM customers WHERE customer_id = ?1",
                    [&id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, f64>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, f64>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    },
                )
                .optional()?;
            row.map(
                |(customer_id, name, annual_income, monthly_debt_payments, credit_score, savings, created_at)| {
                    Ok(CustomerRecord {
                        customer_id,
                        name,
                        annual_income,
                        monthly_debt_payments,
                        credit_score,
                        savings,
                        created_at: parse_time(&created_at)?,
                    })
                },
            )
            .transpose()
        })
        .await
    }
}
