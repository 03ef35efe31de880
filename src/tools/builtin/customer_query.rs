use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Value, json};
use tokio::task;
use tracing::debug;

use crate::tools::{SqlDetails, Tool, ToolContext, ToolError, ToolPayload, require_str};

const MAX_ROWS: usize = 200;

static READ_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*(select|with)\b").expect("valid regex"));

pub(super) fn load(ctx: &ToolContext) -> Result<Vec<Box<dyn Tool>>> {
    let db_path = ctx
        .database_path
        .clone()
        .context("customer_query needs a database path")?;
    Ok(vec![Box::new(CustomerQueryTool::new(db_path))])
}

/// Runs model-written read-only SQL against customer financial records
pub struct CustomerQueryTool {
    db_path: PathBuf,
}

impl CustomerQueryTool {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

/// Accept a SELECT (or WITH ... SELECT) and return it without a trailing `;`.
///
/// Whether it writes is decided by SQLite once the statement is prepared.
fn validate_query(sql: &str) -> Result<&str, ToolError> {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    if sql.is_empty() {
        return Err(ToolError::InvalidArguments("sql is empty".into()));
    }
    if !READ_STATEMENT.is_match(sql) {
        return Err(ToolError::InvalidArguments(
            "only SELECT queries are allowed".into(),
        ));
    }
    Ok(sql)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(format!("<{} bytes>", b.len())),
    }
}

fn run_query(db_path: &Path, sql: &str) -> Result<SqlDetails, ToolError> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| ToolError::Unavailable(format!("customer database: {}", e)))?;

    let mut stmt = conn.prepare(sql).map_err(|e| match e {
        rusqlite::Error::MultipleStatement => {
            ToolError::InvalidArguments("only a single statement is allowed".into())
        }
        e => ToolError::Query(e.to_string()),
    })?;
    if !stmt.readonly() {
        return Err(ToolError::InvalidArguments(
            "only read-only statements are allowed".into(),
        ));
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([]).map_err(|e| ToolError::Query(e.to_string()))?;
    let mut out = Vec::new();
    let mut truncated = false;

    while let Some(row) = rows.next().map_err(|e| ToolError::Query(e.to_string()))? {
        if out.len() == MAX_ROWS {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value = row.get_ref(i).map_err(|e| ToolError::Query(e.to_string()))?;
            values.push(to_json(value));
        }
        out.push(values);
    }

    Ok(SqlDetails {
        query: sql.to_string(),
        columns,
        row_count: out.len(),
        rows: out,
        truncated,
    })
}

#[async_trait]
impl Tool for CustomerQueryTool {
    fn name(&self) -> &str {
        "customer_query"
    }

    fn description(&self) -> &str {
        "Answer questions about customer financial records by writing a single read-only \
         SQLite SELECT statement. Table customers(customer_id TEXT, name TEXT, \
         annual_income REAL, monthly_debt_payments REAL, credit_score INTEGER, \
         savings REAL, created_at TEXT). Parameters: sql. Returns the column names \
         and up to 200 rows."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A single SELECT statement over the customers table"
                }
            },
            "required": ["sql"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolPayload, ToolError> {
        let sql = validate_query(require_str(&args, "sql")?)?.to_string();
        let db_path = self.db_path.clone();
        debug!(sql = %sql, "running customer query");

        let details = task::spawn_blocking(move || run_query(&db_path, &sql))
            .await
            .context("spawn_blocking failed")??;

        Ok(ToolPayload::Sql(details))
    }
}
