// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! SQLite access for the `database` tool
//!
//! The model owns the schema: it creates tables with `exec` batches and reads
//! and writes rows with prepared statements. Every statement runs on the
//! blocking pool behind a single connection. The schema text handed to the
//! prompt is cached and refreshed whenever DDL succeeds.

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use crate::error::{NokodeError, Result};
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolOutput};

const SCHEMA_HEADER: &str = "\n## DATABASE SCHEMA (Use these exact column names!)\n\n";
const QUERY_PREVIEW_CHARS: usize = 100;

/// How a statement is run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// One prepared statement with bound parameters
    Query,
    /// A parameterless batch (DDL, several statements)
    Exec,
}

impl QueryMode {
    /// Anything other than `exec` is a prepared query
    pub fn parse(mode: &str) -> Self {
        if mode.eq_ignore_ascii_case("exec") {
            QueryMode::Exec
        } else {
            QueryMode::Query
        }
    }
}

/// Result reported to the model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Map<String, Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_rowid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: u64,
}

impl QueryOutcome {
    fn failed(error: impl Into<String>, duration: u64) -> Self {
        Self {
            error: Some(error.into()),
            duration,
            ..Default::default()
        }
    }
}

/// The application database
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    schema: RwLock<String>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "database opened");
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let schema = load_schema(&conn)?;
        tracing::debug!(bytes = schema.len(), "database schema cached");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema: RwLock::new(schema),
        })
    }

    /// The cached `CREATE TABLE` statements, formatted for the prompt
    pub fn schema(&self) -> String {
        match self.schema.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                tracing::warn!("Schema cache lock was poisoned, recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    fn set_schema(&self, schema: String) {
        match self.schema.write() {
            Ok(mut guard) => *guard = schema,
            Err(poisoned) => {
                tracing::warn!("Schema cache lock was poisoned, recovering");
                *poisoned.into_inner() = schema;
            }
        }
    }

    /// A short summary of how much data exists, or empty when there is none
    pub async fn context(&self) -> String {
        match self.with_connection(table_counts).await {
            Ok(counts) => format_context(&counts),
            Err(e) => {
                tracing::warn!(error = %e, "failed to compute database context");
                String::new()
            }
        }
    }

    /// Run one tool request
    pub async fn execute(&self, query: String, params: Vec<Value>, mode: QueryMode) -> QueryOutcome {
        let start = Instant::now();
        tracing::debug!(
            ?mode,
            query = %preview(&query),
            params_count = params.len(),
            "executing database query"
        );

        if query.trim().is_empty() {
            return QueryOutcome::failed("query is required", 0);
        }
        if mode == QueryMode::Exec && !params.is_empty() {
            return QueryOutcome::failed(
                "exec mode does not accept params; use mode \"query\" for parameterized statements",
                0,
            );
        }

        let result = self
            .with_connection(move |conn| run_statement(conn, &query, &params, mode))
            .await;
        let duration = start.elapsed().as_millis() as u64;

        match result {
            Ok((mut outcome, schema)) => {
                outcome.duration = duration;
                if let Some(schema) = schema {
                    self.set_schema(schema);
                }
                match (&outcome.count, &outcome.changes) {
                    (Some(count), _) => {
                        tracing::info!(rows = count, duration_ms = duration, "SELECT completed")
                    }
                    (_, Some(changes)) => {
                        tracing::info!(changes, duration_ms = duration, "statement completed")
                    }
                    _ => tracing::info!(duration_ms = duration, "exec completed"),
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(error = %e, duration_ms = duration, "query failed");
                QueryOutcome::failed(sqlite_message(&e), duration)
            }
        }
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            f(&guard)
        })
        .await
        .map_err(|e| NokodeError::ToolExecution(format!("database task failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Database connection lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// The bare sqlite message, without the wrapper's prefix
fn sqlite_message(error: &NokodeError) -> String {
    match error {
        NokodeError::Database(e) => e.to_string(),
        other => other.to_string(),
    }
}

fn preview(query: &str) -> String {
    if query.chars().count() > QUERY_PREVIEW_CHARS {
        let head: String = query.chars().take(QUERY_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        query.to_string()
    }
}

fn load_schema(conn: &Connection) -> Result<String> {
    let mut stmt =
        conn.prepare("SELECT sql FROM sqlite_master WHERE type='table' AND sql IS NOT NULL")?;
    let statements = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if statements.is_empty() {
        return Ok(String::new());
    }

    let mut schema = String::from(SCHEMA_HEADER);
    for sql in statements {
        schema.push_str(&sql);
        schema.push_str(";\n\n");
    }
    Ok(schema)
}

fn table_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut counts = Vec::with_capacity(tables.len());
    for table in tables {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        counts.push((table, count));
    }
    Ok(counts)
}

fn format_context(counts: &[(String, i64)]) -> String {
    let populated: Vec<String> = counts
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(table, count)| format!("{} row(s) in `{}`", count, table))
        .collect();

    if populated.is_empty() {
        return String::new();
    }
    format!(
        "\n## DATABASE CONTEXT\n\nThe database currently contains {}. Use the database tool to query them if needed for this request.\n\n",
        populated.join(", ")
    )
}

fn is_schema_change(query: &str) -> bool {
    let keyword = query
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(keyword.as_str(), "CREATE" | "ALTER" | "DROP")
}

/// Run the statement; the second value is a fresh schema when DDL ran
fn run_statement(
    conn: &Connection,
    query: &str,
    params: &[Value],
    mode: QueryMode,
) -> Result<(QueryOutcome, Option<String>)> {
    if mode == QueryMode::Exec {
        conn.execute_batch(query)?;
        let outcome = QueryOutcome {
            success: true,
            message: Some("Query executed successfully".to_string()),
            ..Default::default()
        };
        return Ok((outcome, Some(load_schema(conn)?)));
    }

    let mut stmt = conn.prepare(query)?;
    let bound = params_from_iter(params.iter().map(to_sql_value));

    if stmt.column_count() > 0 {
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(bound)?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                map.insert(name.clone(), column_value(row.get_ref(i)?));
            }
            collected.push(map);
        }

        let outcome = QueryOutcome {
            success: true,
            count: Some(collected.len()),
            rows: Some(collected),
            ..Default::default()
        };
        return Ok((outcome, None));
    }

    let changes = stmt.execute(bound)?;
    let outcome = QueryOutcome {
        success: true,
        changes: Some(changes),
        last_insert_rowid: Some(conn.last_insert_rowid()),
        ..Default::default()
    };
    let schema = if is_schema_change(query) {
        Some(load_schema(conn)?)
    } else {
        None
    };
    Ok((outcome, schema))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

pub struct DatabaseTool {
    database: Arc<Database>,
}

impl DatabaseTool {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Tool for DatabaseTool {
    fn name(&self) -> &str {
        "database"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "database".to_string(),
            description: "Execute SQL queries on the SQLite database. You can create tables, insert data, query, update, delete - any SQL operation.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("query", "The SQL query to execute", true)
                .array(
                    "params",
                    "Optional parameters for prepared statements (prevents SQL injection)",
                    false,
                )
                .string_enum(
                    "mode",
                    "Mode: 'query' for SELECT/returning data, 'exec' for DDL/multiple statements",
                    &["query", "exec"],
                    Some("query"),
                    false,
                )
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let query = input["query"].as_str().unwrap_or("").to_string();
        let params = match input.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(NokodeError::InvalidInput(
                    "params must be an array".to_string(),
                ))
            }
        };
        let mode = QueryMode::parse(input["mode"].as_str().unwrap_or("query"));

        let outcome = self.database.execute(query, params, mode).await;
        Ok(ToolOutput::Value(serde_json::to_value(outcome)?))
    }
}
