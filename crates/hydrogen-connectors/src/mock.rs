//! An in-memory `EngineAdapter`, used by the pool/DQM/migration test suites
//! so they can exercise dispatch, pooling and transactional semantics
//! without a live PostgreSQL/MySQL/SQLite/DB2 server.
//!
//! This is a tiny table engine, not a SQL parser: it understands just
//! enough of `INSERT INTO <table> (<cols>) VALUES (<vals>)` and
//! `SELECT <cols> FROM <table>` to let the higher crates' tests round-trip
//! real statements (e.g. `migrations_log`) without a live database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::adapter::{ConnectionHandle, EngineAdapter, RawConnection};
use crate::error::{AdapterError, Result};
use crate::model::{Engine, ParamBindings, PreparedStatement, QueryOutcome, TypedParam, Value};

static NAMED_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

/// Inlines `:name` placeholders as SQL literals before this tiny table
/// engine parses the statement. Real adapters rewrite to native
/// positional placeholders instead (`hydrogen_connectors::params`); the
/// mock just needs something its own literal parser can read back.
fn substitute_params(sql: &str, params: &ParamBindings) -> String {
    NAMED_PARAM
        .replace_all(sql, |caps: &regex::Captures| {
            match params.get(&caps[1]) {
                Some(TypedParam::Integer(n)) => n.to_string(),
                Some(TypedParam::Float(f)) => f.to_string(),
                Some(TypedParam::Boolean(b)) => if *b { "1".to_string() } else { "0".to_string() },
                Some(TypedParam::String(s)) => format!("'{}'", s.replace('\'', "''")),
                Some(TypedParam::Null) | None => "NULL".to_string(),
            }
        })
        .into_owned()
}

type Row = HashMap<String, Value>;

/// Shared in-memory tables, keyed by name, plus a statement log so tests
/// can assert what actually got executed.
#[derive(Default)]
pub struct MockDatabase {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    pub executed_statements: Mutex<Vec<String>>,
}

pub struct MockConnection {
    alive: AtomicBool,
    /// Snapshot of every table taken on `begin`, restored on `rollback`.
    snapshot: Mutex<Option<HashMap<String, Vec<Row>>>>,
}

#[async_trait]
impl RawConnection for MockConnection {
    async fn ping(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Adapter over a shared [`MockDatabase`]. `fail_next` lets tests simulate
/// `Disconnected` to exercise the pool's fresh-handle retry and the DQM's
/// retry-once policy.
pub struct MockAdapter {
    db: Arc<MockDatabase>,
    fail_next_n_executes: AtomicU64,
}

impl MockAdapter {
    pub fn new(db: Arc<MockDatabase>) -> Self {
        Self { db, fail_next_n_executes: AtomicU64::new(0) }
    }

    pub fn fail_next(&self, n: u64) {
        self.fail_next_n_executes.store(n, Ordering::SeqCst);
    }

    fn conn<'a>(&self, handle: &'a mut ConnectionHandle) -> Result<&'a mut MockConnection> {
        handle
            .raw
            .as_any_mut()
            .downcast_mut::<MockConnection>()
            .ok_or_else(|| AdapterError::Query("not a mock connection".into()))
    }
}

/// Parses `CREATE TABLE <name> ...` / `INSERT INTO <name> ...` /
/// `SELECT ... FROM <name> ...` just far enough to find the table name.
fn table_name(sql: &str, keyword_before: &str) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    let idx = upper.find(keyword_before)?;
    let mut rest = sql[idx + keyword_before.len()..].trim_start();
    const IF_NOT_EXISTS: &str = "IF NOT EXISTS";
    if rest.len() >= IF_NOT_EXISTS.len() && rest[..IF_NOT_EXISTS.len()].eq_ignore_ascii_case(IF_NOT_EXISTS) {
        rest = rest[IF_NOT_EXISTS.len()..].trim_start();
    }
    let name: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Splits `(a, b, c)` into `["a", "b", "c"]`, trimming whitespace.
fn parse_paren_list(s: &str) -> Vec<String> {
    s.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|s| s.trim().to_string())
        .collect()
}

fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Value::String(inner.replace("''", "'"));
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Integer(n);
    }
    Value::String(raw.to_string())
}

/// Handles `INSERT INTO name (cols) VALUES (vals)`. Anything else that
/// isn't a recognized DDL/INSERT/SELECT shape is treated as a no-op write
/// (e.g. `CREATE TABLE ...`), which still registers the table.
fn apply_insert(tables: &mut HashMap<String, Vec<Row>>, sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    let Some(name) = table_name(sql, "INSERT INTO") else { return false };
    let Some(cols_start) = upper.find('(') else { return false };
    let Some(cols_end) = upper[cols_start..].find(')') else { return false };
    let cols_end = cols_start + cols_end;
    let cols = parse_paren_list(&sql[cols_start..=cols_end]);

    let Some(values_idx) = upper[cols_end..].find("VALUES") else { return false };
    let values_section = &sql[cols_end + values_idx + "VALUES".len()..];
    let vals_start = values_section.find('(').unwrap_or(0);
    let vals_end = values_section.rfind(')').unwrap_or(values_section.len());
    let raw_vals = split_respecting_quotes(&values_section[vals_start + 1..vals_end]);

    let mut row = Row::new();
    for (col, raw) in cols.iter().zip(raw_vals.iter()) {
        row.insert(col.clone(), parse_literal(raw));
    }
    tables.entry(name).or_default().push(row);
    true
}

fn split_respecting_quotes(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// The remainder of `sql` after a top-level ` WHERE `, if any. No support
/// for parenthesized groups or `ORDER BY`/`LIMIT` — callers that need
/// those restructure the query instead (mirrors the real adapters'
/// contract: SQL stays simple enough for one-table filtering).
fn where_clause(sql: &str) -> Option<&str> {
    let upper = sql.to_ascii_uppercase();
    let idx = upper.find(" WHERE ")?;
    Some(sql[idx + " WHERE ".len()..].trim())
}

fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Integer(x), Value::Boolean(y)) | (Value::Boolean(y), Value::Integer(x)) => (*x != 0) == *y,
        _ => false,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn eval_condition(row: &Row, cond: &str) -> bool {
    let cond = cond.trim();
    if let Some(col) = cond.strip_suffix("IS NOT NULL") {
        return !matches!(row.get(col.trim()), None | Some(Value::Null));
    }
    if let Some(col) = cond.strip_suffix("IS NULL") {
        return matches!(row.get(col.trim()), None | Some(Value::Null));
    }
    for op in ["<=", ">=", "!=", "=", "<", ">"] {
        let Some(idx) = cond.find(op) else { continue };
        let col = cond[..idx].trim();
        let expected = parse_literal(cond[idx + op.len()..].trim());
        let actual = row.get(col).cloned().unwrap_or(Value::Null);
        return match op {
            "=" => values_eq(&actual, &expected),
            "!=" => !values_eq(&actual, &expected),
            ">" => as_f64(&actual).zip(as_f64(&expected)).is_some_and(|(x, y)| x > y),
            ">=" => as_f64(&actual).zip(as_f64(&expected)).is_some_and(|(x, y)| x >= y),
            "<" => as_f64(&actual).zip(as_f64(&expected)).is_some_and(|(x, y)| x < y),
            "<=" => as_f64(&actual).zip(as_f64(&expected)).is_some_and(|(x, y)| x <= y),
            _ => false,
        };
    }
    true
}

/// `cond1 AND cond2 OR cond3 AND cond4` — OR of AND-groups, left to right,
/// no operator precedence surprises since there's no parenthesization to
/// get wrong.
fn row_matches(row: &Row, where_sql: &str) -> bool {
    where_sql.split(" OR ").any(|group| group.split(" AND ").all(|cond| eval_condition(row, cond)))
}

fn apply_delete(tables: &mut HashMap<String, Vec<Row>>, sql: &str) -> u64 {
    let Some(name) = table_name(sql, "FROM") else { return 0 };
    let Some(rows) = tables.get_mut(&name) else { return 0 };
    let before = rows.len();
    match where_clause(sql) {
        Some(w) => rows.retain(|r| !row_matches(r, w)),
        None => rows.clear(),
    }
    (before - rows.len()) as u64
}

fn apply_select(tables: &HashMap<String, Vec<Row>>, sql: &str) -> QueryOutcome {
    let upper = sql.to_ascii_uppercase();
    let Some(name) = table_name(sql, "FROM") else {
        return QueryOutcome::default();
    };
    let Some(select_end) = upper.find("FROM") else {
        return QueryOutcome::default();
    };
    let cols_raw = sql["SELECT".len()..select_end].trim();
    let mut rows = tables.get(&name).cloned().unwrap_or_default();
    if let Some(w) = where_clause(sql) {
        rows.retain(|r| row_matches(r, w));
    }

    if cols_raw == "*" {
        let columns: Vec<String> = rows.first().map(|r| r.keys().cloned().collect()).unwrap_or_default();
        let out_rows = rows
            .iter()
            .map(|row| columns.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect())
            .collect();
        return QueryOutcome { columns, rows: out_rows, affected_rows: 0 };
    }

    let columns: Vec<String> = cols_raw.split(',').map(|c| c.trim().to_string()).collect();
    let out_rows = rows
        .iter()
        .map(|row| columns.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect())
        .collect();
    QueryOutcome { columns, rows: out_rows, affected_rows: 0 }
}

#[async_trait]
impl EngineAdapter for MockAdapter {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn connect(&self) -> Result<ConnectionHandle> {
        let raw = MockConnection { alive: AtomicBool::new(true), snapshot: Mutex::new(None) };
        Ok(ConnectionHandle::new(Engine::Sqlite, Box::new(raw)))
    }

    async fn disconnect(&self, _handle: ConnectionHandle) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self, handle: &mut ConnectionHandle) -> Result<bool> {
        Ok(handle.raw.ping().await)
    }

    async fn execute(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &ParamBindings,
    ) -> Result<QueryOutcome> {
        if self.fail_next_n_executes.load(Ordering::SeqCst) > 0 {
            self.fail_next_n_executes.fetch_sub(1, Ordering::SeqCst);
            self.conn(handle)?.alive.store(false, Ordering::SeqCst);
            return Err(AdapterError::Disconnected);
        }

        let sql = substitute_params(sql, params);
        let sql = sql.as_str();
        self.db.executed_statements.lock().push(sql.to_string());

        if sql.contains("__FAIL__") {
            return Err(AdapterError::Query("simulated migration statement failure".into()));
        }

        let upper = sql.trim_start().to_ascii_uppercase();
        let mut tables = self.db.tables.lock();

        if upper.starts_with("SELECT") {
            return Ok(apply_select(&tables, sql));
        }

        if upper.starts_with("CREATE TABLE") {
            if let Some(name) = table_name(sql, "CREATE TABLE") {
                tables.entry(name).or_default();
            }
            return Ok(QueryOutcome::default());
        }

        if upper.starts_with("INSERT") {
            apply_insert(&mut tables, sql);
            return Ok(QueryOutcome { affected_rows: 1, ..Default::default() });
        }

        if upper.starts_with("DELETE") {
            let affected = apply_delete(&mut tables, sql);
            return Ok(QueryOutcome { affected_rows: affected, ..Default::default() });
        }

        Ok(QueryOutcome { affected_rows: 1, ..Default::default() })
    }

    async fn prepare(&self, _handle: &mut ConnectionHandle, sql: &str) -> Result<PreparedStatement> {
        Ok(PreparedStatement { id: 0, sql: sql.to_string(), param_order: vec![] })
    }

    async fn execute_prepared(
        &self,
        handle: &mut ConnectionHandle,
        stmt: &PreparedStatement,
        params: &ParamBindings,
    ) -> Result<QueryOutcome> {
        self.execute(handle, &stmt.sql, params).await
    }

    async fn begin(&self, handle: &mut ConnectionHandle) -> Result<()> {
        let snapshot = self.db.tables.lock().clone();
        *self.conn(handle)?.snapshot.lock() = Some(snapshot);
        handle.transaction_depth += 1;
        Ok(())
    }

    async fn commit(&self, handle: &mut ConnectionHandle) -> Result<()> {
        *self.conn(handle)?.snapshot.lock() = None;
        handle.transaction_depth = handle.transaction_depth.saturating_sub(1);
        Ok(())
    }

    async fn rollback(&self, handle: &mut ConnectionHandle) -> Result<()> {
        if let Some(snapshot) = self.conn(handle)?.snapshot.lock().take() {
            *self.db.tables.lock() = snapshot;
        }
        handle.transaction_depth = handle.transaction_depth.saturating_sub(1);
        Ok(())
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_select_round_trips() {
        let db = Arc::new(MockDatabase::default());
        let adapter = MockAdapter::new(db);
        let mut handle = adapter.connect().await.unwrap();

        adapter
            .execute(&mut handle, "CREATE TABLE widgets (id INTEGER, name VARCHAR(32))", &ParamBindings::new())
            .await
            .unwrap();
        adapter
            .execute(&mut handle, "INSERT INTO widgets (id, name) VALUES (1, 'gear')", &ParamBindings::new())
            .await
            .unwrap();

        let outcome = adapter.execute(&mut handle, "SELECT id, name FROM widgets", &ParamBindings::new()).await.unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0][0], Value::Integer(1));
        assert_eq!(outcome.rows[0][1], Value::String("gear".into()));
    }

    #[tokio::test]
    async fn rollback_restores_pre_transaction_snapshot() {
        let db = Arc::new(MockDatabase::default());
        let adapter = MockAdapter::new(db);
        let mut handle = adapter.connect().await.unwrap();

        adapter.execute(&mut handle, "CREATE TABLE t (id INTEGER)", &ParamBindings::new()).await.unwrap();
        adapter.begin(&mut handle).await.unwrap();
        adapter.execute(&mut handle, "INSERT INTO t (id) VALUES (1)", &ParamBindings::new()).await.unwrap();
        adapter.rollback(&mut handle).await.unwrap();

        let outcome = adapter.execute(&mut handle, "SELECT id FROM t", &ParamBindings::new()).await.unwrap();
        assert!(outcome.rows.is_empty());
    }

    #[tokio::test]
    async fn named_params_and_where_clause_filter_rows() {
        let db = Arc::new(MockDatabase::default());
        let adapter = MockAdapter::new(db);
        let mut handle = adapter.connect().await.unwrap();

        adapter.execute(&mut handle, "CREATE TABLE accounts (id INTEGER, name VARCHAR(32))", &ParamBindings::new()).await.unwrap();
        adapter.execute(&mut handle, "INSERT INTO accounts (id, name) VALUES (1, 'alice')", &ParamBindings::new()).await.unwrap();
        adapter.execute(&mut handle, "INSERT INTO accounts (id, name) VALUES (2, 'bob')", &ParamBindings::new()).await.unwrap();

        let mut params = ParamBindings::new();
        params.insert("name", TypedParam::String("bob".into()));
        let outcome = adapter.execute(&mut handle, "SELECT id, name FROM accounts WHERE name = :name", &params).await.unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0][0], Value::Integer(2));
    }

    #[tokio::test]
    async fn delete_removes_only_matching_rows() {
        let db = Arc::new(MockDatabase::default());
        let adapter = MockAdapter::new(db);
        let mut handle = adapter.connect().await.unwrap();

        adapter.execute(&mut handle, "CREATE TABLE t (id INTEGER)", &ParamBindings::new()).await.unwrap();
        adapter.execute(&mut handle, "INSERT INTO t (id) VALUES (1)", &ParamBindings::new()).await.unwrap();
        adapter.execute(&mut handle, "INSERT INTO t (id) VALUES (2)", &ParamBindings::new()).await.unwrap();

        let mut params = ParamBindings::new();
        params.insert("id", TypedParam::Integer(1));
        let outcome = adapter.execute(&mut handle, "DELETE FROM t WHERE id = :id", &params).await.unwrap();
        assert_eq!(outcome.affected_rows, 1);

        let remaining = adapter.execute(&mut handle, "SELECT id FROM t", &ParamBindings::new()).await.unwrap();
        assert_eq!(remaining.rows, vec![vec![Value::Integer(2)]]);
    }
}
