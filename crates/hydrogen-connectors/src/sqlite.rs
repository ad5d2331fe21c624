//! SQLite adapter: `?` placeholders, 0/1 booleans, `BEGIN TRANSACTION`.
//!
//! `rusqlite::Connection` is synchronous, so every call is dispatched onto
//! `tokio::task::spawn_blocking`. The connection itself lives behind an
//! `Arc<Mutex<_>>` so it can be moved into blocking closures without leaving
//! the handle.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};

use crate::adapter::{ConnectionHandle, EngineAdapter, RawConnection};
use crate::error::{AdapterError, Result};
use crate::model::{
    ConnectionParams, Engine, ParamBindings, PreparedStatement, QueryOutcome, TypedParam, Value,
};
use crate::params::{placeholder_style, resolve_in_order, rewrite_named_params};

pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl RawConnection for SqliteConnection {
    async fn ping(&mut self) -> bool {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || conn.lock().execute("SELECT 1", []).is_ok())
            .await
            .unwrap_or(false)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub struct SqliteAdapter {
    path: String,
}

impl SqliteAdapter {
    pub fn new(params: ConnectionParams) -> Self {
        Self { path: params.path.unwrap_or_else(|| ":memory:".to_string()) }
    }

    fn conn_arc(&self, handle: &mut ConnectionHandle) -> Result<Arc<Mutex<Connection>>> {
        handle
            .raw
            .as_any_mut()
            .downcast_mut::<SqliteConnection>()
            .map(|c| c.conn.clone())
            .ok_or_else(|| AdapterError::Query("handle is not a sqlite connection".into()))
    }
}

#[async_trait]
impl EngineAdapter for SqliteAdapter {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn connect(&self) -> Result<ConnectionHandle> {
        let path = self.path.clone();
        let conn = tokio::task::spawn_blocking(move || Connection::open(path))
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        let raw = SqliteConnection { conn: Arc::new(Mutex::new(conn)) };
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
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::Sqlite));
        let bound = resolve_in_order(&order, params);
        run_statement(self.conn_arc(handle)?, rewritten, bound).await
    }

    async fn prepare(&self, _handle: &mut ConnectionHandle, sql: &str) -> Result<PreparedStatement> {
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::Sqlite));
        Ok(PreparedStatement { id: 0, sql: rewritten, param_order: order })
    }

    async fn execute_prepared(
        &self,
        handle: &mut ConnectionHandle,
        stmt: &PreparedStatement,
        params: &ParamBindings,
    ) -> Result<QueryOutcome> {
        let bound = resolve_in_order(&stmt.param_order, params);
        run_statement(self.conn_arc(handle)?, stmt.sql.clone(), bound).await
    }

    async fn begin(&self, handle: &mut ConnectionHandle) -> Result<()> {
        self.execute(handle, "BEGIN TRANSACTION", &ParamBindings::new()).await?;
        handle.transaction_depth += 1;
        Ok(())
    }

    async fn commit(&self, handle: &mut ConnectionHandle) -> Result<()> {
        self.execute(handle, "COMMIT", &ParamBindings::new()).await?;
        handle.transaction_depth = handle.transaction_depth.saturating_sub(1);
        Ok(())
    }

    async fn rollback(&self, handle: &mut ConnectionHandle) -> Result<()> {
        self.execute(handle, "ROLLBACK", &ParamBindings::new()).await?;
        handle.transaction_depth = handle.transaction_depth.saturating_sub(1);
        Ok(())
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }
}

fn to_rusqlite_value(param: &TypedParam) -> rusqlite::types::Value {
    use rusqlite::types::Value as RV;
    match param {
        // SQLite has no native boolean; booleans bind as 0/1 integers.
        TypedParam::Boolean(b) => RV::Integer(if *b { 1 } else { 0 }),
        TypedParam::Integer(v) => RV::Integer(*v),
        TypedParam::String(v) => RV::Text(v.clone()),
        TypedParam::Float(v) => RV::Real(*v),
        TypedParam::Null => RV::Null,
    }
}

async fn run_statement(
    conn: Arc<Mutex<Connection>>,
    sql: String,
    params: Vec<TypedParam>,
) -> Result<QueryOutcome> {
    tokio::task::spawn_blocking(move || {
        let conn = conn.lock();
        let bound: Vec<rusqlite::types::Value> = params.iter().map(to_rusqlite_value).collect();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows_result = stmt.query_map(params_from_iter(bound.iter()), |row| {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let v: rusqlite::types::Value = row.get(i)?;
                values.push(from_rusqlite_value(v));
            }
            Ok(values)
        });

        let rows = match rows_result {
            Ok(mapped) => mapped
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| AdapterError::Query(e.to_string()))?,
            Err(e) => return Err(AdapterError::Query(e.to_string())),
        };

        let affected_rows = if rows.is_empty() { conn.changes() } else { 0 };

        Ok(QueryOutcome { columns, rows, affected_rows })
    })
    .await
    .map_err(|e| AdapterError::Query(e.to_string()))?
}

fn from_rusqlite_value(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as RV;
    match value {
        RV::Null => Value::Null,
        RV::Integer(i) => Value::Integer(i),
        RV::Real(f) => Value::Float(f),
        RV::Text(s) => Value::String(s),
        RV::Blob(b) => Value::Bytes(b),
    }
}
