//! PostgreSQL adapter: `$n` placeholders, native booleans, `BEGIN`/`COMMIT`/`ROLLBACK`.

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};

use crate::adapter::{ConnectionHandle, EngineAdapter, RawConnection};
use crate::error::{AdapterError, Result};
use crate::model::{
    ConnectionParams, Engine, ParamBindings, PreparedStatement, QueryOutcome, TypedParam, Value,
};
use crate::params::{placeholder_style, resolve_in_order, rewrite_named_params};

pub struct PostgresConnection {
    client: Client,
    // Holds the driver's connection-driving task; dropping it disconnects.
    _connection_task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl RawConnection for PostgresConnection {
    async fn ping(&mut self) -> bool {
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub struct PostgresAdapter {
    params: ConnectionParams,
}

impl PostgresAdapter {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    fn connection_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(host) = &self.params.host {
            parts.push(format!("host={host}"));
        }
        if let Some(port) = self.params.port {
            parts.push(format!("port={port}"));
        }
        if let Some(user) = &self.params.user {
            parts.push(format!("user={user}"));
        }
        if let Some(password) = &self.params.password {
            parts.push(format!("password={password}"));
        }
        if let Some(database) = &self.params.database {
            parts.push(format!("dbname={database}"));
        }
        parts.join(" ")
    }

    fn client_mut<'a>(&self, handle: &'a mut ConnectionHandle) -> Result<&'a mut Client> {
        handle
            .raw
            .as_any_mut()
            .downcast_mut::<PostgresConnection>()
            .map(|c| &mut c.client)
            .ok_or_else(|| AdapterError::Query("handle is not a postgres connection".into()))
    }
}

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn connect(&self) -> Result<ConnectionHandle> {
        let (client, connection) = tokio_postgres::connect(&self.connection_string(), NoTls)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection task ended");
            }
        });
        let raw = PostgresConnection { client, _connection_task: task };
        Ok(ConnectionHandle::new(Engine::Postgres, Box::new(raw)))
    }

    async fn disconnect(&self, _handle: ConnectionHandle) -> Result<()> {
        // Dropping the handle drops the client and aborts the driving task.
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
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::Postgres));
        let bound = resolve_in_order(&order, params);
        let client = self.client_mut(handle)?;
        run_statement(client, &rewritten, &bound).await
    }

    async fn prepare(&self, handle: &mut ConnectionHandle, sql: &str) -> Result<PreparedStatement> {
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::Postgres));
        let client = self.client_mut(handle)?;
        client
            .prepare(&rewritten)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        Ok(PreparedStatement { id: 0, sql: rewritten, param_order: order })
    }

    async fn execute_prepared(
        &self,
        handle: &mut ConnectionHandle,
        stmt: &PreparedStatement,
        params: &ParamBindings,
    ) -> Result<QueryOutcome> {
        let bound = resolve_in_order(&stmt.param_order, params);
        let client = self.client_mut(handle)?;
        run_statement(client, &stmt.sql, &bound).await
    }

    async fn begin(&self, handle: &mut ConnectionHandle) -> Result<()> {
        self.execute(handle, "BEGIN", &ParamBindings::new()).await?;
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

/// `tokio_postgres` only reports a modified-row count from `execute`, which
/// in turn never returns row data — so statements that return rows (SELECT,
/// WITH, SHOW) go through `query`, and everything else (INSERT/UPDATE/
/// DELETE, DDL, BEGIN/COMMIT/ROLLBACK) goes through `execute` for a real
/// `affected_rows`.
fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH") || upper.starts_with("SHOW")
}

async fn run_statement(client: &mut Client, sql: &str, params: &[TypedParam]) -> Result<QueryOutcome> {
    let boxed: Vec<Box<dyn ToSql + Sync>> = params.iter().map(to_sql_param).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();

    if !returns_rows(sql) {
        let affected_rows = client
            .execute(sql, &refs)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        return Ok(QueryOutcome { columns: Vec::new(), rows: Vec::new(), affected_rows });
    }

    let rows = client
        .query(sql, &refs)
        .await
        .map_err(|e| AdapterError::Query(e.to_string()))?;

    let columns = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Vec::with_capacity(row.columns().len());
        for i in 0..row.columns().len() {
            values.push(extract_value(row, i));
        }
        out_rows.push(values);
    }

    Ok(QueryOutcome { columns, rows: out_rows, affected_rows: 0 })
}

fn to_sql_param(param: &TypedParam) -> Box<dyn ToSql + Sync> {
    match param {
        TypedParam::Integer(v) => Box::new(*v),
        TypedParam::String(v) => Box::new(v.clone()),
        TypedParam::Boolean(v) => Box::new(*v),
        TypedParam::Float(v) => Box::new(*v),
        TypedParam::Null => Box::new(Option::<i64>::None),
    }
}

fn extract_value(row: &tokio_postgres::Row, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
        return v.map(Value::Integer).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<bool>>(idx) {
        return v.map(Value::Boolean).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<f64>>(idx) {
        return v.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    Value::Null
}
