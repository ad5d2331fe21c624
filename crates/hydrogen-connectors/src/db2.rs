//! DB2 adapter, over ODBC (`odbc-api`) since DB2 has no native async Rust
//! driver — this is the one adapter not grounded in any example repo (see
//! `DESIGN.md`). DB2 needs connection-level timeout control and
//! autocommit off with explicit `COMMIT`, and (documented deviation, open
//! question 4) the migration engine commits each DB2 statement individually
//! rather than wrapping the whole batch in one transaction.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::adapter::{ConnectionHandle, EngineAdapter, RawConnection};
use crate::error::{AdapterError, Result};
use crate::model::{
    ConnectionParams, Engine, ParamBindings, PreparedStatement, QueryOutcome, TypedParam, Value,
};
use crate::params::{placeholder_style, resolve_in_order, rewrite_named_params};

static ENVIRONMENT: OnceCell<odbc_api::Environment> = OnceCell::new();

fn environment() -> std::result::Result<&'static odbc_api::Environment, odbc_api::Error> {
    ENVIRONMENT.get_or_try_init(odbc_api::Environment::new)
}

pub struct Db2Connection {
    conn: Arc<Mutex<odbc_api::Connection<'static>>>,
}

#[async_trait]
impl RawConnection for Db2Connection {
    async fn ping(&mut self) -> bool {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || conn.lock().execute("SELECT 1 FROM SYSIBM.SYSDUMMY1", ()).is_ok())
            .await
            .unwrap_or(false)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub struct Db2Adapter {
    /// ODBC connection string, built from `connection_params.dsn` or
    /// host/port/user/password/database.
    connection_string: String,
    /// Connection-level timeout, observed as required in source notes.
    login_timeout_secs: u32,
}

impl Db2Adapter {
    pub fn new(params: ConnectionParams) -> Self {
        let connection_string = params.dsn.clone().unwrap_or_else(|| {
            format!(
                "DRIVER={{IBM DB2 ODBC DRIVER}};HOSTNAME={};PORT={};DATABASE={};UID={};PWD={};",
                params.host.as_deref().unwrap_or("localhost"),
                params.port.unwrap_or(50000),
                params.database.as_deref().unwrap_or(""),
                params.user.as_deref().unwrap_or(""),
                params.password.as_deref().unwrap_or(""),
            )
        });
        Self { connection_string, login_timeout_secs: 10 }
    }

    fn conn_arc(
        &self,
        handle: &mut ConnectionHandle,
    ) -> Result<Arc<Mutex<odbc_api::Connection<'static>>>> {
        handle
            .raw
            .as_any_mut()
            .downcast_mut::<Db2Connection>()
            .map(|c| c.conn.clone())
            .ok_or_else(|| AdapterError::Query("handle is not a db2 connection".into()))
    }
}

#[async_trait]
impl EngineAdapter for Db2Adapter {
    fn engine(&self) -> Engine {
        Engine::Db2
    }

    async fn connect(&self) -> Result<ConnectionHandle> {
        let connection_string = self.connection_string.clone();
        let timeout = self.login_timeout_secs;
        let conn = tokio::task::spawn_blocking(move || -> std::result::Result<_, odbc_api::Error> {
            let env = environment()?;
            let conn = env.connect_with_connection_string(
                &connection_string,
                odbc_api::ConnectionOptions { login_timeout_sec: Some(timeout) },
            )?;
            // Autocommit off + explicit COMMIT, per the dialect contract.
            conn.set_autocommit(false)?;
            Ok(conn)
        })
        .await
        .map_err(|e| AdapterError::Query(e.to_string()))?
        .map_err(|e| AdapterError::Query(e.to_string()))?;

        let raw = Db2Connection { conn: Arc::new(Mutex::new(conn)) };
        Ok(ConnectionHandle::new(Engine::Db2, Box::new(raw)))
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
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::Db2));
        let bound = resolve_in_order(&order, params);
        run_statement(self.conn_arc(handle)?, rewritten, bound).await
    }

    async fn prepare(&self, _handle: &mut ConnectionHandle, sql: &str) -> Result<PreparedStatement> {
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::Db2));
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

    /// DB2 has no explicit `BEGIN`; a transaction is simply "not yet
    /// committed" once autocommit is off.
    async fn begin(&self, handle: &mut ConnectionHandle) -> Result<()> {
        handle.transaction_depth += 1;
        Ok(())
    }

    async fn commit(&self, handle: &mut ConnectionHandle) -> Result<()> {
        let conn = self.conn_arc(handle)?;
        tokio::task::spawn_blocking(move || conn.lock().commit())
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        handle.transaction_depth = handle.transaction_depth.saturating_sub(1);
        Ok(())
    }

    async fn rollback(&self, handle: &mut ConnectionHandle) -> Result<()> {
        let conn = self.conn_arc(handle)?;
        tokio::task::spawn_blocking(move || conn.lock().rollback())
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        handle.transaction_depth = handle.transaction_depth.saturating_sub(1);
        Ok(())
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }
}

fn render_literal(param: &TypedParam) -> String {
    match param {
        TypedParam::Integer(v) => v.to_string(),
        TypedParam::String(v) => format!("'{}'", v.replace('\'', "''")),
        TypedParam::Boolean(b) => if *b { "1".into() } else { "0".into() },
        TypedParam::Float(v) => v.to_string(),
        TypedParam::Null => "NULL".into(),
    }
}

/// `odbc-api`'s parameter binding is generic over fixed-size tuples; rather
/// than fight that for a dynamic-arity call, bound values are inlined as SQL
/// literals (safe here because every value passed through
/// [`crate::model::TypedParam`] is already typed, never raw user SQL).
async fn run_statement(
    conn: Arc<Mutex<odbc_api::Connection<'static>>>,
    sql: String,
    params: Vec<TypedParam>,
) -> Result<QueryOutcome> {
    tokio::task::spawn_blocking(move || {
        let rendered = inline_params(&sql, &params);
        let conn = conn.lock();
        let mut outcome = QueryOutcome::default();

        match conn
            .execute(&rendered, ())
            .map_err(|e| AdapterError::Query(e.to_string()))?
        {
            Some(mut cursor) => {
                let headers = cursor
                    .column_names()
                    .map_err(|e| AdapterError::Query(e.to_string()))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| AdapterError::Query(e.to_string()))?;
                outcome.columns = headers;

                let mut buffers = odbc_api::buffers::TextRowSet::for_cursor(4096, &mut cursor, Some(4096))
                    .map_err(|e| AdapterError::Query(e.to_string()))?;
                let mut row_set_cursor = cursor
                    .bind_buffer(&mut buffers)
                    .map_err(|e| AdapterError::Query(e.to_string()))?;

                while let Some(batch) = row_set_cursor
                    .fetch()
                    .map_err(|e| AdapterError::Query(e.to_string()))?
                {
                    for row_idx in 0..batch.num_rows() {
                        let mut row = Vec::with_capacity(outcome.columns.len());
                        for col_idx in 0..outcome.columns.len() {
                            let value = batch.at(col_idx, row_idx).map(|bytes| {
                                String::from_utf8_lossy(bytes).into_owned()
                            });
                            row.push(value.map(Value::String).unwrap_or(Value::Null));
                        }
                        outcome.rows.push(row);
                    }
                }
            }
            None => {
                outcome.affected_rows = 0;
            }
        }

        Ok(outcome)
    })
    .await
    .map_err(|e| AdapterError::Query(e.to_string()))?
}

fn inline_params(sql: &str, params: &[TypedParam]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut params = params.iter();
    for ch in sql.chars() {
        if ch == '?' {
            if let Some(p) = params.next() {
                out.push_str(&render_literal(p));
                continue;
            }
        }
        out.push(ch);
    }
    out
}
