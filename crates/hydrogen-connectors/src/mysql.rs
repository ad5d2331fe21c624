//! MySQL adapter: `?` placeholders, 0/1 booleans, `BEGIN`/`COMMIT`/`ROLLBACK`.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool as DriverPool, Value as MyValue};

use crate::adapter::{ConnectionHandle, EngineAdapter, RawConnection};
use crate::error::{AdapterError, Result};
use crate::model::{
    ConnectionParams, Engine, ParamBindings, PreparedStatement, QueryOutcome, TypedParam, Value,
};
use crate::params::{placeholder_style, resolve_in_order, rewrite_named_params};

pub struct MysqlConnection {
    conn: Conn,
}

#[async_trait]
impl RawConnection for MysqlConnection {
    async fn ping(&mut self) -> bool {
        self.conn.ping().await.is_ok()
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub struct MysqlAdapter {
    pool: DriverPool,
}

impl MysqlAdapter {
    pub fn new(params: ConnectionParams) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            params.user.as_deref().unwrap_or("root"),
            params.password.as_deref().unwrap_or(""),
            params.host.as_deref().unwrap_or("localhost"),
            params.port.unwrap_or(3306),
            params.database.as_deref().unwrap_or(""),
        );
        let opts = mysql_async::Opts::from_url(&url)
            .map_err(|e| AdapterError::InvalidParams(e.to_string()))?;
        Ok(Self { pool: DriverPool::new(opts) })
    }

    fn conn_mut<'a>(&self, handle: &'a mut ConnectionHandle) -> Result<&'a mut Conn> {
        handle
            .raw
            .as_any_mut()
            .downcast_mut::<MysqlConnection>()
            .map(|c| &mut c.conn)
            .ok_or_else(|| AdapterError::Query("handle is not a mysql connection".into()))
    }
}

#[async_trait]
impl EngineAdapter for MysqlAdapter {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    async fn connect(&self) -> Result<ConnectionHandle> {
        let conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        Ok(ConnectionHandle::new(Engine::MySql, Box::new(MysqlConnection { conn })))
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
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::MySql));
        let bound = resolve_in_order(&order, params);
        run_statement(self.conn_mut(handle)?, &rewritten, &bound).await
    }

    async fn prepare(&self, _handle: &mut ConnectionHandle, sql: &str) -> Result<PreparedStatement> {
        let (rewritten, order) = rewrite_named_params(sql, placeholder_style(Engine::MySql));
        Ok(PreparedStatement { id: 0, sql: rewritten, param_order: order })
    }

    async fn execute_prepared(
        &self,
        handle: &mut ConnectionHandle,
        stmt: &PreparedStatement,
        params: &ParamBindings,
    ) -> Result<QueryOutcome> {
        let bound = resolve_in_order(&stmt.param_order, params);
        run_statement(self.conn_mut(handle)?, &stmt.sql, &bound).await
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
        s.replace('\\', "\\\\").replace('\'', "\\'")
    }
}

fn to_my_value(param: &TypedParam) -> MyValue {
    match param {
        // MySQL has no native boolean; booleans bind as 0/1 integers.
        TypedParam::Boolean(b) => MyValue::Int(if *b { 1 } else { 0 }),
        TypedParam::Integer(v) => MyValue::Int(*v),
        TypedParam::String(v) => MyValue::Bytes(v.clone().into_bytes()),
        TypedParam::Float(v) => MyValue::Double(*v),
        TypedParam::Null => MyValue::NULL,
    }
}

async fn run_statement(conn: &mut Conn, sql: &str, params: &[TypedParam]) -> Result<QueryOutcome> {
    let values: Vec<MyValue> = params.iter().map(to_my_value).collect();
    let mut result = conn
        .exec_iter(sql, mysql_async::Params::Positional(values))
        .await
        .map_err(|e| AdapterError::Query(e.to_string()))?;

    let columns = result
        .columns()
        .map(|cols| cols.iter().map(|c| c.name_str().to_string()).collect())
        .unwrap_or_default();

    let affected_rows = result.affected_rows();

    let rows: Vec<mysql_async::Row> = result
        .collect()
        .await
        .map_err(|e| AdapterError::Query(e.to_string()))?;

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(row.len());
        for i in 0..row.len() {
            values.push(from_my_value(row.as_ref(i)));
        }
        out_rows.push(values);
    }

    Ok(QueryOutcome { columns, rows: out_rows, affected_rows })
}

fn from_my_value(value: Option<&MyValue>) -> Value {
    match value {
        None | Some(MyValue::NULL) => Value::Null,
        Some(MyValue::Int(v)) => Value::Integer(*v),
        Some(MyValue::UInt(v)) => Value::Integer(*v as i64),
        Some(MyValue::Float(v)) => Value::Float(*v as f64),
        Some(MyValue::Double(v)) => Value::Float(*v),
        Some(MyValue::Bytes(b)) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(b.clone()),
        },
        Some(other) => Value::String(format!("{other:?}")),
    }
}
