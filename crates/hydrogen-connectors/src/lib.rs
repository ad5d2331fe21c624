//! Engine Adapters: dialect-specific connect/execute/prepare for
//! PostgreSQL, MySQL, SQLite and DB2 behind one `EngineAdapter` trait.

pub mod adapter;
pub mod db2;
pub mod error;
pub mod macros;
pub mod mock;
pub mod model;
pub mod mysql;
pub mod params;
pub mod postgres;
pub mod sqlite;

pub use adapter::{ConnectionHandle, EngineAdapter, RawConnection};
pub use error::{AdapterError, Result};
pub use macros::substitute_hash_macros;
pub use model::{ConnectionParams, Engine, ParamBindings, PreparedStatement, QueryOutcome, TypedParam, Value};

use std::sync::Arc;

/// Builds the adapter for a given engine + connection params. The registry
/// The process-wide engine registry calls this once per
/// registered database at startup.
pub fn build_adapter(engine: Engine, params: ConnectionParams) -> Result<Arc<dyn EngineAdapter>> {
    let adapter: Arc<dyn EngineAdapter> = match engine {
        Engine::Postgres => Arc::new(postgres::PostgresAdapter::new(params)),
        Engine::MySql => Arc::new(mysql::MysqlAdapter::new(params)?),
        Engine::Sqlite => Arc::new(sqlite::SqliteAdapter::new(params)),
        Engine::Db2 => Arc::new(db2::Db2Adapter::new(params)),
    };
    Ok(adapter)
}
