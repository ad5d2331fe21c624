//! The `EngineAdapter` capability set.
//!
//! Modeled as a trait object rather than an inheritance hierarchy: each
//! dialect implements the same eight operations, and the pool/DQM hold a
//! `Box<dyn EngineAdapter>` without knowing which one they got.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Engine, ParamBindings, PreparedStatement, QueryOutcome};

/// One live, exclusively-owned connection. Adapters hand these out from
/// `connect` and the pool owns them thereafter — queues never store a
/// handle across suspension points.
pub struct ConnectionHandle {
    pub engine: Engine,
    pub raw: Box<dyn RawConnection>,
    pub transaction_depth: u32,
}

impl ConnectionHandle {
    pub fn new(engine: Engine, raw: Box<dyn RawConnection>) -> Self {
        Self { engine, raw, transaction_depth: 0 }
    }
}

/// The underlying driver connection. Boxed as a trait object so
/// `ConnectionHandle` doesn't need a generic parameter that would infect the
/// pool and DQM.
#[async_trait]
pub trait RawConnection: Send {
    async fn ping(&mut self) -> bool;

    /// Lets adapters downcast back to their concrete connection type. Each
    /// dialect only ever downcasts handles it created itself.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// The eight operations every dialect must provide.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn engine(&self) -> Engine;

    async fn connect(&self) -> Result<ConnectionHandle>;

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<()>;

    async fn health_check(&self, handle: &mut ConnectionHandle) -> Result<bool>;

    async fn execute(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &ParamBindings,
    ) -> Result<QueryOutcome>;

    async fn prepare(&self, handle: &mut ConnectionHandle, sql: &str) -> Result<PreparedStatement>;

    async fn execute_prepared(
        &self,
        handle: &mut ConnectionHandle,
        stmt: &PreparedStatement,
        params: &ParamBindings,
    ) -> Result<QueryOutcome>;

    async fn begin(&self, handle: &mut ConnectionHandle) -> Result<()>;

    async fn commit(&self, handle: &mut ConnectionHandle) -> Result<()>;

    async fn rollback(&self, handle: &mut ConnectionHandle) -> Result<()>;

    fn escape_string(&self, s: &str) -> String;
}
