//! Connection Pool Manager.
//!
//! Ownership is deliberately layered to avoid a cyclic reference: a
//! [`PoolManager`] owns
//! [`Pool`]s, a [`Pool`] owns [`hydrogen_connectors::ConnectionHandle`]s, and
//! callers (the DQM's queue workers) borrow a handle for the duration of one
//! statement via `acquire`/`release`. Handles are never stored across a
//! suspension point by anything above this crate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout as tokio_timeout;

use hydrogen_connectors::{ConnectionHandle, EngineAdapter, Engine};
use hydrogen_errors::{Error, Result};

struct Idle {
    handle: ConnectionHandle,
    last_health_check: Instant,
}

struct PoolState {
    free_list: VecDeque<Idle>,
    in_flight: u32,
}

/// A pool of live connection handles for one database.
pub struct Pool {
    pub database_name: String,
    pub engine: Engine,
    adapter: Arc<dyn EngineAdapter>,
    max_size: u32,
    idle_health_check: Duration,
    state: Mutex<PoolState>,
    notify: Notify,
}

impl Pool {
    pub fn new(
        database_name: impl Into<String>,
        adapter: Arc<dyn EngineAdapter>,
        max_size: u32,
        idle_health_check: Duration,
    ) -> Self {
        let engine = adapter.engine();
        Self {
            database_name: database_name.into(),
            engine,
            adapter,
            max_size,
            idle_health_check,
            state: Mutex::new(PoolState { free_list: VecDeque::new(), in_flight: 0 }),
            notify: Notify::new(),
        }
    }

    /// Number of handles currently leased out plus idle in the free list.
    pub async fn size(&self) -> u32 {
        let state = self.state.lock().await;
        state.in_flight
    }

    /// Acquires a handle, blocking up to `acquire_timeout` before returning
    /// `Timeout`. Health-checks any idle handle that's been sitting for
    /// longer than `idle_health_check`; a failing handle is discarded and a
    /// fresh one substituted before returning.
    #[tracing::instrument(skip(self), fields(database = %self.database_name))]
    pub async fn acquire(&self, acquire_timeout: Duration) -> Result<ConnectionHandle> {
        let deadline = Instant::now() + acquire_timeout;

        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(idle) = state.free_list.pop_front() {
                    drop(state);
                    return self.validate_or_replace(idle).await;
                }
                if state.in_flight < self.max_size {
                    state.in_flight += 1;
                    drop(state);
                    return self.connect_fresh().await;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout());
            }

            let notified = self.notify.notified();
            let result = tokio_timeout(remaining, notified).await;

            if result.is_err() {
                return Err(Error::timeout());
            }
        }
    }

    async fn validate_or_replace(&self, idle: Idle) -> Result<ConnectionHandle> {
        if idle.last_health_check.elapsed() <= self.idle_health_check {
            return Ok(idle.handle);
        }

        let mut handle = idle.handle;
        match self.adapter.health_check(&mut handle).await {
            Ok(true) => Ok(handle),
            _ => {
                tracing::warn!(database = %self.database_name, "idle handle failed health check, replacing");
                let _ = self.adapter.disconnect(handle).await;
                self.adapter.connect().await.map_err(Error::from)
            }
        }
    }

    async fn connect_fresh(&self) -> Result<ConnectionHandle> {
        match self.adapter.connect().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                let mut state = self.state.lock().await;
                state.in_flight = state.in_flight.saturating_sub(1);
                Err(Error::from(e))
            }
        }
    }

    /// Returns a handle to the free list, waking exactly one waiter.
    pub async fn release(&self, handle: ConnectionHandle) {
        let mut state = self.state.lock().await;
        state.free_list.push_back(Idle { handle, last_health_check: Instant::now() });
        drop(state);
        self.notify.notify_one();
    }

    /// Discards a handle outright (used after it's been found `Disconnected`
    /// and won't be returned to the free list) and frees its slot.
    pub async fn discard(&self, handle: ConnectionHandle) {
        let _ = self.adapter.disconnect(handle).await;
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_one();
    }

    pub fn adapter(&self) -> Arc<dyn EngineAdapter> {
        self.adapter.clone()
    }
}

/// Owns every registered database's pool. `add_pool`/`get_pool` are a linear
/// scan — pool counts are small (one per registered database).
pub struct PoolManager {
    max_pools: usize,
    pools: Mutex<Vec<Arc<Pool>>>,
}

impl PoolManager {
    pub fn create(max_pools: usize) -> Self {
        Self { max_pools, pools: Mutex::new(Vec::new()) }
    }

    pub async fn add_pool(&self, pool: Arc<Pool>) -> Result<()> {
        let mut pools = self.pools.lock().await;
        if pools.iter().any(|p| p.database_name == pool.database_name) {
            return Err(Error::conflict(format!("pool '{}' already registered", pool.database_name)));
        }
        if pools.len() >= self.max_pools {
            return Err(Error::internal("pool manager at capacity"));
        }
        pools.push(pool);
        Ok(())
    }

    pub async fn get_pool(&self, database_name: &str) -> Option<Arc<Pool>> {
        let pools = self.pools.lock().await;
        pools.iter().find(|p| p.database_name == database_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrogen_connectors::mock::{MockAdapter, MockDatabase};

    fn mock_pool(max_size: u32) -> Arc<Pool> {
        let db = Arc::new(MockDatabase::default());
        let adapter: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(db));
        Arc::new(Pool::new("test", adapter, max_size, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn acquire_and_release_round_trips() {
        let pool = mock_pool(2);
        let handle = pool.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(pool.size().await, 1);
        pool.release(handle).await;
        let handle2 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(pool.size().await, 1);
        pool.release(handle2).await;
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = mock_pool(1);
        let _h1 = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.tag(), "timeout");
    }

    #[tokio::test]
    async fn manager_rejects_duplicate_names() {
        let manager = PoolManager::create(4);
        manager.add_pool(mock_pool(1)).await.unwrap();
        let dup = mock_pool(1);
        assert!(manager.add_pool(dup).await.is_err());
    }

    #[tokio::test]
    async fn manager_enforces_capacity() {
        let manager = PoolManager::create(1);
        manager.add_pool(mock_pool(1)).await.unwrap();
        let second = {
            let db = Arc::new(MockDatabase::default());
            let adapter: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(db));
            Arc::new(Pool::new("other", adapter, 1, Duration::from_secs(30)))
        };
        assert!(manager.add_pool(second).await.is_err());
    }
}
