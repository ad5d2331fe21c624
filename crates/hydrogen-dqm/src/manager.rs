//! The Database Queue Manager: one [`DatabaseQueueManager`] per registered
//! database, owning its Lead duties (pool + QTC access) and its tag-based
//! Worker queues.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use std::collections::HashMap;

use hydrogen_connectors::EngineAdapter;
use hydrogen_errors::Error;
use hydrogen_pool::Pool;
use hydrogen_qtc::{QueueHint, Qtc};

use crate::dispatch::resolve_tag;
use crate::queue::{Job, ResultMap, Slot, SlotState, TagQueue};
use crate::types::{QueryRequest, QueryResult, RequestId};

/// Spawning knobs for the dispatch algorithm, configurable per database.
#[derive(Debug, Clone, Copy)]
pub struct SpawnPolicy {
    pub spawn_threshold: usize,
    pub max_workers_per_tag: usize,
    pub acquire_timeout: Duration,
}

impl Default for SpawnPolicy {
    fn default() -> Self {
        Self {
            spawn_threshold: 8,
            max_workers_per_tag: 4,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns one database's Lead (pool + QTC) and its on-demand tag queues.
pub struct DatabaseQueueManager {
    database: String,
    pool: Arc<Pool>,
    adapter: Arc<dyn EngineAdapter>,
    qtc: Arc<Qtc>,
    queues: Mutex<HashMap<QueueHint, TagQueue>>,
    results: Arc<ResultMap>,
    next_request_id: AtomicU64,
    policy: SpawnPolicy,
    shutting_down: AtomicBool,
}

impl DatabaseQueueManager {
    pub fn new(database: impl Into<String>, pool: Arc<Pool>, qtc: Arc<Qtc>, policy: SpawnPolicy) -> Self {
        let adapter = pool.adapter();
        Self {
            database: database.into(),
            pool,
            adapter,
            qtc,
            queues: Mutex::new(HashMap::new()),
            results: Arc::new(ResultMap::new()),
            next_request_id: AtomicU64::new(1),
            policy,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn qtc(&self) -> &Qtc {
        &self.qtc
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Enqueues a request and returns immediately with a `request_id`;
    /// spawning whatever worker the target tag needs.
    #[tracing::instrument(skip(self, request), fields(database = %self.database))]
    pub fn submit(&self, request: QueryRequest) -> Result<RequestId, Error> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::unavailable("queue manager is shutting down"));
        }

        let qtc_entry = request.query_ref.and_then(|q| self.qtc.get(q));
        let tag = resolve_tag(request.queue_hint, qtc_entry.as_deref(), &request.sql, &request.params);

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.results.insert(request_id, Slot::pending());

        let mut queues = self.queues.lock();
        let queue = queues.entry(tag).or_insert_with(|| TagQueue::new(tag));
        queue.enqueue(Job { request_id, request });

        if queue.worker_count() == 0 {
            tracing::debug!(tag = tag.as_str(), "lead spawning first worker for tag");
            queue.spawn_worker(self.pool.clone(), self.adapter.clone(), self.results.clone(), self.policy.acquire_timeout);
        } else if queue.pending_depth() > self.policy.spawn_threshold
            && queue.worker_count() < self.policy.max_workers_per_tag
        {
            tracing::debug!(tag = tag.as_str(), depth = queue.pending_depth(), "lead spawning additional worker for tag");
            queue.spawn_worker(self.pool.clone(), self.adapter.clone(), self.results.clone(), self.policy.acquire_timeout);
        }

        Ok(request_id)
    }

    /// Blocks until `request_id`'s result is ready or `timeout` elapses. On
    /// timeout the wait is abandoned; the result is discarded by the worker
    /// when it eventually arrives (fire-and-forget on timeout).
    pub async fn await_result(&self, request_id: RequestId, timeout: Duration) -> Result<QueryResult, Error> {
        let Some(slot) = self.results.get(&request_id).map(|s| s.value().clone()) else {
            return Err(Error::not_found(format!("no such request_id {request_id}")));
        };

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut state = slot.state.lock();
                if matches!(*state, SlotState::Ready(_)) {
                    let SlotState::Ready(result) = std::mem::replace(&mut *state, SlotState::Abandoned) else {
                        unreachable!()
                    };
                    drop(state);
                    self.results.remove(&request_id);
                    return Ok(result);
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                let mut state = slot.state.lock();
                *state = SlotState::Abandoned;
                return Err(Error::timeout());
            }

            let notified = slot.notify.notified();
            if tokio::time::timeout(remaining, notified).await.is_err() {
                let mut state = slot.state.lock();
                *state = SlotState::Abandoned;
                return Err(Error::timeout());
            }
        }
    }

    /// Submits and awaits in one call, for callers that don't need the
    /// two-phase submit/await split.
    pub async fn run(&self, request: QueryRequest, timeout: Duration) -> Result<QueryResult, Error> {
        let request_id = self.submit(request)?;
        self.await_result(request_id, timeout).await
    }

    /// Stops accepting submissions, drains whatever's already enqueued, and
    /// releases the Lead's pool reference. Terminal: a manager can't be
    /// resurrected after this.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let mut queues = self.queues.lock();
        for (_, queue) in queues.drain() {
            queue.close();
        }
    }
}
