//! A single tag's submission channel and its pool of native worker threads
//! (one worker thread per live queue).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use hydrogen_connectors::{AdapterError, EngineAdapter, QueryOutcome};
use hydrogen_errors::Error;
use hydrogen_pool::Pool;
use hydrogen_qtc::QueueHint;

use crate::types::{QueryRequest, QueryResult, RequestId};

pub(crate) struct Job {
    pub request_id: RequestId,
    pub request: QueryRequest,
}

pub(crate) enum SlotState {
    Pending,
    Ready(QueryResult),
    /// The awaiting caller timed out; the worker discards the result
    /// instead of delivering it.
    Abandoned,
}

pub(crate) struct Slot {
    pub state: Mutex<SlotState>,
    pub notify: Notify,
}

impl Slot {
    pub fn pending() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(SlotState::Pending), notify: Notify::new() })
    }
}

pub(crate) type ResultMap = DashMap<RequestId, Arc<Slot>>;

/// The submission channel for one (database, tag) pair, plus however many
/// worker threads are currently servicing it.
pub(crate) struct TagQueue {
    tag: QueueHint,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    pending: Arc<AtomicUsize>,
    worker_count: Arc<AtomicUsize>,
}

impl TagQueue {
    pub fn new(tag: QueueHint) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            tag,
            sender,
            receiver,
            pending: Arc::new(AtomicUsize::new(0)),
            worker_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pending_depth(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    /// FIFO submission: crossbeam's channel preserves send order per-sender,
    /// and every submitter into this tag shares the one queue.
    pub fn enqueue(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(job);
    }

    pub fn spawn_worker(
        &self,
        pool: Arc<Pool>,
        adapter: Arc<dyn EngineAdapter>,
        results: Arc<ResultMap>,
        acquire_timeout: Duration,
    ) {
        let receiver = self.receiver.clone();
        let pending = Arc::clone(&self.pending);
        let worker_count = Arc::clone(&self.worker_count);
        let tag = self.tag;
        worker_count.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name(format!("hydrogen-dqm-{}", tag.as_str()))
            .spawn(move || {
                worker_loop(tag, receiver, pool, adapter, results, pending, acquire_timeout);
            });

        match spawned {
            Ok(_) => {}
            Err(e) => {
                worker_count.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(tag = tag.as_str(), error = %e, "failed to spawn dqm worker thread");
            }
        }
    }

    /// Drops the sender so idle workers see a closed channel once they've
    /// drained everything already enqueued, then exit on their own.
    pub fn close(self) {
        drop(self.sender);
    }
}

fn worker_loop(
    tag: QueueHint,
    receiver: Receiver<Job>,
    pool: Arc<Pool>,
    adapter: Arc<dyn EngineAdapter>,
    results: Arc<ResultMap>,
    pending: Arc<AtomicUsize>,
    acquire_timeout: Duration,
) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(tag = tag.as_str(), error = %e, "worker could not start its runtime");
            return;
        }
    };

    while let Ok(job) = receiver.recv() {
        pending.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(tag = tag.as_str(), request_id = job.request_id, "draining");

        let outcome = rt.block_on(run_job(&pool, adapter.as_ref(), &job.request, acquire_timeout));
        let result = QueryResult { queue_used: tag, outcome };
        deliver(&results, job.request_id, result);
    }
}

fn deliver(results: &ResultMap, request_id: RequestId, result: QueryResult) {
    let Some(slot) = results.get(&request_id) else { return };
    let mut state = slot.state.lock();
    match *state {
        SlotState::Abandoned => {
            drop(state);
            drop(slot);
            results.remove(&request_id);
        }
        _ => {
            *state = SlotState::Ready(result);
            drop(state);
            slot.notify.notify_one();
        }
    }
}

/// Runs one statement, retrying once on a fresh handle if the first attempt
/// reports `Disconnected`.
async fn run_job(
    pool: &Pool,
    adapter: &dyn EngineAdapter,
    request: &QueryRequest,
    acquire_timeout: Duration,
) -> Result<QueryOutcome, Error> {
    let mut handle = pool.acquire(acquire_timeout).await?;
    match adapter.execute(&mut handle, &request.sql, &request.params).await {
        Ok(outcome) => {
            pool.release(handle).await;
            Ok(outcome)
        }
        Err(AdapterError::Disconnected) => {
            pool.discard(handle).await;
            tracing::warn!("connection lost mid-statement, retrying once on a fresh handle");

            let mut retry_handle = pool.acquire(acquire_timeout).await?;
            match adapter.execute(&mut retry_handle, &request.sql, &request.params).await {
                Ok(outcome) => {
                    pool.release(retry_handle).await;
                    Ok(outcome)
                }
                Err(_) => {
                    pool.discard(retry_handle).await;
                    Err(Error::unavailable("database unavailable after retry"))
                }
            }
        }
        Err(e) => {
            pool.release(handle).await;
            Err(Error::from(e))
        }
    }
}
