//! Request/result shapes flowing through a queue.

use hydrogen_connectors::{ParamBindings, QueryOutcome};
use hydrogen_errors::Error;
use hydrogen_qtc::QueueHint;

pub type RequestId = u64;

/// A query to run against one database's connections.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub params: ParamBindings,
    /// `query_ref` into the QTC, if this request was issued against a known
    /// template rather than ad-hoc SQL.
    pub query_ref: Option<i64>,
    /// Step 1 of the dispatch algorithm: an explicit caller override.
    pub queue_hint: Option<QueueHint>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, params: ParamBindings) -> Self {
        Self { sql: sql.into(), params, query_ref: None, queue_hint: None }
    }

    pub fn with_hint(mut self, hint: QueueHint) -> Self {
        self.queue_hint = Some(hint);
        self
    }

    pub fn with_query_ref(mut self, query_ref: i64) -> Self {
        self.query_ref = Some(query_ref);
        self
    }
}

/// The outcome of a submitted request, tagged with the queue that ran it
/// for observability.
#[derive(Debug)]
pub struct QueryResult {
    pub queue_used: QueueHint,
    pub outcome: Result<QueryOutcome, Error>,
}
