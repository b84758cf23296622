//! The audit hook: one record per request, written after the handler.
//!
//! The record carries the context twice. `ctx_from_request_state` comes
//! from the request-scoped slot and is authoritative. `ctx_from_ambient_channel`
//! comes from the task-local and is best-effort: when the record was built
//! on another task it is `None` while the slot holds the full record. The
//! two are logged side by side; a mismatch is reported, not treated as an
//! error.

use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Exchange, Hook};
use crate::ambient;
use crate::context::RequestContext;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub path: String,
    pub method: String,
    pub status: u16,
    pub cost_ms: u64,
    pub ctx_from_request_state: Option<RequestContext>,
    pub ctx_from_ambient_channel: Option<RequestContext>,
}

impl AuditRecord {
    /// `true` when the two context readings disagree.
    pub fn diverged(&self) -> bool {
        self.ctx_from_request_state != self.ctx_from_ambient_channel
    }
}

/// Where audit records go.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes each record as one JSON line on the `reqscope::audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, record: AuditRecord) {
        match serde_json::to_string(&record) {
            Ok(json) => tracing::info!(
                target: "reqscope::audit",
                path = %record.path,
                status = record.status,
                cost_ms = record.cost_ms,
                diverged = record.diverged(),
                record = %json,
                "audit"
            ),
            Err(e) => tracing::warn!(target: "reqscope::audit", "unserialisable audit record: {e}"),
        }
    }
}

/// Keeps records in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink(Arc<Mutex<Vec<AuditRecord>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.0.lock().clone()
    }

    pub fn last(&self) -> Option<AuditRecord> {
        self.0.lock().last().cloned()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, record: AuditRecord) {
        self.0.lock().push(record);
    }
}

#[derive(Clone)]
pub struct Audit {
    sink: Arc<dyn AuditSink>,
}

impl Audit {
    pub fn new(sink: impl AuditSink + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    pub fn tracing() -> Self {
        Self::new(TracingSink)
    }
}

impl Hook for Audit {
    fn after(&self, exchange: &Exchange, status: StatusCode, _headers: &mut HeaderMap) {
        let record = AuditRecord {
            path: exchange.path().to_owned(),
            method: exchange.method().to_string(),
            status: status.as_u16(),
            cost_ms: u64::try_from(exchange.elapsed().as_millis()).unwrap_or(u64::MAX),
            ctx_from_request_state: exchange.context().map(|h| h.snapshot()),
            ctx_from_ambient_channel: ambient::current().map(|h| h.snapshot()),
        };
        self.sink.record(record);
    }
}
