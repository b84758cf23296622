//! The per-request context record and the shared handle every consumer holds.
//!
//! A [`RequestContext`] is allocated once per request by the create stage of
//! the [enrichment chain](crate::enrich). From then on nobody owns it by
//! value: the request-scoped slot, the ambient channel and the handler all
//! hold clones of the same [`ContextHandle`], so a mutation made through one
//! is observed by all of them.
//!
//! Once the handler returns the dispatch pipeline [seals](ContextHandle::seal)
//! the handle. Reads keep working; writes fail with
//! [`ContextError::Sealed`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Env name a record carries until the environment stage runs.
pub const DEFAULT_ENV: &str = "prod";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

/// Per-request state, enriched in stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: DateTime<Utc>,

    pub user_id: Option<u64>,
    pub user: Option<User>,
    pub roles: Vec<String>,
    pub permissions: BTreeSet<Permission>,

    pub env: String,
    pub tenant_id: Option<u64>,

    /// Open-ended fields. Handlers may add to it; the chain never does.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            start_time: Utc::now(),
            user_id: None,
            user: None,
            roles: Vec::new(),
            permissions: BTreeSet::new(),
            env: DEFAULT_ENV.to_owned(),
            tenant_id: None,
            extra: BTreeMap::new(),
        }
    }
}

struct Shared {
    record: RwLock<RequestContext>,
    sealed: AtomicBool,
}

/// Cheaply cloneable handle to the one record of a request.
///
/// Every clone points at the same record. Compare two handles with
/// [`ContextHandle::ptr_eq`].
#[derive(Clone)]
pub struct ContextHandle(Arc<Shared>);

impl ContextHandle {
    pub fn new(record: RequestContext) -> Self {
        Self(Arc::new(Shared {
            record: RwLock::new(record),
            sealed: AtomicBool::new(false),
        }))
    }

    /// Clone of the record as it is right now.
    pub fn snapshot(&self) -> RequestContext {
        self.0.record.read().clone()
    }

    /// Borrow the record. Do not hold the guard across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, RequestContext> {
        self.0.record.read()
    }

    /// Mutates the record in place.
    ///
    /// # Errors
    ///
    /// [`ContextError::Sealed`] once the handler has returned.
    pub fn update<R>(&self, f: impl FnOnce(&mut RequestContext) -> R) -> Result<R, ContextError> {
        let mut record = self.0.record.write();
        if self.0.sealed.load(Ordering::Acquire) {
            return Err(ContextError::Sealed);
        }
        Ok(f(&mut record))
    }

    /// Makes the record read-only for the rest of the request.
    pub fn seal(&self) {
        // Taken under the write lock so no `update` straddles the seal.
        let _record = self.0.record.write();
        self.0.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.0.sealed.load(Ordering::Acquire)
    }

    pub fn request_id(&self) -> String {
        self.0.record.read().request_id.clone()
    }

    /// `true` when both handles refer to the same record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("record", &*self.0.record.read())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_at_defaults() {
        let ctx = RequestContext::new("abc123");
        assert_eq!(ctx.request_id, "abc123");
        assert_eq!(ctx.user_id, None);
        assert_eq!(ctx.user, None);
        assert!(ctx.roles.is_empty());
        assert!(ctx.permissions.is_empty());
        assert_eq!(ctx.env, "prod");
        assert_eq!(ctx.tenant_id, None);
        assert!(ctx.extra.is_empty());
    }

    #[test]
    fn clones_observe_the_same_record() {
        let a = ContextHandle::new(RequestContext::new("r1"));
        let b = a.clone();

        a.update(|ctx| ctx.roles.push("admin".into())).unwrap();

        assert!(a.ptr_eq(&b));
        assert_eq!(b.snapshot().roles, vec!["admin".to_owned()]);
    }

    #[test]
    fn sealed_handle_rejects_updates_but_still_reads() {
        let h = ContextHandle::new(RequestContext::new("r1"));
        h.update(|ctx| ctx.env = "gray".into()).unwrap();
        h.seal();

        assert!(h.is_sealed());
        assert_eq!(h.update(|ctx| ctx.env = "dev".into()), Err(ContextError::Sealed));
        assert_eq!(h.read().env, "gray");
    }

    #[test]
    fn permissions_serialise_lowercase_and_sorted() {
        let mut ctx = RequestContext::new("r1");
        ctx.permissions.extend([Permission::Write, Permission::Read]);
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["permissions"], serde_json::json!(["read", "write"]));
    }

    #[test]
    fn distinct_records_are_not_ptr_eq() {
        let a = ContextHandle::new(RequestContext::new("same"));
        let b = ContextHandle::new(RequestContext::new("same"));
        assert!(!a.ptr_eq(&b));
    }
}
