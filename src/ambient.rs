//! Ambient channel: the "current context" without parameter threading.
//!
//! Backed by a tokio task-local. The dispatch pipeline opens one
//! [`scope`] per request around the handler and the post hooks; the create
//! stage [binds](bind) the record into it.
//!
//! Visibility is best-effort. A task-local belongs to the task that polls
//! the scoped future, so anything moved onto another task with
//! `tokio::spawn` or `spawn_blocking` sees no value, and a record created
//! over there never reaches the request's own scope. Consumers must
//! tolerate `None`. The request-scoped slot is the authoritative source.

use std::cell::RefCell;
use std::future::Future;

use crate::context::ContextHandle;

tokio::task_local! {
    static CURRENT: RefCell<Option<ContextHandle>>;
}

/// Runs `fut` with an empty ambient slot.
pub fn scope<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    CURRENT.scope(RefCell::new(None), fut)
}

/// Publishes `handle` as the current context of this task.
///
/// Returns `false` when called outside any [`scope`], e.g. on a spawned
/// task. The value is then silently not propagated.
pub fn bind(handle: &ContextHandle) -> bool {
    CURRENT
        .try_with(|slot| *slot.borrow_mut() = Some(handle.clone()))
        .is_ok()
}

/// The context bound in this task's scope, if any.
pub fn current() -> Option<ContextHandle> {
    CURRENT.try_with(|slot| slot.borrow().clone()).ok().flatten()
}

/// `true` inside a [`scope`].
pub fn in_scope() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}
