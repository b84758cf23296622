//! Request-scoped slot: the authoritative home of a request's context.
//!
//! One slot is allocated per request by the dispatch pipeline and shared
//! (behind an `Arc`) by the [`Request`](crate::Request) handed to the
//! handler and by the post hooks that run after it. It accepts exactly one
//! binding, which is how "one record per request" is enforced.

use std::sync::OnceLock;

use crate::context::ContextHandle;
use crate::error::ContextError;

#[derive(Debug, Default)]
pub struct RequestSlot {
    cell: OnceLock<ContextHandle>,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the request's record.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyBound`] if a record is already stored.
    pub fn bind(&self, handle: ContextHandle) -> Result<(), ContextError> {
        self.cell.set(handle).map_err(|_| ContextError::AlreadyBound)
    }

    /// The bound record, or `None` if no consumer asked for one yet.
    pub fn get(&self) -> Option<&ContextHandle> {
        self.cell.get()
    }

    pub fn is_bound(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Seals the bound record, if there is one.
    pub(crate) fn seal(&self) {
        if let Some(handle) = self.cell.get() {
            handle.seal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;

    #[test]
    fn second_binding_is_rejected() {
        let slot = RequestSlot::new();
        let first = ContextHandle::new(RequestContext::new("r1"));
        slot.bind(first.clone()).unwrap();

        let err = slot.bind(ContextHandle::new(RequestContext::new("r2"))).unwrap_err();

        assert_eq!(err, ContextError::AlreadyBound);
        assert!(slot.get().unwrap().ptr_eq(&first));
    }

    #[test]
    fn empty_slot_seals_as_a_no_op() {
        let slot = RequestSlot::new();
        slot.seal();
        assert!(!slot.is_bound());
    }

    #[test]
    fn seal_reaches_the_bound_record() {
        let slot = RequestSlot::new();
        let h = ContextHandle::new(RequestContext::new("r1"));
        slot.bind(h.clone()).unwrap();
        slot.seal();
        assert!(h.is_sealed());
    }
}
