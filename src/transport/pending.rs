//! Pending-correlation table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::registry::AnyValue;
use crate::protocol::{CorrelationId, TypeCode};

/// Type-erased response callback.
pub(crate) type Callback = Arc<dyn Fn(AnyValue) + Send + Sync>;

/// Tracks callbacks waiting for correlated responses.
///
/// Maps a correlation id to, per inner type code, the callbacks registered
/// for it. Entries are created when a request is sent and are only removed
/// by an explicit [`forget`](Self::forget); a response never consumes them,
/// so several responses of one request all reach the same subscribers.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<CorrelationId, HashMap<TypeCode, Vec<Callback>>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create an empty entry for `id`.
    ///
    /// Returns true if a still-pending entry was replaced, which happens when
    /// the correlation counter wraps onto an id that never got cleaned up.
    pub(crate) fn open(&mut self, id: CorrelationId) -> bool {
        self.entries.insert(id, HashMap::new()).is_some()
    }

    /// Append `callback` for responses of type `code` to request `id`.
    ///
    /// Returns false if there is no entry for `id`.
    pub(crate) fn subscribe(&mut self, id: CorrelationId, code: TypeCode, callback: Callback) -> bool {
        match self.entries.get_mut(&id) {
            Some(by_type) => {
                by_type.entry(code).or_default().push(callback);
                true
            }
            None => false,
        }
    }

    /// Callbacks registered for `(id, code)`, in registration order.
    pub(crate) fn callbacks(&self, id: CorrelationId, code: TypeCode) -> Option<Vec<Callback>> {
        self.entries
            .get(&id)
            .and_then(|by_type| by_type.get(&code))
            .filter(|callbacks| !callbacks.is_empty())
            .cloned()
    }

    /// Drop the entry for `id` and every callback in it.
    pub(crate) fn forget(&mut self, id: CorrelationId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
