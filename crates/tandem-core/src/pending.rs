//! Outstanding outbound calls, keyed by message ID.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::RpcError;

/// Outcome delivered to a waiting caller.
pub type CallResult = Result<Option<Bytes>, RpcError>;

#[derive(Default)]
struct Table {
    waiters: HashMap<u32, oneshot::Sender<CallResult>>,
    closed: bool,
}

/// Single-fulfillment result slots for in-flight calls.
///
/// Whoever removes an entry first (the dispatcher with a reply, or shutdown)
/// is the only one that can complete it.
#[derive(Default)]
pub struct PendingCalls {
    table: Mutex<Table>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot under the first ID from `next_id` that is not already
    /// waiting. Must happen before the call frame is enqueued so a fast reply
    /// always finds its waiter.
    ///
    /// A call left unanswered keeps its ID, so after the counter wraps an ID
    /// can come round while its old call is still waiting; such IDs are
    /// skipped, never replaced.
    ///
    /// Fails with [`RpcError::Shutdown`] once [`fail_all`](Self::fail_all)
    /// has run.
    pub fn register(
        &self,
        mut next_id: impl FnMut() -> u32,
    ) -> Result<(u32, oneshot::Receiver<CallResult>), RpcError> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(RpcError::Shutdown);
        }
        let message_id = loop {
            let id = next_id();
            if !table.waiters.contains_key(&id) {
                break id;
            }
            tracing::debug!(message_id = id, "message id still pending; skipping");
        };
        let (tx, rx) = oneshot::channel();
        table.waiters.insert(message_id, tx);
        tracing::trace!(message_id, pending = table.waiters.len(), "registered pending call");
        Ok((message_id, rx))
    }

    /// Complete and remove the slot. Returns `false` if there was none.
    pub fn fulfill(&self, message_id: u32, result: CallResult) -> bool {
        let waiter = self.table.lock().waiters.remove(&message_id);
        match waiter {
            Some(tx) => {
                // The caller may have given up; that still counts as fulfilled.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop a slot without completing it (the caller went away).
    pub fn remove(&self, message_id: u32) -> bool {
        self.table.lock().waiters.remove(&message_id).is_some()
    }

    /// Fail every outstanding call with [`RpcError::Shutdown`] and refuse new
    /// registrations. Returns how many calls were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.waiters.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(RpcError::Shutdown));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.table.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Message IDs still waiting, sorted.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.table.lock().waiters.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
