//! The outbound pending-request table.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::SdkError;

/// Waiters for in-flight outbound control requests, keyed by request id.
///
/// Exactly one terminal outcome reaches each waiter: a matched response, a
/// timeout (the caller removes the entry), or [`Self::fail_all`] at
/// disconnect.
#[derive(Default)]
pub(crate) struct PendingRequests {
    inner: Mutex<HashMap<String, oneshot::Sender<Result<Value, SdkError>>>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Result<Value, SdkError>>>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a waiter for `request_id`.
    pub(crate) fn insert(&self, request_id: String) -> oneshot::Receiver<Result<Value, SdkError>> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id, tx);
        rx
    }

    /// Delivers the response for `request_id`. Returns `false` when no
    /// waiter exists (already timed out, or a protocol violation).
    pub(crate) fn complete(&self, request_id: &str, result: Result<Value, SdkError>) -> bool {
        match self.lock().remove(request_id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drops the waiter for `request_id` (deadline expiry).
    pub(crate) fn remove(&self, request_id: &str) {
        self.lock().remove(request_id);
    }

    /// Fails every pending waiter with [`SdkError::Disconnected`].
    pub(crate) fn fail_all(&self) {
        for (_, tx) in self.lock().drain() {
            let _ = tx.send(Err(SdkError::Disconnected));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
