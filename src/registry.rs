use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::hooks::lock_ignore_poison;

/// Opaque handle for one in-flight request attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

#[derive(Debug)]
struct PendingEntry {
    url: String,
    token: CancellationToken,
}

/// Bookkeeping for in-flight requests: id → {url, cancellation handle}.
///
/// Owned by whichever [`Dispatcher`](crate::Dispatcher) issues the requests
/// and shared by `Arc`; no ambient global state. The dispatcher is the only
/// writer — it registers an entry per attempt and deregisters it when the
/// attempt settles, so a retried call never has two live entries.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<u64, PendingEntry>>,
    next_id: AtomicU64,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an attempt and returns its fresh id.
    pub fn register(&self, url: &str, token: CancellationToken) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = PendingEntry {
            url: url.to_owned(),
            token,
        };
        lock_ignore_poison(&self.entries).insert(id, entry);
        RequestId(id)
    }

    /// Removes a settled attempt. Idempotent: a missing id is a no-op.
    pub fn deregister(&self, id: RequestId) {
        lock_ignore_poison(&self.entries).remove(&id.0);
    }

    /// Finds the in-flight attempt for a URL, if any.
    pub fn find_by_url(&self, url: &str) -> Option<RequestId> {
        lock_ignore_poison(&self.entries)
            .iter()
            .find(|(_, entry)| entry.url == url)
            .map(|(id, _)| RequestId(*id))
    }

    /// Cancels and removes one attempt. Returns whether an entry existed.
    pub fn cancel(&self, id: RequestId) -> bool {
        match lock_ignore_poison(&self.entries).remove(&id.0) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels the in-flight attempt for a URL, if any.
    ///
    /// Best-effort supersede: the transport is aborted, but server-side
    /// effects of the superseded request are not retracted.
    pub fn cancel_by_url(&self, url: &str) -> bool {
        match self.find_by_url(url) {
            Some(id) => {
                tracing::debug!(url, "cancelling superseded request");
                self.cancel(id)
            }
            None => false,
        }
    }

    /// Cancels every in-flight attempt. Teardown path.
    pub fn cancel_all(&self) {
        let drained: Vec<PendingEntry> = {
            let mut entries = lock_ignore_poison(&self.entries);
            entries.drain().map(|(_, entry)| entry).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "cancelling all pending requests");
        }
        for entry in drained {
            entry.token.cancel();
        }
    }

    /// Number of in-flight attempts.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
