//! Boundary traits for side effects the library does not own.
//!
//! The embedding application decides what a loading indicator, a user-facing
//! notice, or a navigation actually look like; the library only promises
//! when they fire. Every trait has a no-op default implementation and an
//! in-memory recording implementation used by the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Loading indicator associated with a call.
///
/// Engaged when the call starts and released when it settles. The dispatcher
/// guarantees exactly one release per call, on every outcome path.
pub trait BusyIndicator: Send + Sync {
    fn set_busy(&self, busy: bool);
}

/// Releases a [`BusyIndicator`] exactly once, on drop if not before.
pub(crate) struct BusyGuard {
    indicator: Option<std::sync::Arc<dyn BusyIndicator>>,
}

impl BusyGuard {
    pub(crate) fn engage(indicator: Option<std::sync::Arc<dyn BusyIndicator>>) -> Self {
        if let Some(indicator) = &indicator {
            indicator.set_busy(true);
        }
        Self { indicator }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if let Some(indicator) = self.indicator.take() {
            indicator.set_busy(false);
        }
    }
}

/// Counts engage/release transitions. Test double for [`BusyIndicator`].
#[derive(Debug, Default)]
pub struct CountingIndicator {
    engaged: AtomicUsize,
    released: AtomicUsize,
}

impl CountingIndicator {
    pub fn engaged(&self) -> usize {
        self.engaged.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl BusyIndicator for CountingIndicator {
    fn set_busy(&self, busy: bool) {
        if busy {
            self.engaged.fetch_add(1, Ordering::SeqCst);
        } else {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Severity of a user-facing notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
}

/// One user-facing notification.
///
/// The browser original injected these into a notification container and
/// auto-dismissed them after about five seconds; rendering and dismissal are
/// the [`Notifier`] implementation's concern here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Sink for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Discards every notice.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: Notice) {}
}

/// Collects notices in memory. Test double for [`Notifier`].
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        lock_ignore_poison(&self.notices).clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: Notice) {
        lock_ignore_poison(&self.notices).push(notice);
    }
}

/// Browser-navigation seam: invoked when a form submission response carries
/// a redirect target.
pub trait Navigator: Send + Sync {
    fn go(&self, url: &str);
}

/// Ignores navigation requests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNavigator;

impl Navigator for NullNavigator {
    fn go(&self, _url: &str) {}
}

/// Records navigation targets. Test double for [`Navigator`].
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    targets: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn targets(&self) -> Vec<String> {
        lock_ignore_poison(&self.targets).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn go(&self, url: &str) {
        lock_ignore_poison(&self.targets).push(url.to_owned());
    }
}

// A poisoned lock here only means another thread panicked mid-push; the
// recorded data is still coherent for these append-only containers.
pub(crate) fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
