//! `crowdfund-http` is the async HTTP interaction layer for the CrowdFund
//! web application.
//!
//! It wraps the server's AJAX endpoints with:
//! - [`Dispatcher::dispatch`] — one logical request with a bounded lifetime
//!   (timeout as cancellation), a bounded linear retry budget, and a shared
//!   [`PendingRegistry`] enabling cancel-by-url and cancel-all
//! - [`FormAdapter::submit`] — multipart form submission with opt-in
//!   validation and redirect/message/reset routing
//! - [`SearchAdapter::on_input`] — debounced search with wholesale results
//!   replacement
//!
//! Side effects the library does not own (loading indicators, user-facing
//! notices, navigation, the results container) are trait seams —
//! [`BusyIndicator`], [`Notifier`], [`Navigator`], [`ResultsSink`] — with
//! no-op defaults and in-memory recording implementations for tests.

mod dispatch;
mod error;
mod form;
mod hooks;
mod options;
mod registry;
mod search;

pub use dispatch::{Dispatcher, Payload, Reply, CSRF_HEADER};
pub use error::{DispatchError, FieldError};
pub use form::{
    Disposition, FieldKind, FieldRule, FieldValue, FormAdapter, FormData, FormValidator, RuleSet,
    SubmitEvent, SubmitOptions, SubmitOutcome,
};
pub use hooks::{
    BusyIndicator, CountingIndicator, MemoryNotifier, Navigator, Notice, NoticeLevel, Notifier,
    NullNavigator, NullNotifier, RecordingNavigator,
};
pub use options::{DispatchOptions, RequestBody};
pub use registry::{PendingRegistry, RequestId};
pub use search::{MemorySink, ResultsSink, SearchAdapter, SearchHit, DEFAULT_DEBOUNCE_MS};

pub type Result<T> = std::result::Result<T, DispatchError>;
