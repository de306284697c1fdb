use std::fmt;
use std::sync::Arc;

use reqwest::Method;

use crate::{form::FormData, hooks::BusyIndicator};

/// Request body carried by one dispatch.
///
/// A call supplies a JSON-encodable body or a multipart form body, never
/// both; the enum makes the exclusion structural. Multipart bodies carry no
/// explicit `Content-Type` header so the transport layer can set the
/// boundary itself.
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    /// No body (GET and friends).
    #[default]
    Empty,
    /// JSON payload, sent as `application/json`.
    Json(serde_json::Value),
    /// Multipart form payload, including file parts.
    Multipart(FormData),
}

/// Configures one logical dispatch: transport shape, bounded lifetime,
/// bounded retry, and the cross-call supersede policy.
///
/// Immutable per call; the dispatcher derives the shrinking retry budget
/// internally rather than mutating the caller's options.
#[derive(Clone)]
pub struct DispatchOptions {
    /// HTTP method. Defaults to `GET`.
    pub method: Method,
    /// Extra headers for this call. Keys are unique; a later entry with the
    /// same name replaces the earlier one at build time.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
    /// Per-attempt timeout in milliseconds. An elapsed timer cancels the
    /// attempt; the call settles as cancelled, not as a retryable failure.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Fixed delay between attempts in milliseconds (linear, not
    /// exponential).
    pub retry_delay_ms: u64,
    /// Cancel any in-flight request to the same URL before registering this
    /// one. Best-effort: the transport is aborted, server-side effects of
    /// the superseded request are not retracted.
    pub cancel_existing: bool,
    /// Suppress the user-facing notice on unrecovered failure.
    pub silent: bool,
    /// Loading indicator engaged for the duration of the call and released
    /// exactly once on every exit path.
    pub indicator: Option<Arc<dyn BusyIndicator>>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout_ms: 10_000,
            max_retries: 0,
            retry_delay_ms: 500,
            cancel_existing: false,
            silent: false,
            indicator: None,
        }
    }
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("cancel_existing", &self.cancel_existing)
            .field("silent", &self.silent)
            .field("indicator", &self.indicator.is_some())
            .finish()
    }
}

impl DispatchOptions {
    /// Options for a plain GET with the default timeout and no retries.
    pub fn get() -> Self {
        Self::default()
    }

    /// Options for a POST carrying a JSON body.
    pub fn post_json(body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: RequestBody::Json(body),
            ..Self::default()
        }
    }

    /// Options for a POST carrying a multipart form body.
    pub fn post_form(form: FormData) -> Self {
        Self {
            method: Method::POST,
            body: RequestBody::Multipart(form),
            ..Self::default()
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, max_retries: usize, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cancel_existing(mut self) -> Self {
        self.cancel_existing = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn BusyIndicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }
}
