use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    hooks::{BusyGuard, Notice, Notifier, NullNotifier},
    options::{DispatchOptions, RequestBody},
    registry::PendingRegistry,
    DispatchError, Result,
};

/// Default name of the CSRF request header the server checks on mutating
/// calls.
pub const CSRF_HEADER: &str = "X-CSRFToken";

// The server keys JSON-vs-HTML responses off this header.
const REQUESTED_WITH: &str = "X-Requested-With";
const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

/// Parsed response payload.
///
/// JSON when the response declares a structured content type, raw text
/// otherwise.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// String value of a top-level JSON key, if present and non-empty.
    pub fn json_str(&self, key: &str) -> Option<&str> {
        self.as_json()
            .and_then(|value| value.get(key))
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Successful settlement of one dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// HTTP status in the success range.
    pub status: u16,
    /// Declared `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Parsed body.
    pub payload: Payload,
}

#[derive(Clone)]
/// Issues HTTP requests with bounded lifetime and bounded retry.
///
/// One logical call runs as a sequence of strictly sequential attempts.
/// Every attempt registers itself in the shared [`PendingRegistry`] and
/// deregisters on settlement, so a retried call never has two live entries
/// and `cancel_by_url`/`cancel_all` always see whatever is actually in
/// flight.
pub struct Dispatcher {
    http: reqwest::Client,
    registry: Arc<PendingRegistry>,
    notifier: Arc<dyn Notifier>,
    csrf_header: String,
    csrf_token: Option<String>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("csrf_header", &self.csrf_header)
            .field(
                "csrf_token",
                &self.csrf_token.as_ref().map(|_| "<redacted>"),
            )
            .field("pending", &self.registry.len())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            registry: Arc::new(PendingRegistry::new()),
            notifier: Arc::new(NullNotifier),
            csrf_header: CSRF_HEADER.to_owned(),
            csrf_token: None,
        }
    }

    /// Attaches the CSRF token sent on every non-safe request.
    ///
    /// The embedding application sources the token from wherever the server
    /// put it (an embedded page token or a same-origin cookie).
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// Overrides the CSRF header name (defaults to [`CSRF_HEADER`]).
    pub fn with_csrf_header(mut self, name: impl Into<String>) -> Self {
        self.csrf_header = name.into();
        self
    }

    /// Routes unrecovered-failure notices through `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The registry tracking this dispatcher's in-flight attempts.
    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Cancels every in-flight request. Teardown path.
    pub fn cancel_all(&self) {
        self.registry.cancel_all();
    }

    /// GET with default options.
    pub async fn get(&self, url: &str) -> Result<Reply> {
        self.dispatch(url, DispatchOptions::get()).await
    }

    /// POST with a JSON body and default options.
    pub async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<Reply> {
        self.dispatch(url, DispatchOptions::post_json(body)).await
    }

    /// Performs one logical request.
    ///
    /// Attempts are retried with a fixed linear delay while the failure is
    /// retryable (no HTTP status, or 500–599) and budget remains. A 4xx
    /// response, a decode failure, or a cancellation settles the call
    /// immediately. An elapsed timeout cancels the attempt and settles as
    /// [`DispatchError::Cancelled`].
    pub async fn dispatch(&self, url: &str, options: DispatchOptions) -> Result<Reply> {
        if url.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("empty url".to_owned()));
        }
        if options.timeout_ms == 0 {
            return Err(DispatchError::InvalidRequest(
                "timeout_ms must be positive".to_owned(),
            ));
        }

        if options.cancel_existing {
            self.registry.cancel_by_url(url);
        }

        // Released exactly once, whatever path settles the call.
        let _busy = BusyGuard::engage(options.indicator.clone());

        let mut retries_left = options.max_retries;
        let result = loop {
            let cancel = CancellationToken::new();
            let id = self.registry.register(url, cancel.clone());
            let attempt = self.attempt(url, &options, &cancel).await;
            self.registry.deregister(id);

            match attempt {
                Ok(reply) => break Ok(reply),
                Err(err) if err.is_retryable() && retries_left > 0 => {
                    retries_left -= 1;
                    tracing::debug!(url, remaining = retries_left, error = %err, "retrying request");
                    sleep(Duration::from_millis(options.retry_delay_ms)).await;
                }
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = &result {
            if err.is_cancelled() {
                tracing::debug!(url, "request cancelled");
            } else {
                tracing::warn!(url, error = %err, "request failed");
                if !options.silent {
                    self.notifier.notify(Notice::error(user_message(err)));
                }
            }
        }
        result
    }

    async fn attempt(
        &self,
        url: &str,
        options: &DispatchOptions,
        cancel: &CancellationToken,
    ) -> Result<Reply> {
        let mut request = self
            .http
            .request(options.method.clone(), url)
            .header(REQUESTED_WITH, REQUESTED_WITH_VALUE);

        if let Some(token) = &self.csrf_token {
            if needs_csrf(&options.method) {
                request = request.header(self.csrf_header.as_str(), token);
            }
        }
        request = request.headers(build_headers(&options.headers)?);

        request = match &options.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            // No Content-Type here: the transport sets the multipart
            // boundary itself.
            RequestBody::Multipart(form) => request.multipart(form.to_multipart()?),
        };

        let exchange = async {
            let response = request.send().await.map_err(DispatchError::Transport)?;
            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.map_err(DispatchError::Transport)?;
            Ok::<_, DispatchError>((status, content_type, body))
        };

        let (status, content_type, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            settled = timeout(Duration::from_millis(options.timeout_ms), exchange) => {
                match settled {
                    Ok(settled) => settled?,
                    Err(_) => {
                        // The timer is the cancellation trigger; dropping
                        // the exchange future aborts the transport.
                        cancel.cancel();
                        return Err(DispatchError::Cancelled);
                    }
                }
            }
        };

        if !status.is_success() {
            return Err(DispatchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload = if declares_json(content_type.as_deref()) {
            let value = serde_json::from_str(&body)
                .map_err(|err| DispatchError::Decode(format!("invalid JSON response: {err}")))?;
            Payload::Json(value)
        } else {
            Payload::Text(body)
        };

        Ok(Reply {
            status: status.as_u16(),
            content_type,
            payload,
        })
    }
}

fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DispatchError::InvalidRequest(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| DispatchError::InvalidRequest(format!("invalid value for header '{name}'")))?;
        // insert, not append: per-call header keys are unique.
        headers.insert(name, value);
    }
    Ok(headers)
}

fn needs_csrf(method: &Method) -> bool {
    !matches!(method.as_str(), "GET" | "HEAD" | "OPTIONS" | "TRACE")
}

fn declares_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|value| {
        let essence = value.split(';').next().unwrap_or(value).trim();
        essence.eq_ignore_ascii_case("application/json")
            || essence.to_ascii_lowercase().ends_with("+json")
    })
}

fn user_message(err: &DispatchError) -> String {
    match err {
        DispatchError::Http { status, .. } => format!("Request failed ({status})."),
        DispatchError::Transport(_) => "Network error. Please try again.".to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::{build_headers, declares_json, needs_csrf, Dispatcher, Payload};

    #[test]
    fn csrf_only_on_mutating_methods() {
        assert!(!needs_csrf(&Method::GET));
        assert!(!needs_csrf(&Method::HEAD));
        assert!(needs_csrf(&Method::POST));
        assert!(needs_csrf(&Method::DELETE));
    }

    #[test]
    fn json_content_type_detection() {
        assert!(declares_json(Some("application/json")));
        assert!(declares_json(Some("application/json; charset=utf-8")));
        assert!(declares_json(Some("application/problem+json")));
        assert!(!declares_json(Some("text/html")));
        assert!(!declares_json(None));
    }

    #[test]
    fn later_header_entry_replaces_earlier() {
        let headers = build_headers(&[
            ("x-test".to_owned(), "a".to_owned()),
            ("X-Test".to_owned(), "b".to_owned()),
        ])
        .expect("headers must build");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-test").map(|v| v.to_str().ok()), Some(Some("b")));
    }

    #[test]
    fn debug_redacts_csrf_token() {
        let dispatcher = Dispatcher::new().with_csrf_token("secret-token");
        let debug = format!("{dispatcher:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn payload_json_str_skips_empty_values() {
        let payload = Payload::Json(serde_json::json!({"redirect": "", "message": "ok"}));
        assert_eq!(payload.json_str("redirect"), None);
        assert_eq!(payload.json_str("message"), Some("ok"));
    }
}
