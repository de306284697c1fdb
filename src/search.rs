use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::{
    dispatch::{Dispatcher, Reply},
    hooks::lock_ignore_poison,
    options::DispatchOptions,
    DispatchError, Result,
};

/// Default quiescence window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// One search result row, as served by the search endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub funding_percentage: Option<f64>,
    #[serde(default)]
    pub days_left: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Results container seam: contents are replaced wholesale, never appended.
pub trait ResultsSink: Send + Sync {
    fn replace(&self, hits: Vec<SearchHit>);
}

/// Keeps the latest replacement in memory. Test double for [`ResultsSink`].
#[derive(Debug, Default)]
pub struct MemorySink {
    hits: Mutex<Vec<SearchHit>>,
    replacements: AtomicUsize,
}

impl MemorySink {
    pub fn hits(&self) -> Vec<SearchHit> {
        lock_ignore_poison(&self.hits).clone()
    }

    /// Number of times the contents were replaced.
    pub fn replacements(&self) -> usize {
        self.replacements.load(Ordering::SeqCst)
    }
}

impl ResultsSink for MemorySink {
    fn replace(&self, hits: Vec<SearchHit>) {
        *lock_ignore_poison(&self.hits) = hits;
        self.replacements.fetch_add(1, Ordering::SeqCst);
    }
}

/// Debounces keystroke input into at most one GET per quiescence window.
///
/// Every [`on_input`](Self::on_input) call supersedes the pending window;
/// only the window that is still current when its timer elapses issues a
/// request. A response that arrives after a newer window has started is
/// discarded rather than rendered.
pub struct SearchAdapter {
    dispatcher: Dispatcher,
    endpoint: String,
    param: String,
    debounce_ms: u64,
    min_len: usize,
    generation: Arc<AtomicU64>,
    sink: Arc<dyn ResultsSink>,
}

impl fmt::Debug for SearchAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchAdapter")
            .field("endpoint", &self.endpoint)
            .field("param", &self.param)
            .field("debounce_ms", &self.debounce_ms)
            .field("min_len", &self.min_len)
            .finish()
    }
}

impl SearchAdapter {
    /// `endpoint` must be an absolute URL; the trimmed query is appended as
    /// the `q` parameter.
    pub fn new(dispatcher: Dispatcher, endpoint: impl Into<String>, sink: Arc<dyn ResultsSink>) -> Self {
        Self {
            dispatcher,
            endpoint: endpoint.into(),
            param: "q".to_owned(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            min_len: 1,
            generation: Arc::new(AtomicU64::new(0)),
            sink,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    /// Queries shorter than this clear the results without a network call.
    /// Defaults to 1; the project search endpoint itself returns nothing
    /// under 2 characters, so callers may raise it.
    pub fn with_min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len;
        self
    }

    /// Feeds one input-change event.
    ///
    /// Below-minimum input (including empty and whitespace-only) clears the
    /// sink synchronously and supersedes any pending window; no task is
    /// spawned and `None` is returned. Otherwise the returned handle is the
    /// background window task, which settles silently when superseded.
    pub fn on_input(&self, raw: &str) -> Option<JoinHandle<()>> {
        let query = raw.trim().to_owned();
        // Bumping the generation is what cancels the pending debounce timer.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if query.chars().count() < self.min_len {
            self.sink.replace(Vec::new());
            return None;
        }

        let dispatcher = self.dispatcher.clone();
        let endpoint = self.endpoint.clone();
        let param = self.param.clone();
        let debounce_ms = self.debounce_ms;
        let counter = Arc::clone(&self.generation);
        let sink = Arc::clone(&self.sink);

        Some(tokio::spawn(async move {
            sleep(Duration::from_millis(debounce_ms)).await;
            if counter.load(Ordering::SeqCst) != generation {
                return; // superseded within the quiescence window
            }

            let url = match build_query_url(&endpoint, &param, &query) {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(error = %err, "search endpoint is not a valid URL");
                    return;
                }
            };

            match dispatcher.dispatch(&url, DispatchOptions::get().silent()).await {
                Ok(reply) => match parse_hits(&reply) {
                    Ok(hits) => {
                        // A stale response never overwrites a newer window.
                        if counter.load(Ordering::SeqCst) == generation {
                            sink.replace(hits);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "search response decode failed");
                    }
                },
                Err(err) if err.is_cancelled() => {
                    tracing::debug!(query = %query, "search request cancelled");
                }
                Err(err) => {
                    tracing::debug!(query = %query, error = %err, "search request failed");
                }
            }
        }))
    }
}

fn build_query_url(endpoint: &str, param: &str, query: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint)
        .map_err(|err| DispatchError::InvalidRequest(format!("search endpoint: {err}")))?;
    url.query_pairs_mut().append_pair(param, query);
    Ok(url.into())
}

fn parse_hits(reply: &Reply) -> Result<Vec<SearchHit>> {
    let value = reply
        .payload
        .as_json()
        .ok_or_else(|| DispatchError::Decode("search response is not JSON".to_owned()))?;
    let response: SearchResponse = serde_json::from_value(value.clone())
        .map_err(|err| DispatchError::Decode(format!("invalid search response: {err}")))?;
    Ok(response.results)
}

#[cfg(test)]
mod tests {
    use super::build_query_url;

    #[test]
    fn query_is_percent_encoded() {
        let url = build_query_url("http://localhost/projects/search/", "q", "solar farm")
            .expect("url must build");
        assert_eq!(url, "http://localhost/projects/search/?q=solar+farm");
    }

    #[test]
    fn relative_endpoint_is_rejected() {
        assert!(build_query_url("/projects/search/", "q", "x").is_err());
    }
}
