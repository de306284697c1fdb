/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The attempt was cancelled before settling — either its timeout timer
    /// fired or it was superseded by a newer request to the same URL.
    #[error("request cancelled")]
    Cancelled,
    /// Response decoding or payload-shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Client-side validation rejected the form; no network call was made.
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    /// The server accepted the request but rejected the submission
    /// (`success: false` payload), typically with per-field errors.
    #[error("submission rejected: {message}")]
    Rejected {
        message: String,
        errors: Vec<FieldError>,
    },
    /// The call violated the dispatch contract (empty URL, zero timeout,
    /// malformed header); no network call was made.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// One rejected field from a pre-submission validation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Field name as submitted.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl DispatchError {
    /// Whether the dispatcher may re-issue the attempt.
    ///
    /// Retryable: transport-level failures (no HTTP status at all) and
    /// 500–599 responses. Never retryable: 4xx responses, cancellation,
    /// decode and validation failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            Self::Cancelled
            | Self::Decode(_)
            | Self::Validation(_)
            | Self::Rejected { .. }
            | Self::InvalidRequest(_) => false,
        }
    }

    /// Whether the failure came from a timeout or an explicit cancel.
    ///
    /// Cancellation is routine flow: it is never retried and never surfaced
    /// as a user-facing error notice.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status of the failure, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
