use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Method;
use tokio::sync::broadcast;

use crate::{
    dispatch::{Dispatcher, Payload},
    error::FieldError,
    hooks::{BusyIndicator, Navigator, Notice, Notifier, NullNavigator, NullNotifier},
    options::{DispatchOptions, RequestBody},
    DispatchError, Result,
};

/// Value of one form field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    File {
        filename: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq)]
struct FormField {
    name: String,
    value: FieldValue,
}

/// Explicit form contents: the reframing of a DOM form element.
///
/// Fields are enumerated in submission order; file inputs carry their bytes
/// directly. Serializes to a multipart body without an explicit
/// `Content-Type` header so the transport can set the boundary itself.
#[derive(Clone, Debug, PartialEq)]
pub struct FormData {
    /// Declared target, the analog of the form's `action` attribute.
    pub action: Option<String>,
    /// Submission method. Defaults to `POST`.
    pub method: Method,
    fields: Vec<FormField>,
}

impl Default for FormData {
    fn default() -> Self {
        Self {
            action: None,
            method: Method::POST,
            fields: Vec::new(),
        }
    }
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(FormField {
            name: name.into(),
            value: FieldValue::Text(value.into()),
        });
        self
    }

    /// Adds a file field.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.fields.push(FormField {
            name: name.into(),
            value: FieldValue::File {
                filename: filename.into(),
                content_type,
                bytes,
            },
        });
        self
    }

    /// First value recorded under `name`, if any.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    pub(crate) fn to_multipart(&self) -> Result<reqwest::multipart::Form> {
        let mut multipart = reqwest::multipart::Form::new();
        for field in &self.fields {
            multipart = match &field.value {
                FieldValue::Text(text) => multipart.text(field.name.clone(), text.clone()),
                FieldValue::File {
                    filename,
                    content_type,
                    bytes,
                } => {
                    let mut part = reqwest::multipart::Part::bytes(bytes.clone())
                        .file_name(filename.clone());
                    if let Some(mime) = content_type {
                        part = part.mime_str(mime).map_err(|_| {
                            DispatchError::InvalidRequest(format!(
                                "invalid content type '{mime}' for field '{}'",
                                field.name
                            ))
                        })?;
                    }
                    multipart.part(field.name.clone(), part)
                }
            };
        }
        Ok(multipart)
    }
}

/// Expected shape of one field's value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FieldKind {
    #[default]
    Text,
    Email,
    Number,
    File,
}

/// Explicit validation rule for one field: the reframing of markup-attribute
/// driven rules into enumerated configuration.
#[derive(Clone, Debug, Default)]
pub struct FieldRule {
    pub required: bool,
    pub kind: FieldKind,
    pub pattern: Option<Regex>,
    pub bounds: Option<(f64, f64)>,
}

impl FieldRule {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some((min, max));
        self
    }
}

/// Pre-submission validity check.
///
/// An empty error list is a pass. Implementations own their error wording;
/// the adapter only aborts the submission and surfaces the verdict.
pub trait FormValidator: Send + Sync {
    fn check(&self, form: &FormData) -> Vec<FieldError>;
}

/// Rule-based validator: one [`FieldRule`] per field name.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<(String, FieldRule)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.rules.push((field.into(), rule));
        self
    }
}

impl FormValidator for RuleSet {
    fn check(&self, form: &FormData) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for (name, rule) in &self.rules {
            check_field(name, rule, form.field(name), &mut errors);
        }
        errors
    }
}

fn check_field(
    name: &str,
    rule: &FieldRule,
    value: Option<&FieldValue>,
    errors: &mut Vec<FieldError>,
) {
    let text = match value {
        None => {
            if rule.required {
                errors.push(FieldError::new(name, "This field is required."));
            }
            return;
        }
        Some(FieldValue::File { bytes, .. }) => {
            if rule.required && bytes.is_empty() {
                errors.push(FieldError::new(name, "This field is required."));
            }
            return;
        }
        Some(FieldValue::Text(text)) => text.trim(),
    };

    if text.is_empty() {
        if rule.required {
            errors.push(FieldError::new(name, "This field is required."));
        }
        return;
    }

    match rule.kind {
        FieldKind::Email => {
            if !email_pattern().is_match(text) {
                errors.push(FieldError::new(name, "Enter a valid email address."));
            }
        }
        FieldKind::Number => match text.parse::<f64>() {
            Ok(number) => {
                if let Some((min, max)) = rule.bounds {
                    if number < min {
                        errors.push(FieldError::new(name, format!("Value must be at least {min}.")));
                    } else if number > max {
                        errors.push(FieldError::new(name, format!("Value must be at most {max}.")));
                    }
                }
            }
            Err(_) => errors.push(FieldError::new(name, "Enter a valid number.")),
        },
        FieldKind::Text | FieldKind::File => {}
    }

    if let Some(pattern) = &rule.pattern {
        if !pattern.is_match(text) {
            errors.push(FieldError::new(name, "Value has an invalid format."));
        }
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern must compile")
    })
}

/// How a successful submission resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The response carried a redirect target; the [`Navigator`] hook was
    /// invoked and the form must not be reset.
    Redirected(String),
    /// The response completed in place.
    Completed {
        /// Server-provided success message, already surfaced as a notice.
        message: Option<String>,
        /// Whether the caller should reset the form fields.
        reset_form: bool,
    },
}

/// Successful settlement of one form submission.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitOutcome {
    pub disposition: Disposition,
    /// Full response payload, for callers that read more than the standard
    /// keys.
    pub payload: Payload,
}

/// Completion signal observable by other code, success or failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitEvent {
    pub success: bool,
    pub message: Option<String>,
}

/// Per-submission options.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    /// Explicit target override; wins over the form's declared action.
    pub url: Option<String>,
    /// Opt-in pre-submission validation.
    pub validator: Option<Arc<dyn FormValidator>>,
    /// Suppress the form reset on success (redirects never reset).
    pub keep_fields: bool,
    /// Suppress user-facing notices for this submission.
    pub silent: bool,
    /// Per-attempt timeout override in milliseconds; 0 keeps the default.
    pub timeout_ms: u64,
    /// Loading indicator engaged for the duration of the call.
    pub indicator: Option<Arc<dyn BusyIndicator>>,
}

impl fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("url", &self.url)
            .field("validator", &self.validator.is_some())
            .field("keep_fields", &self.keep_fields)
            .field("silent", &self.silent)
            .field("timeout_ms", &self.timeout_ms)
            .field("indicator", &self.indicator.is_some())
            .finish()
    }
}

/// Serializes forms into multipart submissions and routes the outcome back
/// to the caller: redirect, message, reset, and a broadcast completion
/// event.
#[derive(Clone)]
pub struct FormAdapter {
    dispatcher: Dispatcher,
    page_url: String,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<SubmitEvent>,
}

impl fmt::Debug for FormAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormAdapter")
            .field("page_url", &self.page_url)
            .finish()
    }
}

impl FormAdapter {
    /// `page_url` is the construction-time analog of the current page
    /// location: the last-resort submission target when neither an explicit
    /// override nor a form action is given.
    pub fn new(dispatcher: Dispatcher, page_url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            dispatcher,
            page_url: page_url.into(),
            navigator: Arc::new(NullNavigator),
            notifier: Arc::new(NullNotifier),
            events,
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Observes every completion, success or failure.
    pub fn subscribe(&self) -> broadcast::Receiver<SubmitEvent> {
        self.events.subscribe()
    }

    /// Submits a form as a multipart request.
    ///
    /// Runs the opt-in validation pass first; a rejection aborts with
    /// [`DispatchError::Validation`] and issues no network call. On success
    /// the response payload decides the disposition: a `redirect` (or
    /// `redirect_url`) key navigates and skips the reset, a `message` key
    /// becomes a success notice, and `success: false` settles as
    /// [`DispatchError::Rejected`] with the server's field errors.
    pub async fn submit(&self, form: &FormData, options: SubmitOptions) -> Result<SubmitOutcome> {
        if let Some(validator) = &options.validator {
            let errors = validator.check(form);
            if !errors.is_empty() {
                tracing::debug!(count = errors.len(), "form rejected before submission");
                if !options.silent {
                    self.notifier
                        .notify(Notice::error("Please correct the errors below."));
                }
                self.emit(false, Some("validation failed".to_owned()));
                return Err(DispatchError::Validation(errors));
            }
        }

        let url = resolve_target(
            options.url.as_deref(),
            form.action.as_deref(),
            &self.page_url,
        );

        let mut dispatch = DispatchOptions {
            method: form.method.clone(),
            body: RequestBody::Multipart(form.clone()),
            // The adapter owns the user-facing messaging for submissions.
            silent: true,
            indicator: options.indicator.clone(),
            ..DispatchOptions::default()
        };
        if options.timeout_ms > 0 {
            dispatch.timeout_ms = options.timeout_ms;
        }

        let reply = match self.dispatcher.dispatch(&url, dispatch).await {
            Ok(reply) => reply,
            Err(err) => {
                if !err.is_cancelled() && !options.silent {
                    self.notifier
                        .notify(Notice::error("Submission failed. Please try again."));
                }
                self.emit(false, None);
                return Err(err);
            }
        };

        if let Some(value) = reply.payload.as_json() {
            let declared_failure =
                value.get("success").and_then(serde_json::Value::as_bool) == Some(false);
            if declared_failure {
                let message = reply
                    .payload
                    .json_str("message")
                    .unwrap_or("Please correct the errors below.")
                    .to_owned();
                let errors = field_errors_from(value.get("errors"));
                if !options.silent {
                    self.notifier.notify(Notice::error(message.clone()));
                }
                self.emit(false, Some(message.clone()));
                return Err(DispatchError::Rejected { message, errors });
            }
        }

        let redirect = reply
            .payload
            .json_str("redirect")
            .or_else(|| reply.payload.json_str("redirect_url"))
            .map(str::to_owned);

        if let Some(target) = redirect {
            self.navigator.go(&target);
            self.emit(true, None);
            return Ok(SubmitOutcome {
                disposition: Disposition::Redirected(target),
                payload: reply.payload,
            });
        }

        let message = reply.payload.json_str("message").map(str::to_owned);
        if let Some(message) = &message {
            if !options.silent {
                self.notifier.notify(Notice::success(message.clone()));
            }
        }
        self.emit(true, message.clone());

        Ok(SubmitOutcome {
            disposition: Disposition::Completed {
                message,
                reset_form: !options.keep_fields,
            },
            payload: reply.payload,
        })
    }

    fn emit(&self, success: bool, message: Option<String>) {
        // No receivers is fine; the signal is advisory.
        let _ = self.events.send(SubmitEvent { success, message });
    }
}

fn resolve_target(override_url: Option<&str>, action: Option<&str>, page_url: &str) -> String {
    override_url
        .or(action)
        .filter(|url| !url.trim().is_empty())
        .unwrap_or(page_url)
        .to_owned()
}

/// Flattens the server's `{field: [messages]}` error map.
fn field_errors_from(value: Option<&serde_json::Value>) -> Vec<FieldError> {
    let Some(map) = value.and_then(serde_json::Value::as_object) else {
        return Vec::new();
    };
    let mut errors = Vec::new();
    for (field, messages) in map {
        match messages {
            serde_json::Value::Array(items) => {
                for item in items {
                    if let Some(message) = item.as_str() {
                        errors.push(FieldError::new(field, message));
                    }
                }
            }
            serde_json::Value::String(message) => {
                errors.push(FieldError::new(field, message.as_str()));
            }
            _ => {}
        }
    }
    errors
}
