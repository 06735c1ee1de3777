use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Closed set of failure kinds. Callers branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    MissingConfig,
    InvalidConfig,
    FileNotFound,
    NotFile,
    EmptyFile,
    DocumentParse,
    EmptyDocument,
    EmptyInput,
    InvalidInput,
    Network,
    Timeout,
    RateLimited,
    Unauthorized,
    ProviderRejected,
    ProviderResponse,
    RetryExhausted,
    ContractViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Transient,
    Provider,
    Exhausted,
    Contract,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::MissingConfig => "ENV_MISSING",
            ErrorKind::InvalidConfig => "CONFIG_INVALID",
            ErrorKind::FileNotFound => "FILE_NOT_FOUND",
            ErrorKind::NotFile => "NOT_FILE",
            ErrorKind::EmptyFile => "EMPTY_FILE",
            ErrorKind::DocumentParse => "PDF_PARSE_ERROR",
            ErrorKind::EmptyDocument => "EMPTY_DOCUMENT",
            ErrorKind::EmptyInput => "EMPTY_INPUT",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::RateLimited => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::ProviderRejected => "PROVIDER_REJECTED",
            ErrorKind::ProviderResponse => "PROVIDER_RESPONSE",
            ErrorKind::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorKind::ContractViolation => "CONTRACT_VIOLATION",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::MissingConfig | ErrorKind::InvalidConfig | ErrorKind::Unauthorized => {
                ErrorCategory::Configuration
            }
            ErrorKind::FileNotFound
            | ErrorKind::NotFile
            | ErrorKind::EmptyFile
            | ErrorKind::DocumentParse
            | ErrorKind::EmptyDocument
            | ErrorKind::EmptyInput
            | ErrorKind::InvalidInput => ErrorCategory::Input,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited => {
                ErrorCategory::Transient
            }
            ErrorKind::ProviderRejected | ErrorKind::ProviderResponse => ErrorCategory::Provider,
            ErrorKind::RetryExhausted => ErrorCategory::Exhausted,
            ErrorKind::ContractViolation => ErrorCategory::Contract,
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub attempts: Option<u32>,
    pub cause: Option<String>,
    pub cause_kind: Option<ErrorKind>,
    pub records_stored: Option<usize>,
    pub hint: Option<String>,
}

impl ErrorContext {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn missing_config(variable: &str, hint: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::MissingConfig,
            format!("missing required setting {variable}"),
        )
        .with_hint(hint)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractViolation, message)
    }

    pub fn retry_exhausted(operation: &str, attempts: u32, last_error: &PipelineError) -> Self {
        let mut error = Self::new(
            ErrorKind::RetryExhausted,
            format!("{operation} failed after {attempts} attempts: {}", last_error.message),
        );
        error.context.operation = Some(operation.to_string());
        error.context.attempts = Some(attempts);
        error.context.cause = Some(last_error.message.clone());
        error.context.cause_kind = Some(last_error.kind);
        error
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.context.hint = Some(hint.into());
        self
    }

    pub fn with_records_stored(mut self, stored: usize) -> Self {
        self.context.records_stored = Some(stored);
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    /// The kind that caused this failure, looking through retry exhaustion.
    pub fn root_kind(&self) -> ErrorKind {
        self.context.cause_kind.unwrap_or(self.kind)
    }

    /// Maps an HTTP status from a provider to a structured failure.
    pub fn from_status(backend: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let kind = classify_status(status);
        let details = body.trim();
        let message = if details.is_empty() {
            format!("{backend} returned {status}")
        } else {
            format!("{backend} returned {status}: {}", truncate(details, 300))
        };
        Self::new(kind, message)
    }
}

pub fn classify_status(status: reqwest::StatusCode) -> ErrorKind {
    use reqwest::StatusCode;

    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::Timeout,
        status if status.is_server_error() => ErrorKind::Network,
        _ => ErrorKind::ProviderRejected,
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            ErrorKind::Timeout
        } else if error.is_decode() {
            ErrorKind::ProviderResponse
        } else if let Some(status) = error.status() {
            classify_status(status)
        } else if error.is_builder() {
            ErrorKind::InvalidConfig
        } else {
            ErrorKind::Network
        };
        Self::new(kind, error.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorKind::ProviderResponse, error.to_string())
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(error: url::ParseError) -> Self {
        Self::invalid_config(format!("invalid endpoint url: {error}"))
    }
}

/// Renders an error with its code and context for operator output.
pub fn format_error(error: &PipelineError) -> String {
    let mut lines = vec![
        format!("error: {}", error.message),
        format!("  code: {}", error.kind.code()),
    ];

    let context = &error.context;
    if let Some(operation) = &context.operation {
        lines.push(format!("  operation: {operation}"));
    }
    if let Some(attempts) = context.attempts {
        lines.push(format!("  attempts: {attempts}"));
    }
    if let Some(cause) = &context.cause {
        match context.cause_kind {
            Some(kind) => lines.push(format!("  last error ({kind}): {cause}")),
            None => lines.push(format!("  last error: {cause}")),
        }
    }
    if let Some(stored) = context.records_stored {
        lines.push(format!("  records stored before failure: {stored}"));
    }
    if let Some(hint) = &context.hint {
        lines.push(format!("  hint: {hint}"));
    }

    lines.join("\n")
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
