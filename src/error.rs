use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),
}

/// Failure of a single structured completion call. Never retried.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),

    #[error("response violates schema `{schema}`: {reason}")]
    SchemaViolation { schema: String, reason: String },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("empty response: {0}")]
    EmptyResponse(String),
}

impl From<LLMError> for CompletionError {
    fn from(error: LLMError) -> Self {
        match error {
            LLMError::InvalidResponse(reason) => Self::EmptyResponse(reason.to_string()),
            other => Self::TransportFailure(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TracingError {
    #[error("span {0} is already closed")]
    SpanClosed(String),

    #[error("unknown span {0}")]
    UnknownSpan(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ingestion rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("a score config named `{0}` already exists")]
    DuplicateName(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("invalid score config: {0}")]
    Invalid(String),
}

impl From<reqwest::Error> for RegistrationError {
    fn from(error: reqwest::Error) -> Self {
        Self::TransportFailure(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration: set the {0} environment variable")]
    MissingVar(&'static str),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}
