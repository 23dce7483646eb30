//! Error types for planning, transport, token acquisition and service calls

use thiserror::Error;

/// Planning failed before any split could be produced.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(
        "no records to extract: {available} available, skip={skip}, fetch={fetch}; \
         check the number of rows to skip and to fetch"
    )]
    InvalidRange { available: u64, skip: u64, fetch: u64 },

    #[error("planner limit `{0}` must be greater than 0")]
    InvalidLimits(&'static str),
}

/// Failure to obtain a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token input: {0}")]
    MissingInput(&'static str),

    /// Token or assertion endpoint could not be reached
    #[error("token endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("token endpoint rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

impl AuthError {
    /// Only a network-level failure to reach the endpoint is worth retrying;
    /// a rejection means the credentials or assertion are wrong.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Failure of a single call to the remote service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, timeout or protocol failure reported by the HTTP client
    #[error("request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Server error status that survived the retry policy
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Build from a reqwest error, keeping the URL out of the message.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let retryable = e.is_timeout() || e.is_connect() || e.is_request() || e.is_body();
        let retryable = retryable && !e.is_builder();
        Self::Request {
            message: e.without_url().to_string(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { retryable, .. } => *retryable,
            Self::Status { code, .. } => *code >= 500,
            Self::Auth(e) => e.is_transient(),
            Self::Io(_) => true,
            Self::InvalidUrl { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// A single configuration problem, tied to the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFailure {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All problems found while validating a configuration.
#[derive(Debug, Error)]
#[error("invalid configuration: {}", join_failures(.failures))]
pub struct ConfigError {
    pub failures: Vec<ConfigFailure>,
}

fn join_failures(failures: &[ConfigFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    pub fn has_field(&self, field: &str) -> bool {
        self.failures.iter().any(|f| f.field == field)
    }
}

/// Failure of a service-level operation built on top of the transport.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected HTTP {status} {message} from {operation}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("invalid credentials (HTTP 401)")]
    InvalidCredentials,

    #[error("base URL not found (HTTP 404)")]
    NotFound,

    #[error("invalid record count `{0}`")]
    InvalidCount(String),

    #[error("invalid entity set list: {0}")]
    InvalidEntityList(String),

    #[error("failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}
