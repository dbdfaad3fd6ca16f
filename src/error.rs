//! Closed error taxonomy shared by every core component.
//!
//! Lower layers never decide retry policy themselves; they classify and
//! return. The poller kernel and agent orchestrator are the only components
//! that act on a [`Kind`].

use thiserror::Error;

/// Coarse classification used by retry/backoff/pause decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    AuthExpired,
    Unauthorized,
    RateLimited,
    Transient,
    ScraperMissing,
    NotFound,
    PoolTimeout,
    StateStoreFailure,
    Validation,
    Fatal,
}

impl Kind {
    /// Whether the poller/orchestrator should retry after backoff rather
    /// than pause or stop outright.
    #[must_use]
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Kind::RateLimited
                | Kind::Transient
                | Kind::ScraperMissing
                | Kind::PoolTimeout
                | Kind::StateStoreFailure
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("session expired")]
    AuthExpired,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited on {endpoint}, retry after {retry_after_s}s")]
    RateLimited { endpoint: String, retry_after_s: u64 },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("scraper operation {operation} could not find expected content: {reason}")]
    ScraperMissing { operation: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out waiting for a browser page after {waited_ms}ms")]
    PoolTimeout { waited_ms: u64 },

    #[error("state store failure: {0}")]
    StateStoreFailure(String),

    #[error("validation failed for {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("duplicate stream for ({kind}, {target})")]
    DuplicateStream { kind: String, target: String },

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl Error {
    /// Classify this error into the coarse retry/pause/stop taxonomy.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Error::AuthExpired => Kind::AuthExpired,
            Error::Unauthorized(_) => Kind::Unauthorized,
            Error::RateLimited { .. } => Kind::RateLimited,
            Error::Transient(_) => Kind::Transient,
            Error::ScraperMissing { .. } => Kind::ScraperMissing,
            Error::NotFound(_) => Kind::NotFound,
            Error::PoolTimeout { .. } => Kind::PoolTimeout,
            Error::StateStoreFailure(_) => Kind::StateStoreFailure,
            Error::Validation { .. } | Error::DuplicateStream { .. } => Kind::Validation,
            Error::Fatal(_) | Error::Config(_) | Error::Io(_) => Kind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
