//! Dispatcher error types
//!
//! Errors fall into the categories the loop branches on:
//! - **Rejection**: the job never reached a handler (bad envelope, unknown name, failing hook)
//! - **Connectivity**: the store is unreachable, the whole loop waits for it
//! - **Caller**: configuration, serialization or admin failures returned to the caller

use thiserror::Error;

/// Why a job was dropped before any handler ran.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The envelope has no usable `name`.
    #[error("empty job name got")]
    EmptyName,

    /// The payload is not a JSON object.
    #[error("malformed job payload: {0}")]
    Malformed(String),

    /// No handler is registered under this name.
    #[error("[{0}] is not registered")]
    Unregistered(String),

    /// The before-work hook returned an error.
    #[error("error before running job: {0}")]
    BeforeHook(String),
}

impl RejectReason {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::EmptyName => "empty_name",
            RejectReason::Malformed(_) => "malformed",
            RejectReason::Unregistered(_) => "unregistered",
            RejectReason::BeforeHook(_) => "before_hook",
        }
    }
}

/// Configuration errors raised while loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Dispatcher errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store failure reported by a non-Redis store implementation
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The job cannot be submitted as given
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The concurrency gate was closed underneath the loop
    #[error("Concurrency gate closed")]
    GateClosed,
}

impl DispatchError {
    /// Create a store error from any displayable message.
    pub fn store(message: impl Into<String>) -> Self {
        DispatchError::Store(message.into())
    }

    /// Whether this error means the store could not be reached.
    ///
    /// Any store-side failure on the hot path counts: a "no data" result
    /// never surfaces as an error, so everything else calls for a reconnect.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DispatchError::Redis(_) | DispatchError::Store(_))
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

/// Result alias for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
