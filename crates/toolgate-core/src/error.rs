use crate::identity::CallerKey;
use std::time::Duration;
use thiserror::Error;

/// The error type a wrapped tool may fail with.
///
/// Kept boxed so any tool error can travel through the guard untouched.
pub type ToolError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A convenience `Result` alias using [`ToolgateError`].
pub type ToolgateResult<T> = Result<T, ToolgateError>;

/// Top-level error type for toolgate.
///
/// The gate failures (`AccessDenied`, `RateLimited`, `ExecutionFailed`) stay
/// distinct so callers can pick a retry strategy per kind.
#[derive(Error, Debug)]
pub enum ToolgateError {
    /// The requested tool is not on the whitelist.
    #[error("Tool '{tool_name}' is not allowed")]
    AccessDenied {
        /// Name of the rejected tool.
        tool_name: String,
    },

    /// The caller's token bucket is empty.
    #[error("Rate limit exceeded for '{caller_key}', retry after {retry_after:?}")]
    RateLimited {
        /// Key whose bucket was exhausted.
        caller_key: CallerKey,
        /// Advisory wait until one token is available again.
        retry_after: Duration,
    },

    /// The wrapped tool returned an error. The original error is the source.
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(#[source] ToolError),

    /// A sanitization rule could not be built (e.g. an invalid pattern).
    #[error("Sanitization error: {0}")]
    Sanitization(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An audit sink could not accept an event.
    #[error("Audit error: {0}")]
    Audit(String),

    /// No tool is registered under the requested name.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolgateError {
    /// Returns `true` for errors raised by a gate before the tool ran.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ToolgateError::AccessDenied { .. } | ToolgateError::RateLimited { .. }
        )
    }

    /// The advisory backoff for a rate-limited call.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ToolgateError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Recover the tool's original error from an `ExecutionFailed`.
    ///
    /// Any other variant is handed back unchanged.
    pub fn into_tool_error(self) -> Result<ToolError, ToolgateError> {
        match self {
            ToolgateError::ExecutionFailed(err) => Ok(err),
            other => Err(other),
        }
    }
}
