//! Crate-wide error kinds (§7 of the design).
//!
//! These are kinds, not a type hierarchy: every fallible core operation
//! returns `Result<T, CoreError>`, and callers match on the variant to
//! decide retry/HTTP-status disposition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown op, bad payload shape, concat with <2 inputs, sequence with
    /// no items. Surfaced as 4xx; never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-zero exit of the media engine. Carries the last <=100 lines of
    /// stderr. Written to `jobs.error`; retryable via the retry endpoint.
    #[error("engine failed: {stderr_tail}")]
    EngineFailure { stderr_tail: String },

    /// Probe timeout, missing duration, not-a-video. Treated by the worker
    /// identically to `EngineFailure`.
    #[error("probe failed: {0}")]
    ProbeFailure(String),

    /// Downloader or object-store error. Same disposition as
    /// `EngineFailure`.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// Raised when a worker's task is cancelled mid-flight. The worker
    /// records nothing further; the row transitions to CANCELLED via the
    /// caller's cancel path, not via this error.
    #[error("cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidRequest(msg.into())
    }

    /// `true` for errors the worker should persist to `jobs.error` /
    /// `retries` rather than swallow (everything except `Cancelled`, which
    /// the cancel path already accounts for).
    pub fn is_retryable_failure(&self) -> bool {
        !matches!(self, CoreError::Cancelled)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
