//! Error taxonomy for dispatch and backend calls.
//!
//! Transport-level failures are recovered as far down the stack as
//! possible; only exhaustion-of-options errors reach the caller, and they
//! never expose raw backend wording beyond a bounded excerpt.

use crate::backend::{truncate_str, Backend};
use std::time::Duration;
use thiserror::Error;

/// How many characters of a backend's raw error body we keep.
const ERROR_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Request never completed (connect, TLS, body read).
    Transport,
    /// Backend answered with a non-success status.
    Api,
    /// Backend answered 2xx but the payload did not parse.
    MalformedResponse,
    /// The per-call deadline elapsed.
    Timeout,
}

/// One backend call failed.
#[derive(Debug, Clone, Error)]
#[error("{backend} backend failed ({kind:?}): {message}")]
pub struct BackendError {
    pub backend: Backend,
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn transport(backend: Backend, err: &reqwest::Error) -> Self {
        Self {
            backend,
            kind: BackendErrorKind::Transport,
            message: err.to_string(),
        }
    }

    pub fn api(backend: Backend, status: reqwest::StatusCode, body: &str) -> Self {
        Self {
            backend,
            kind: BackendErrorKind::Api,
            message: format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_str(body, ERROR_EXCERPT_CHARS)
            ),
        }
    }

    pub fn malformed(backend: Backend, err: &serde_json::Error, body: &str) -> Self {
        Self {
            backend,
            kind: BackendErrorKind::MalformedResponse,
            message: format!("{}: {}", err, truncate_str(body, ERROR_EXCERPT_CHARS)),
        }
    }

    pub fn timeout(backend: Backend, after: Duration) -> Self {
        Self {
            backend,
            kind: BackendErrorKind::Timeout,
            message: format!("timed out after {:.1}s", after.as_secs_f64()),
        }
    }
}

/// Failure of a full fallback-dispatch attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(
        "no AI backends configured; set one of GEMINI_API_KEY, QWEN_API_KEY, \
         OPENAI_API_KEY, or OPENROUTER_API_KEY"
    )]
    NoBackendsConfigured,

    #[error("all {attempted} available backends failed; last error: {last}")]
    AllBackendsFailed { attempted: usize, last: BackendError },
}
