use std::time::Duration;

use crate::completion::error::CompletionError;

/// Core error type for the relay.
///
/// Adapter crates should map their specific errors into this type so the
/// orchestrator can tell user-facing failures apart from transient ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The outbound surface asked us to back off before the next call.
    #[error("rate limited by messaging surface, retry after {0:?}")]
    RetryAfter(Duration),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("presentation error: {0}")]
    Presentation(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
