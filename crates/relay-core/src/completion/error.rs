use std::fmt;

/// Failure categories of the upstream completion call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionErrorKind {
    Unauthorized,
    NotFound,
    InvalidInput,
    RateLimitedUpstream,
    ServerError,
    BadGateway,
    Overloaded,
    Timeout,
    NetworkError,
    EmptyResponse,
    MalformedResponse,
    Other,
}

impl CompletionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::RateLimitedUpstream => "rate_limited_upstream",
            Self::ServerError => "server_error",
            Self::BadGateway => "bad_gateway",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::EmptyResponse => "empty_response",
            Self::MalformedResponse => "malformed_response",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for CompletionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error of a completion request. The message is for logs only and never
/// shown to the user verbatim.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{}{kind}: {message}", status_prefix(.status))]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

fn status_prefix(status: &Option<u16>) -> String {
    status.map(|code| format!("[HTTP {code}] ")).unwrap_or_default()
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Map a non-2xx HTTP status to its category.
    pub fn from_status(status: u16) -> Self {
        let (kind, message) = classify_status(status);
        Self {
            kind,
            status: Some(status),
            message,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::NetworkError, message)
    }

    pub fn empty() -> Self {
        Self::new(CompletionErrorKind::EmptyResponse, "model returned empty response")
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::MalformedResponse, message)
    }

    /// Transient failures worth another attempt: network-level errors,
    /// per-attempt timeouts and upstream 429.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            CompletionErrorKind::NetworkError
                | CompletionErrorKind::Timeout
                | CompletionErrorKind::RateLimitedUpstream
        )
    }
}

/// Human-readable category for an upstream HTTP status.
pub fn classify_status(status: u16) -> (CompletionErrorKind, String) {
    use CompletionErrorKind::*;

    let (kind, msg) = match status {
        400 => (InvalidInput, "Bad request: message may be too long or malformed."),
        401 => (Unauthorized, "Authentication failed: model token is invalid."),
        403 => (Unauthorized, "Access denied: model is not accessible."),
        404 => (NotFound, "Model not found: check the configured model name."),
        422 => (InvalidInput, "Invalid input: try a shorter message."),
        429 => (RateLimitedUpstream, "Upstream rate limit: too many requests."),
        500 => (ServerError, "Upstream server error."),
        502 => (BadGateway, "Bad gateway: upstream infrastructure issue."),
        503 => (Overloaded, "Model is loading or overloaded."),
        _ => return (Other, format!("Unknown error (HTTP {status})")),
    };
    (kind, msg.to_string())
}
