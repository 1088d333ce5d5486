//! Error types for the multi-view generation pipeline.

use std::time::Duration;

/// Errors that can occur while loading images, talking to the remote
/// service, or driving a generation run.
#[derive(Debug, thiserror::Error)]
pub enum TurnaroundError {
    /// API key missing or invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Billing problem on the remote account.
    #[error("billing error: {0}")]
    Billing(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-suggested wait, parsed from `Retry-After`.
        retry_after: Option<Duration>,
    },

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters or unusable input data.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 or image data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// Response arrived but did not carry what was asked for.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A run precondition failed: nothing was mutated, no credit consumed.
    #[error("{0}")]
    Validation(String),

    /// The analyze phase failed; the run was aborted.
    #[error("could not analyze the image: {0}")]
    Analysis(String),

    /// A per-view generation call failed; the remaining queue was aborted.
    #[error("generation failed for \"{view}\": {message}")]
    Generation {
        /// Label of the view that failed.
        view: String,
        /// Underlying adapter error text.
        message: String,
    },

    /// I/O error (e.g., reading a source image, saving a result).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, TurnaroundError>;

/// Longest error body we surface to users.
const MAX_ERROR_BODY: usize = 300;

/// Cleans a raw HTTP error body for display.
///
/// Remote services answer with anything from structured JSON to proxy HTML.
/// If the body is the usual `{"error": {"message": ...}}` shape the inner
/// message is extracted; otherwise whitespace is collapsed and the text is
/// truncated.
pub(crate) fn sanitize_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return truncate(msg.trim());
        }
    }

    let collapsed: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "(empty response body)".to_string();
    }
    truncate(&collapsed)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_ERROR_BODY).collect();
    format!("{cut}...")
}

/// Parses a `Retry-After` header value as whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}
