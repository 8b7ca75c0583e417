//! Error types shared by the API gateway and the receiving workflow.
//!
//! The UI never branches on error kinds: every failure is rendered as an
//! opaque string. The enums exist so the gateway and the workflow can keep
//! the HTTP status and the policy refusals apart until that point.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The request never produced a response (connect, timeout, TLS, ...).
    #[error("{0}")]
    Network(String),

    /// Non-2xx response. Renders as `"{status} {statusText}{optional body}"`.
    #[error("{status} {status_text}{}", body_suffix(.body))]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("Invalid JSON from Inventory Hub API: {0}")]
    Decode(String),

    #[error("Invalid API path: {0}")]
    InvalidPath(String),
}

fn body_suffix(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Client-side refusals and API failures raised by the receiving workflow.
#[derive(Debug, Clone, Error)]
pub enum ReceivingError {
    #[error("No receiving session is open")]
    NoSession,

    #[error("Receiving session {0} is paused")]
    Paused(String),

    #[error("Receiving session {0} is already finalized")]
    Finalized(String),

    #[error("Invoice {0} is already processed; reopen it first")]
    InvoiceProcessed(String),

    #[error("{0} is already in progress")]
    Busy(&'static str),

    #[error("Invalid line index {index} (session has {len} lines)")]
    InvalidLineIndex { index: usize, len: usize },

    #[error("Nothing to confirm")]
    NothingToConfirm,

    #[error("Scan queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_renders_status_text_and_body() {
        let err = ApiError::Http {
            status: 404,
            status_text: "Not Found".into(),
            body: "{\"detail\":\"Session not found\"}\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "404 Not Found: {\"detail\":\"Session not found\"}"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn http_error_without_body_has_no_suffix() {
        let err = ApiError::Http {
            status: 502,
            status_text: "Bad Gateway".into(),
            body: "  ".into(),
        };
        assert_eq!(err.to_string(), "502 Bad Gateway");
    }

    #[test]
    fn receiving_error_wraps_api_error_transparently() {
        let err: ReceivingError = ApiError::Network("Cannot reach Inventory Hub API".into()).into();
        assert_eq!(err.to_string(), "Cannot reach Inventory Hub API");
    }
}
