//! Panel error classification
//!
//! HTTP failures are wrapped in [`PanelError`] so callers can tell "already
//! gone" and "try again" apart from hard failures without string matching.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanelError {
    /// Non-success response
    #[error("Panel returned {status} for {method} {path}: {body}")]
    Status {
        method: String,
        path: String,
        status: StatusCode,
        body: String,
    },

    /// Connection, timeout or body decoding failure
    #[error("Panel request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl PanelError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Rate limits, server errors and transport hiccups
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        }
    }
}

/// Find the [`PanelError`] in an error chain, if any
pub fn classify_anyhow_error(error: &anyhow::Error) -> Option<&PanelError> {
    error.chain().find_map(|cause| cause.downcast_ref::<PanelError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> PanelError {
        PanelError::Status {
            method: "GET".to_string(),
            path: "/api/client/servers/abc/backups".to_string(),
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[test]
    fn test_not_found() {
        assert!(status(404).is_not_found());
        assert!(!status(500).is_not_found());
    }

    #[test]
    fn test_retryable() {
        assert!(status(429).is_retryable());
        assert!(status(502).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
    }

    #[test]
    fn test_classify_walks_context_chain() {
        let err = anyhow::Error::new(status(404)).context("Failed to delete snapshot");
        assert!(classify_anyhow_error(&err).unwrap().is_not_found());

        let plain = anyhow::anyhow!("something else");
        assert!(classify_anyhow_error(&plain).is_none());
    }
}
