//! Navigation error taxonomy
//!
//! Every component of the navigation core reports failures through `NavError`.
//! The type is `Clone` because a single in-flight panorama fetch hands its
//! result to every caller awaiting the same id.

use thiserror::Error;

/// Errors produced by the navigation core
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NavError {
    /// Target panorama metadata is missing or malformed. Never retried.
    #[error("Invalid panorama target {panorama_id}: {reason}")]
    Validation { panorama_id: String, reason: String },

    /// The view did not report the target panorama before the deadline.
    #[error("Panorama transition timeout: {panorama_id} not active after {waited_ms}ms")]
    TransitionTimeout { panorama_id: String, waited_ms: u64 },

    /// Provider call failed. Surfaced to every awaiting caller, never cached.
    #[error("Failed to fetch panorama {panorama_id}: {message}")]
    Fetch { panorama_id: String, message: String },

    /// Provider call did not settle within the configured fetch timeout.
    #[error("Fetching panorama {panorama_id} timed out after {timeout_ms}ms")]
    FetchTimeout { panorama_id: String, timeout_ms: u64 },

    /// Every swap attempt of a transition failed.
    #[error("All transition attempts failed for {panorama_id} ({attempts} attempts): {last_error}")]
    ExhaustedRetries {
        panorama_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Navigation cancelled")]
    Cancelled,

    /// The shared view is owned by another operation.
    #[error("View is busy with another navigation")]
    ViewBusy,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl NavError {
    /// Build a fetch error from any displayable provider failure
    pub fn fetch(panorama_id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Fetch {
            panorama_id: panorama_id.into(),
            message: err.to_string(),
        }
    }

    pub fn validation(panorama_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            panorama_id: panorama_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether a transition may retry the swap after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransitionTimeout { .. } | Self::Fetch { .. } | Self::FetchTimeout { .. }
        )
    }
}

/// Result alias used across the navigation core
pub type NavResult<T> = Result<T, NavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(NavError::TransitionTimeout {
            panorama_id: "P".to_string(),
            waited_ms: 5000,
        }
        .is_retryable());
        assert!(NavError::fetch("P", "boom").is_retryable());

        assert!(!NavError::validation("P", "missing").is_retryable());
        assert!(!NavError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = NavError::ExhaustedRetries {
            panorama_id: "P2".to_string(),
            attempts: 3,
            last_error: "timeout".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("P2"));
        assert!(msg.contains("3 attempts"));
    }
}
