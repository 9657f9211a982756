//! Error taxonomy and user-facing notices.
//!
//! DESIGN
//! ======
//! Store adapters fail with `StoreError`. Domain operations fail with
//! `BachecaError`, whose variants follow the three recoverable classes a
//! board client deals with: the store is unreachable, the local permission
//! gate said no, or the input did not validate. Every error carries a
//! grepable code through `ErrorCode`, and `Notice` is the dismissible form
//! the UI shows.

use serde::Serialize;
use uuid::Uuid;

use crate::types::PatchError;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for user-facing notices.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Failure reported by a remote store or change-feed adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("row decode failed: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BachecaError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("element not found: {0}")]
    ElementNotFound(Uuid),
    #[error("board not found: {0}")]
    BoardNotFound(Uuid),
}

impl BachecaError {
    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::ValidationFailed(reason.into())
    }
}

impl From<PatchError> for BachecaError {
    fn from(e: PatchError) -> Self {
        Self::ValidationFailed(e.to_string())
    }
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
            Self::Decode(_) => "E_STORE_DECODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl ErrorCode for BachecaError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "E_STORE_UNAVAILABLE",
            Self::PermissionDenied(_) => "E_PERMISSION_DENIED",
            Self::ValidationFailed(_) => "E_VALIDATION_FAILED",
            Self::ElementNotFound(_) => "E_ELEMENT_NOT_FOUND",
            Self::BoardNotFound(_) => "E_BOARD_NOT_FOUND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

// =============================================================================
// NOTICES
// =============================================================================

/// Dismissible, user-visible report of a failed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl Notice {
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
