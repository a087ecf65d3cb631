//! Closed error taxonomy for the core (spec §7).
//!
//! Errors are classified by recoverability so callers at the IPC/export
//! boundary can decide which of the three visible tiers to render:
//! invisible auto-retry, queued-with-badge, or user-actionable modal.

use thiserror::Error;

/// The closed taxonomy from spec §7. Every component-local error type
/// converts into this one at its public boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("conflicting version: server is at {0}")]
    ConflictingVersion(i64),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("schema failure in {layer} after {attempts} attempts")]
    SchemaFailure { layer: String, attempts: u32 },

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("remote unavailable")]
    RemoteUnavailable,

    #[error("remote rejected: {0}")]
    RemoteRejected(String),

    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("integrity corrupted: {0}")]
    IntegrityCorrupted(String),
}

impl CoreError {
    /// True for errors the caller may safely retry without user input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::NetworkUnavailable
                | CoreError::RemoteUnavailable
                | CoreError::RateLimited(_)
        )
    }

    /// True for errors that require a user decision to move past
    /// (auth expired, corrupted audio, storage exhausted, etc).
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            CoreError::RemoteRejected(_) | CoreError::IntegrityCorrupted(_)
        )
    }

    /// The visible tier this error should render at (spec §7).
    pub fn tier(&self) -> ErrorTier {
        if self.requires_user_action() {
            ErrorTier::UserActionable
        } else if self.is_retryable() {
            ErrorTier::Queued
        } else {
            ErrorTier::Surfaced
        }
    }
}

/// The three user-visible tiers from spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTier {
    /// Invisible auto-retry; nothing surfaces to the user.
    Queued,
    /// Queued with a visible pending badge.
    Surfaced,
    /// A modal requiring an explicit user decision.
    UserActionable,
}

/// Serializable view of a `CoreError` for boundaries outside this crate.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreErrorView {
    pub message: String,
    pub tier: ErrorTier,
    pub can_retry: bool,
}

impl From<&CoreError> for CoreErrorView {
    fn from(err: &CoreError) -> Self {
        CoreErrorView {
            message: err.to_string(),
            tier: err.tier(),
            can_retry: err.is_retryable(),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound(err.to_string()),
            other => CoreError::IntegrityCorrupted(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
