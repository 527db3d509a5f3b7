// src/error.rs

//! Error types for the reconciliation engine
//!
//! Failures are split into two layers: `StoreError` tags everything the
//! persistent store can report (so callers can classify retry-vs-fatal
//! without inspecting engine internals), and `Error` adds the input
//! validation failures that are rejected before any store call.

use thiserror::Error;

/// Convenience result type used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by an inventory store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport or connection failure; retryable by the caller with backoff
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A concurrent writer raced an insert; safe to retry from the top
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// DDL failed; fatal for the run, never retried at the mutation level
    #[error("schema error: {0}")]
    Schema(String),

    /// The mutation batch for a host may not have applied atomically;
    /// the host's state is indeterminate. Transient commit failures that
    /// roll back cleanly are reported as `Connection` instead.
    #[error("mutation batch for host '{hostname}' did not commit: {reason}")]
    PartialApply { hostname: String, reason: String },

    /// Any other storage engine error
    #[error("store error: {0}")]
    Backend(#[from] rusqlite::Error),
}

impl StoreError {
    /// Classify a rusqlite error into the tagged taxonomy
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => match e.code {
                ErrorCode::ConstraintViolation => {
                    StoreError::Constraint(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::PermissionDenied => {
                    StoreError::Connection(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                _ => StoreError::Backend(err),
            },
            _ => StoreError::Backend(err),
        }
    }

    /// Whether the caller may retry the whole reconciliation run
    ///
    /// Constraint violations are retryable because the store converts
    /// racing inserts into updates; a schema failure never is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Constraint(_))
    }
}

/// Top-level error for a reconciliation run
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed snapshot input, rejected before any store call
    #[error("invalid snapshot: {0}")]
    Validation(String),

    /// A store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),
}
