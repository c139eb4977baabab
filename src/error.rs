//! Error taxonomy for store operations.
//!
//! Every write validates at the operation boundary and either fully succeeds
//! or reports exactly one of these variants, leaving persisted state
//! unchanged. `Conflict` is retryable once the conflicting state is resolved;
//! `Validation` and `Integrity` are not retryable without changing the input.

use thiserror::Error;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Constraint, enum, or range violation on a write
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced id absent or soft-deleted
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation, or delete blocked by a live reference
    #[error("conflict: {0}")]
    Conflict(String),

    /// Write referencing a nonexistent or soft-deleted foreign entity
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
