//! Domain error model shared by master data and the movement aggregates.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures a pure domain rule can raise on its own.
///
/// Lookups, authorization and ledger outcomes need context the domain layer
/// does not have; those live on `StockError` in the inventory crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, e.g. an empty SKU or an inactive warehouse.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A command contradicts the aggregate's current state.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Duplicate creation of an aggregate that already exists.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
