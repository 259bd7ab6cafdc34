//! Engine error taxonomy.
//!
//! Every variant is recoverable by the caller: a rejected operation leaves
//! ledger, documents and counts exactly as they were. The one exception is
//! `AuditWriteFailed`, which is reported *after* the stock mutation committed.

use thiserror::Error;

use wms_core::{DomainError, LocationId, ProductId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Illegal state-machine move (e.g. editing a confirmed document).
    #[error("invalid transition: cannot {action} {entity} in status {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    /// Bad product/location/quantity on a line.
    #[error("invalid line: {0}")]
    InvalidLine(String),

    /// Adjustment line with a zero delta.
    #[error("line {line_no} has a zero quantity and would not move stock")]
    NoOpLine { line_no: u32 },

    /// Applying the batch would drive a row negative.
    #[error(
        "insufficient stock for product {product} at location {location}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product: ProductId,
        location: LocationId,
        requested: i64,
        available: i64,
    },

    /// Reversing a confirmed movement would drive a row negative.
    #[error(
        "cannot reverse movement of product {product} at location {location}: requested {requested}, available {available}"
    )]
    CancellationConflict {
        product: ProductId,
        location: LocationId,
        requested: i64,
        available: i64,
    },

    /// A row no longer held the quantity the caller computed its delta from.
    #[error("stock of product {product} at location {location} changed (expected {expected}, found {found})")]
    StaleRead {
        product: ProductId,
        location: LocationId,
        expected: i64,
        found: i64,
    },

    /// The audit sink rejected records for a mutation that already committed.
    #[error("audit write failed for {failed} record(s) after commit: {reason}")]
    AuditWriteFailed { failed: usize, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The backing store failed (lock poisoning, database error).
    #[error("storage failure: {0}")]
    Storage(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl StockError {
    pub fn invalid_line(msg: impl Into<String>) -> Self {
        Self::InvalidLine(msg.into())
    }

    pub fn transition(entity: &'static str, from: impl core::fmt::Debug, action: &'static str) -> Self {
        Self::InvalidTransition {
            entity,
            from: format!("{from:?}").to_uppercase(),
            action,
        }
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Re-label a ledger rejection raised while reversing a movement.
    pub fn into_cancellation_conflict(self) -> Self {
        match self {
            Self::InsufficientStock {
                product,
                location,
                requested,
                available,
            } => Self::CancellationConflict {
                product,
                location,
                requested,
                available,
            },
            other => other,
        }
    }
}
