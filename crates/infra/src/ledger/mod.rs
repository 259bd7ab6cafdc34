//! Stock ledger boundary.
//!
//! The ledger is the single source of truth for on-hand quantities. Its only
//! write operation applies a batch of deltas all-or-nothing: either every row
//! ends up non-negative and the batch commits, or nothing changes.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;

use wms_core::{LocationId, ProductId};
use wms_inventory::{StockChange, StockDelta, StockError, StockKey, StockRow};

pub use in_memory::InMemoryStockLedger;
pub use postgres::{install_schema, PostgresStockLedger};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("row {key:?} would go negative: requested {requested}, available {available}")]
    Insufficient {
        key: StockKey,
        requested: i64,
        available: i64,
    },

    #[error("row {key:?} moved: expected {expected}, found {found}")]
    Stale { key: StockKey, expected: i64, found: i64 },

    #[error("row {key:?} quantity overflow")]
    Overflow { key: StockKey },

    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl From<LedgerError> for StockError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Insufficient {
                key,
                requested,
                available,
            } => StockError::InsufficientStock {
                product: key.product_id,
                location: key.location_id,
                requested,
                available,
            },
            LedgerError::Stale { key, expected, found } => StockError::StaleRead {
                product: key.product_id,
                location: key.location_id,
                expected,
                found,
            },
            LedgerError::Overflow { key } => StockError::invalid_line(format!(
                "quantity of product {} at location {} would overflow",
                key.product_id, key.location_id
            )),
            LedgerError::Storage(msg) => StockError::Storage(msg),
        }
    }
}

/// Authoritative on-hand quantities keyed by (product, location).
pub trait StockLedger: Send + Sync {
    /// Current quantity of a row; rows never written read as zero.
    fn quantity(&self, key: &StockKey) -> Result<i64, LedgerError>;

    /// Apply a batch atomically.
    ///
    /// Deltas for the same key are netted first. Returns one change per
    /// touched row, ordered by key.
    fn apply(&self, deltas: &[StockDelta]) -> Result<Vec<StockChange>, LedgerError>;

    /// Stored rows (including rows that went back to zero), ordered by key.
    fn rows(&self, product_id: Option<ProductId>, location_id: Option<LocationId>) -> Result<Vec<StockRow>, LedgerError>;
}

impl<L> StockLedger for Arc<L>
where
    L: StockLedger + ?Sized,
{
    fn quantity(&self, key: &StockKey) -> Result<i64, LedgerError> {
        (**self).quantity(key)
    }

    fn apply(&self, deltas: &[StockDelta]) -> Result<Vec<StockChange>, LedgerError> {
        (**self).apply(deltas)
    }

    fn rows(&self, product_id: Option<ProductId>, location_id: Option<LocationId>) -> Result<Vec<StockRow>, LedgerError> {
        (**self).rows(product_id, location_id)
    }
}

/// Validate one netted delta against the row's current quantity.
pub(crate) fn check_delta(delta: &StockDelta, before: i64) -> Result<StockChange, LedgerError> {
    if let Some(expected) = delta.expected_before {
        if expected != before {
            return Err(LedgerError::Stale {
                key: delta.key,
                expected,
                found: before,
            });
        }
    }
    let after = before
        .checked_add(delta.delta)
        .ok_or(LedgerError::Overflow { key: delta.key })?;
    if after < 0 {
        return Err(LedgerError::Insufficient {
            key: delta.key,
            requested: delta
                .delta
                .checked_neg()
                .ok_or(LedgerError::Overflow { key: delta.key })?,
            available: before,
        });
    }
    Ok(StockChange {
        key: delta.key,
        before,
        after,
    })
}
