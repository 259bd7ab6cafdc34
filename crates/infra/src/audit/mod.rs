//! Append-only audit log of stock-affecting actions.
//!
//! Every committed ledger change produces one record per touched row, and
//! every document/count transition one record for the entity itself.

pub mod in_memory;
pub mod postgres;
pub mod query;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

use wms_core::{UserId, WarehouseId};
use wms_inventory::StockChange;

pub use in_memory::InMemoryAuditLog;
pub use postgres::PostgresAuditLog;
pub use query::{AuditFilter, AuditPage, AuditQuery, Pagination};

/// Action names written to [`AuditRecord::action`].
pub mod actions {
    pub const STOCK_CHANGED: &str = "stock.changed";
    pub const DOCUMENT_CREATED: &str = "document.created";
    pub const DOCUMENT_LINE_ADDED: &str = "document.line_added";
    pub const DOCUMENT_LINE_EDITED: &str = "document.line_edited";
    pub const DOCUMENT_LINE_REMOVED: &str = "document.line_removed";
    pub const DOCUMENT_CONFIRMED: &str = "document.confirmed";
    pub const DOCUMENT_CANCELLED: &str = "document.cancelled";
    pub const COUNT_STARTED: &str = "count.started";
    pub const COUNT_RECORDED: &str = "count.recorded";
    pub const COUNT_COMPLETED: &str = "count.completed";
    pub const COUNT_REOPENED: &str = "count.reopened";
    pub const COUNT_CANCELLED: &str = "count.cancelled";
}

pub const ENTITY_STOCK_ROW: &str = "stock_row";
pub const ENTITY_DOCUMENT: &str = "document";
pub const ENTITY_COUNT: &str = "count";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor: UserId,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub warehouse_id: Option<WarehouseId>,
    /// The document or count that caused a stock change.
    pub reference: Option<String>,
    pub before: JsonValue,
    pub after: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor: UserId,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
        warehouse_id: Option<WarehouseId>,
        before: JsonValue,
        after: JsonValue,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            warehouse_id,
            reference: None,
            before,
            after,
            recorded_at,
        }
    }

    /// Record for one ledger row touched by a committed batch.
    pub fn stock_change(
        actor: UserId,
        warehouse_id: WarehouseId,
        reference: impl ToString,
        change: &StockChange,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let row = |quantity: i64| {
            json!({
                "product_id": change.key.product_id,
                "location_id": change.key.location_id,
                "quantity": quantity,
            })
        };
        let mut record = Self::new(
            actor,
            actions::STOCK_CHANGED,
            ENTITY_STOCK_ROW,
            format!("{}:{}", change.key.product_id, change.key.location_id),
            Some(warehouse_id),
            row(change.before),
            row(change.after),
            recorded_at,
        );
        record.reference = Some(reference.to_string());
        record
    }

    pub fn with_reference(mut self, reference: impl ToString) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    /// Signed quantity change of a `stock.changed` record.
    pub fn quantity_delta(&self) -> Option<i64> {
        let before = self.before.get("quantity")?.as_i64()?;
        let after = self.after.get("quantity")?.as_i64()?;
        Some(after - before)
    }
}

/// Write side of the audit log. Writes are all-or-nothing per call.
pub trait AuditSink: Send + Sync {
    fn record(&self, records: &[AuditRecord]) -> Result<(), AuditError>;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        (**self).record(records)
    }
}
