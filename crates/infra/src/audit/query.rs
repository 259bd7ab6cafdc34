//! Audit query interface.
//!
//! All queries are paginated; results are ordered by record time, then by
//! insertion order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wms_core::{UserId, WarehouseId};

use super::{AuditError, AuditRecord};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// Clamp the page size to `max`.
    pub fn capped(self, max: u32) -> Self {
        Self {
            limit: self.limit.min(max),
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub actor: Option<UserId>,
    /// e.g. `"document"`, `"count"`, `"stock_row"`.
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// e.g. `"document.confirmed"`.
    pub action: Option<String>,
    pub warehouse_id: Option<WarehouseId>,
    /// Inclusive lower bound on `recorded_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `recorded_at`.
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.actor.is_none_or(|a| a == record.actor)
            && self.entity_type.as_deref().is_none_or(|t| t == record.entity_type)
            && self.entity_id.as_deref().is_none_or(|id| id == record.entity_id)
            && self.action.as_deref().is_none_or(|a| a == record.action)
            && self.warehouse_id.is_none_or(|w| record.warehouse_id == Some(w))
            && self.from.is_none_or(|from| record.recorded_at >= from)
            && self.to.is_none_or(|to| record.recorded_at <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    /// Records matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

pub trait AuditQuery: Send + Sync {
    fn query(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, AuditError>;
}

impl<Q> AuditQuery for Arc<Q>
where
    Q: AuditQuery + ?Sized,
{
    fn query(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, AuditError> {
        (**self).query(filter, pagination)
    }
}
