use std::sync::RwLock;

use super::query::{AuditFilter, AuditPage, AuditQuery, Pagination};
use super::{AuditError, AuditRecord, AuditSink};

/// In-memory append-only audit log.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order.
    pub fn all(&self) -> Vec<AuditRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        let mut log = self
            .records
            .write()
            .map_err(|_| AuditError::Storage("lock poisoned".to_string()))?;
        log.extend_from_slice(records);
        Ok(())
    }
}

impl AuditQuery for InMemoryAuditLog {
    fn query(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, AuditError> {
        let log = self
            .records
            .read()
            .map_err(|_| AuditError::Storage("lock poisoned".to_string()))?;

        let mut matching: Vec<(usize, &AuditRecord)> =
            log.iter().enumerate().filter(|(_, r)| filter.matches(r)).collect();
        matching.sort_by_key(|(seq, r)| (r.recorded_at, *seq));

        let total = matching.len() as u64;
        let records: Vec<AuditRecord> = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .map(|(_, r)| r.clone())
            .collect();
        let has_more = u64::from(pagination.offset) + (records.len() as u64) < total;

        Ok(AuditPage {
            records,
            total,
            pagination,
            has_more,
        })
    }
}
