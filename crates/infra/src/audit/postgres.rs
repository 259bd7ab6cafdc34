//! Postgres-backed audit log (insert-only).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};

use wms_core::{UserId, WarehouseId};

use super::query::{AuditFilter, AuditPage, AuditQuery, Pagination};
use super::{AuditError, AuditRecord, AuditSink};

#[derive(Debug, Clone)]
pub struct PostgresAuditLog {
    pool: Arc<PgPool>,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Insert a batch in one transaction.
    #[instrument(skip(self, records), fields(record_count = records.len()), err)]
    pub async fn append(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO audit_records (
                    id,
                    actor,
                    action,
                    entity_type,
                    entity_id,
                    warehouse_id,
                    reference,
                    before_state,
                    after_state,
                    recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(record.id)
            .bind(record.actor.as_uuid())
            .bind(&record.action)
            .bind(&record.entity_type)
            .bind(&record.entity_id)
            .bind(record.warehouse_id.map(|w| *w.as_uuid()))
            .bind(&record.reference)
            .bind(&record.before)
            .bind(&record.after)
            .bind(record.recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_audit_record", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(returned = tracing::field::Empty), err)]
    pub async fn query_records(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, AuditError> {
        let actor = filter.actor.map(|a| *a.as_uuid());
        let warehouse = filter.warehouse_id.map(|w| *w.as_uuid());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) as total
            FROM audit_records
            WHERE ($1::uuid IS NULL OR actor = $1)
                AND ($2::text IS NULL OR entity_type = $2)
                AND ($3::text IS NULL OR entity_id = $3)
                AND ($4::text IS NULL OR action = $4)
                AND ($5::uuid IS NULL OR warehouse_id = $5)
                AND ($6::timestamptz IS NULL OR recorded_at >= $6)
                AND ($7::timestamptz IS NULL OR recorded_at <= $7)
            "#,
        )
        .bind(actor)
        .bind(filter.entity_type.as_deref())
        .bind(filter.entity_id.as_deref())
        .bind(filter.action.as_deref())
        .bind(warehouse)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_audit_records", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| AuditError::Storage(format!("failed to read total: {e}")))?;

        let rows = sqlx::query(
            r#"
            SELECT id, actor, action, entity_type, entity_id, warehouse_id, reference,
                   before_state, after_state, recorded_at
            FROM audit_records
            WHERE ($1::uuid IS NULL OR actor = $1)
                AND ($2::text IS NULL OR entity_type = $2)
                AND ($3::text IS NULL OR entity_id = $3)
                AND ($4::text IS NULL OR action = $4)
                AND ($5::uuid IS NULL OR warehouse_id = $5)
                AND ($6::timestamptz IS NULL OR recorded_at >= $6)
                AND ($7::timestamptz IS NULL OR recorded_at <= $7)
            ORDER BY recorded_at ASC, seq ASC
            LIMIT $8 OFFSET $9
            "#,
        )
        .bind(actor)
        .bind(filter.entity_type.as_deref())
        .bind(filter.entity_id.as_deref())
        .bind(filter.action.as_deref())
        .bind(warehouse)
        .bind(filter.from)
        .bind(filter.to)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_audit_records", e))?;

        let records = rows
            .iter()
            .map(|row| -> Result<AuditRecord, sqlx::Error> {
                let warehouse_id: Option<uuid::Uuid> = row.try_get("warehouse_id")?;
                let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;
                Ok(AuditRecord {
                    id: row.try_get("id")?,
                    actor: UserId::from_uuid(row.try_get("actor")?),
                    action: row.try_get("action")?,
                    entity_type: row.try_get("entity_type")?,
                    entity_id: row.try_get("entity_id")?,
                    warehouse_id: warehouse_id.map(WarehouseId::from_uuid),
                    reference: row.try_get("reference")?,
                    before: row.try_get("before_state")?,
                    after: row.try_get("after_state")?,
                    recorded_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AuditError::Storage(format!("failed to deserialize audit row: {e}")))?;

        let total = total.max(0) as u64;
        let has_more = u64::from(pagination.offset) + (records.len() as u64) < total;
        Span::current().record("returned", records.len());

        Ok(AuditPage {
            records,
            total,
            pagination,
            has_more,
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AuditError {
    match err {
        sqlx::Error::Database(db_err) => {
            AuditError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => AuditError::Storage(format!("connection pool closed in {}", operation)),
        _ => AuditError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn block_on<T>(future: impl std::future::Future<Output = Result<T, AuditError>>) -> Result<T, AuditError> {
    crate::runtime::block_on("PostgresAuditLog", future).map_err(AuditError::Storage)?
}

impl AuditSink for PostgresAuditLog {
    fn record(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        block_on(self.append(records))
    }
}

impl AuditQuery for PostgresAuditLog {
    fn query(&self, filter: &AuditFilter, pagination: Pagination) -> Result<AuditPage, AuditError> {
        block_on(self.query_records(filter, pagination))
    }
}
