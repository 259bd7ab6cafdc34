//! Postgres-backed stock ledger.
//!
//! A batch runs in one transaction:
//!
//! 1. Missing rows are inserted with quantity 0 (`ON CONFLICT DO NOTHING`).
//! 2. Every touched row is locked with `SELECT … FOR UPDATE`, in key order,
//!    so concurrent batches over overlapping rows cannot deadlock.
//! 3. All resulting quantities are validated before any `UPDATE` runs.
//! 4. Any rejection rolls the transaction back, including the inserted rows.
//!
//! The `stock_rows.quantity >= 0` check constraint backs up step 3.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (check constraint violation on update) | `23514` | `Insufficient` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use wms_core::{LocationId, ProductId};
use wms_inventory::{net_deltas, StockChange, StockDelta, StockKey, StockRow};

use super::{check_delta, LedgerError, StockLedger};

/// Tables and indexes for the ledger, master data and the audit log.
pub const SCHEMA: &str = include_str!("../../migrations/0001_stock.sql");

/// Create whatever part of [`SCHEMA`] is missing.
pub async fn install_schema(pool: &PgPool) -> Result<(), LedgerError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("install_schema", e))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresStockLedger {
    pool: Arc<PgPool>,
}

impl PostgresStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), fields(product_id = %key.product_id, location_id = %key.location_id), err)]
    pub async fn load_quantity(&self, key: StockKey) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT quantity
            FROM stock_rows
            WHERE product_id = $1 AND location_id = $2
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_quantity", e))?;

        match row {
            Some(row) => row
                .try_get::<i64, _>("quantity")
                .map_err(|e| LedgerError::Storage(format!("failed to read quantity: {e}"))),
            None => Ok(0),
        }
    }

    #[instrument(skip(self, deltas), fields(delta_count = deltas.len(), committed_rows = tracing::field::Empty), err)]
    pub async fn apply_deltas(&self, deltas: &[StockDelta]) -> Result<Vec<StockChange>, LedgerError> {
        let deltas = net_deltas(deltas).map_err(|key| LedgerError::Overflow { key })?;
        if deltas.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut changes = Vec::with_capacity(deltas.len());
        for delta in &deltas {
            let before = lock_row(&mut tx, delta.key).await?;
            match check_delta(delta, before) {
                Ok(change) => changes.push(change),
                Err(err) => {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(err);
                }
            }
        }

        for change in &changes {
            sqlx::query(
                r#"
                UPDATE stock_rows
                SET quantity = $3, updated_at = NOW()
                WHERE product_id = $1 AND location_id = $2
                "#,
            )
            .bind(change.key.product_id.as_uuid())
            .bind(change.key.location_id.as_uuid())
            .bind(change.after)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_check_violation(&e) {
                    LedgerError::Insufficient {
                        key: change.key,
                        requested: -change.delta(),
                        available: change.before,
                    }
                } else {
                    map_sqlx_error("update_row", e)
                }
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_rows", changes.len());
        Ok(changes)
    }

    #[instrument(skip(self), err)]
    pub async fn list_rows(
        &self,
        product_id: Option<ProductId>,
        location_id: Option<LocationId>,
    ) -> Result<Vec<StockRow>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, location_id, quantity
            FROM stock_rows
            WHERE ($1::uuid IS NULL OR product_id = $1)
                AND ($2::uuid IS NULL OR location_id = $2)
            ORDER BY product_id ASC, location_id ASC
            "#,
        )
        .bind(product_id.map(|id| *id.as_uuid()))
        .bind(location_id.map(|id| *id.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_rows", e))?;

        rows.iter()
            .map(|row| -> Result<StockRow, sqlx::Error> {
                Ok(StockRow {
                    product_id: ProductId::from_uuid(row.try_get("product_id")?),
                    location_id: LocationId::from_uuid(row.try_get("location_id")?),
                    quantity: row.try_get("quantity")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| LedgerError::Storage(format!("failed to deserialize stock row: {e}")))
    }
}

/// Ensure the row exists and lock it for the rest of the transaction.
async fn lock_row(tx: &mut Transaction<'_, Postgres>, key: StockKey) -> Result<i64, LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO stock_rows (product_id, location_id, quantity)
        VALUES ($1, $2, 0)
        ON CONFLICT (product_id, location_id) DO NOTHING
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.location_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_row", e))?;

    let row = sqlx::query(
        r#"
        SELECT quantity
        FROM stock_rows
        WHERE product_id = $1 AND location_id = $2
        FOR UPDATE
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.location_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_row", e))?;

    row.try_get("quantity")
        .map_err(|e| LedgerError::Storage(format!("failed to read quantity: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            LedgerError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => LedgerError::Storage(format!("connection pool closed in {}", operation)),
        _ => LedgerError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a `CHECK` constraint violation.
fn is_check_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23514";
        }
    }
    false
}

fn block_on<T>(future: impl std::future::Future<Output = Result<T, LedgerError>>) -> Result<T, LedgerError> {
    crate::runtime::block_on("PostgresStockLedger", future).map_err(LedgerError::Storage)?
}

impl StockLedger for PostgresStockLedger {
    fn quantity(&self, key: &StockKey) -> Result<i64, LedgerError> {
        block_on(self.load_quantity(*key))
    }

    fn apply(&self, deltas: &[StockDelta]) -> Result<Vec<StockChange>, LedgerError> {
        block_on(self.apply_deltas(deltas))
    }

    fn rows(&self, product_id: Option<ProductId>, location_id: Option<LocationId>) -> Result<Vec<StockRow>, LedgerError> {
        block_on(self.list_rows(product_id, location_id))
    }
}
