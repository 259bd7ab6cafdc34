//! Infrastructure layer: stock ledger, audit log, repositories, config and the
//! engine that drives the inventory aggregates against them.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod repository;

mod integration_tests;
mod runtime;

pub use audit::{AuditError, AuditFilter, AuditPage, AuditQuery, AuditRecord, AuditSink, InMemoryAuditLog, Pagination, PostgresAuditLog};
pub use catalog::InMemoryCatalog;
pub use config::{ConfigError, EngineConfig};
pub use engine::{DocumentFilter, InMemoryStockEngine, NewDocument, StockEngine, StockFilter};
pub use ledger::{install_schema, InMemoryStockLedger, LedgerError, PostgresStockLedger, StockLedger};
