//! Stock movement domain (document lifecycle, delta resolution, counts).
//!
//! This crate contains business rules only, implemented as deterministic
//! domain logic (no IO, no storage). The infrastructure crate owns the stock
//! ledger and the audit log and drives these aggregates.

pub mod count;
pub mod document;
pub mod error;
pub mod line;
pub mod resolver;
pub mod stock;

pub use count::{
    adjustment_lines, check_count_target,
    CompleteCount, CountCommand, CountEvent, CountLine, CountScope, CountSnapshot, CountStatus,
    InventoryCount, RecordCount, StartCount,
};
pub use document::{
    CancelDocument, ConfirmDocument, CreateDocument, Document, DocumentCommand, DocumentEvent,
    DocumentSnapshot, DocumentStatus, DocumentType,
};
pub use error::StockError;
pub use line::{DocumentLine, LineSpec};
pub use resolver::{LineMovement, Resolution};
pub use stock::{net_deltas, StockChange, StockDelta, StockKey, StockRow};
