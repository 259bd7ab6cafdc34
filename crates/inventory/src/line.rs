use serde::{Deserialize, Serialize};

use wms_core::{LocationId, ProductId, ValueObject};

use crate::stock::StockDelta;

/// Caller-supplied content of a document line.
///
/// Constructors only fill in the fields for a document type. Shape rules and
/// master data checks live in the resolver, which runs them when the line is
/// added and again at confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpec {
    pub product_id: ProductId,
    pub source: Option<LocationId>,
    pub destination: Option<LocationId>,
    pub quantity: i64,
}

impl LineSpec {
    pub fn receipt(product_id: ProductId, destination: LocationId, quantity: i64) -> Self {
        Self {
            product_id,
            source: None,
            destination: Some(destination),
            quantity,
        }
    }

    pub fn issue(product_id: ProductId, source: LocationId, quantity: i64) -> Self {
        Self {
            product_id,
            source: Some(source),
            destination: None,
            quantity,
        }
    }

    pub fn transfer(product_id: ProductId, source: LocationId, destination: LocationId, quantity: i64) -> Self {
        Self {
            product_id,
            source: Some(source),
            destination: Some(destination),
            quantity,
        }
    }

    /// Signed adjustment at a single location.
    pub fn adjustment(product_id: ProductId, location: LocationId, delta: i64) -> Self {
        Self {
            product_id,
            source: None,
            destination: Some(location),
            quantity: delta,
        }
    }

    /// Every location this line references.
    pub fn locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.source.iter().chain(self.destination.iter()).copied()
    }
}

impl ValueObject for LineSpec {}

/// A line attached to a document.
///
/// `applied` is empty while the document is a draft and holds the ledger
/// deltas this line produced once it is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub line_no: u32,
    pub spec: LineSpec,
    #[serde(default)]
    pub applied: Vec<StockDelta>,
}
