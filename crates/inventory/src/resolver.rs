//! Movement resolver: turns a document's lines into ledger deltas.
//!
//! Resolution is read-only. It consults master data through [`CatalogLookup`]
//! but never touches the ledger, so every rejection here happens before any
//! stock is locked.

use serde::{Deserialize, Serialize};

use wms_catalog::{CatalogLookup, LocationStatus};
use wms_core::{Entity, LocationId, WarehouseId};

use crate::document::DocumentType;
use crate::error::StockError;
use crate::line::{DocumentLine, LineSpec};
use crate::stock::{net_deltas, StockDelta, StockKey};

/// Deltas produced by one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMovement {
    pub line_no: u32,
    pub deltas: Vec<StockDelta>,
}

/// Outcome of resolving a whole document.
///
/// `net` is what gets handed to the ledger: one delta per touched
/// (product, location) pair, sorted by key, zero nets removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub lines: Vec<LineMovement>,
    pub net: Vec<StockDelta>,
}

/// Per-type shape rules for a single line.
///
/// | Type | Effect |
/// |---|---|
/// | receipt | `+qty` at destination, no source |
/// | issue | `-qty` at source, no destination |
/// | transfer | `-qty` at source, `+qty` at destination, distinct |
/// | adjustment | signed `qty` at its single location |
pub fn line_deltas(doc_type: DocumentType, line_no: u32, spec: &LineSpec) -> Result<Vec<StockDelta>, StockError> {
    let key = |location: LocationId| StockKey::new(spec.product_id, location);

    if doc_type != DocumentType::Adjustment && spec.quantity <= 0 {
        return Err(StockError::invalid_line(format!(
            "line {line_no}: quantity must be a positive integer (got {})",
            spec.quantity
        )));
    }

    match doc_type {
        DocumentType::Receipt => {
            if spec.source.is_some() {
                return Err(StockError::invalid_line(format!(
                    "line {line_no}: receipt lines cannot have a source location"
                )));
            }
            let destination = spec.destination.ok_or_else(|| {
                StockError::invalid_line(format!("line {line_no}: receipt lines need a destination location"))
            })?;
            Ok(vec![StockDelta::new(key(destination), spec.quantity)])
        }
        DocumentType::Issue => {
            if spec.destination.is_some() {
                return Err(StockError::invalid_line(format!(
                    "line {line_no}: issue lines cannot have a destination location"
                )));
            }
            let source = spec.source.ok_or_else(|| {
                StockError::invalid_line(format!("line {line_no}: issue lines need a source location"))
            })?;
            Ok(vec![StockDelta::new(key(source), -spec.quantity)])
        }
        DocumentType::Transfer => {
            let (source, destination) = match (spec.source, spec.destination) {
                (Some(s), Some(d)) => (s, d),
                _ => {
                    return Err(StockError::invalid_line(format!(
                        "line {line_no}: transfer lines need both a source and a destination"
                    )));
                }
            };
            if source == destination {
                return Err(StockError::invalid_line(format!(
                    "line {line_no}: transfer source and destination must differ"
                )));
            }
            Ok(vec![
                StockDelta::new(key(source), -spec.quantity),
                StockDelta::new(key(destination), spec.quantity),
            ])
        }
        DocumentType::Adjustment => {
            let location = match (spec.source, spec.destination) {
                (Some(l), None) | (None, Some(l)) => l,
                (Some(s), Some(d)) if s == d => s,
                (Some(_), Some(_)) => {
                    return Err(StockError::invalid_line(format!(
                        "line {line_no}: adjustment lines target a single location"
                    )));
                }
                (None, None) => {
                    return Err(StockError::invalid_line(format!(
                        "line {line_no}: adjustment lines need a location"
                    )));
                }
            };
            if spec.quantity == 0 {
                return Err(StockError::NoOpLine { line_no });
            }
            // Every delta must have a representable inverse for cancellation.
            if spec.quantity.checked_neg().is_none() {
                return Err(StockError::invalid_line(format!(
                    "line {line_no}: adjustment quantity {} is out of range",
                    spec.quantity
                )));
            }
            Ok(vec![StockDelta::new(key(location), spec.quantity)])
        }
    }
}

/// Master data checks: the product and every referenced location exist, are
/// active, and the locations belong to `warehouse_id`.
pub fn check_references<C>(
    catalog: &C,
    warehouse_id: WarehouseId,
    line_no: u32,
    spec: &LineSpec,
) -> Result<(), StockError>
where
    C: CatalogLookup + ?Sized,
{
    let product = catalog.product(spec.product_id).ok_or_else(|| {
        StockError::invalid_line(format!("line {line_no}: product {} does not exist", spec.product_id))
    })?;
    if !product.is_active() {
        return Err(StockError::invalid_line(format!(
            "line {line_no}: product {} is inactive",
            product.sku()
        )));
    }

    for location_id in spec.locations() {
        let location = catalog.location(location_id).ok_or_else(|| {
            StockError::invalid_line(format!("line {line_no}: location {location_id} does not exist"))
        })?;
        match location.status() {
            LocationStatus::Active => {}
            LocationStatus::Blocked => {
                return Err(StockError::invalid_line(format!(
                    "line {line_no}: location {} is blocked",
                    location.barcode()
                )));
            }
            LocationStatus::Inactive => {
                return Err(StockError::invalid_line(format!(
                    "line {line_no}: location {} is inactive",
                    location.barcode()
                )));
            }
        }
        if location.warehouse_id() != warehouse_id {
            return Err(StockError::invalid_line(format!(
                "line {line_no}: location {} belongs to another warehouse",
                location.barcode()
            )));
        }
    }

    Ok(())
}

/// Full validation of one line: shape first, then references.
pub fn validate_line<C>(
    catalog: &C,
    doc_type: DocumentType,
    warehouse_id: WarehouseId,
    line_no: u32,
    spec: &LineSpec,
) -> Result<Vec<StockDelta>, StockError>
where
    C: CatalogLookup + ?Sized,
{
    let deltas = line_deltas(doc_type, line_no, spec)?;
    check_references(catalog, warehouse_id, line_no, spec)?;
    Ok(deltas)
}

/// Resolve every line of a document into per-line and net deltas.
///
/// The first invalid line aborts resolution.
pub fn resolve<C>(
    catalog: &C,
    doc_type: DocumentType,
    warehouse_id: WarehouseId,
    lines: &[DocumentLine],
) -> Result<Resolution, StockError>
where
    C: CatalogLookup + ?Sized,
{
    let mut movements = Vec::with_capacity(lines.len());
    for line in lines {
        let deltas = validate_line(catalog, doc_type, warehouse_id, line.line_no, &line.spec)?;
        movements.push(LineMovement {
            line_no: line.line_no,
            deltas,
        });
    }

    let net = net_deltas(movements.iter().flat_map(|m| m.deltas.iter())).map_err(|key| {
        StockError::invalid_line(format!(
            "net quantity for product {} at location {} is out of range",
            key.product_id, key.location_id
        ))
    })?;
    Ok(Resolution {
        lines: movements,
        net,
    })
}
