use serde::{Deserialize, Serialize};

use wms_core::{DomainError, DomainResult, Entity, LocationId, WarehouseId};

/// Location status lifecycle.
///
/// Only `Active` locations may take part in new movements. `Blocked` is a
/// temporary hold (damage, quarantine); `Inactive` is the soft-deleted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationStatus {
    Active,
    Blocked,
    Inactive,
}

/// A storage location (bin, shelf, dock) inside one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    id: LocationId,
    warehouse_id: WarehouseId,
    barcode: String,
    status: LocationStatus,
}

impl Location {
    pub fn new(id: LocationId, warehouse_id: WarehouseId, barcode: impl Into<String>) -> DomainResult<Self> {
        let barcode = barcode.into();
        if barcode.trim().is_empty() {
            return Err(DomainError::validation("location barcode cannot be empty"));
        }
        if barcode.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("location barcode cannot contain whitespace"));
        }
        Ok(Self {
            id,
            warehouse_id,
            barcode,
            status: LocationStatus::Active,
        })
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn barcode(&self) -> &str {
        &self.barcode
    }

    pub fn status(&self) -> LocationStatus {
        self.status
    }

    pub fn set_status(&mut self, status: LocationStatus) {
        self.status = status;
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.status == LocationStatus::Active
    }
}
