use std::collections::HashMap;
use std::sync::RwLock;

use wms_catalog::{CatalogLookup, Location, Product, Warehouse};
use wms_core::{Entity, LocationId, ProductId, WarehouseId};

/// In-memory master data for tests/dev.
///
/// Upserts replace the stored entity; nothing is ever removed, deactivation
/// goes through the entity itself.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    warehouses: RwLock<HashMap<WarehouseId, Warehouse>>,
    products: RwLock<HashMap<ProductId, Product>>,
    locations: RwLock<HashMap<LocationId, Location>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_warehouse(&self, warehouse: Warehouse) {
        if let Ok(mut map) = self.warehouses.write() {
            map.insert(*warehouse.id(), warehouse);
        }
    }

    pub fn upsert_product(&self, product: Product) {
        if let Ok(mut map) = self.products.write() {
            map.insert(*product.id(), product);
        }
    }

    pub fn upsert_location(&self, location: Location) {
        if let Ok(mut map) = self.locations.write() {
            map.insert(*location.id(), location);
        }
    }
}

impl CatalogLookup for InMemoryCatalog {
    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse> {
        self.warehouses.read().ok()?.get(&id).cloned()
    }

    fn product(&self, id: ProductId) -> Option<Product> {
        self.products.read().ok()?.get(&id).cloned()
    }

    fn location(&self, id: LocationId) -> Option<Location> {
        self.locations.read().ok()?.get(&id).cloned()
    }
}
