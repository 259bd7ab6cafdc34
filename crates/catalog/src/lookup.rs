use std::sync::Arc;

use wms_core::{LocationId, ProductId, WarehouseId};

use crate::{Location, Product, Warehouse};

/// Read-only master data lookup used during line validation.
///
/// Returning owned values keeps implementations free to sit behind locks or
/// remote caches.
pub trait CatalogLookup: Send + Sync {
    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse>;
    fn product(&self, id: ProductId) -> Option<Product>;
    fn location(&self, id: LocationId) -> Option<Location>;
}

impl<C> CatalogLookup for Arc<C>
where
    C: CatalogLookup + ?Sized,
{
    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse> {
        (**self).warehouse(id)
    }

    fn product(&self, id: ProductId) -> Option<Product> {
        (**self).product(id)
    }

    fn location(&self, id: LocationId) -> Option<Location> {
        (**self).location(id)
    }
}
