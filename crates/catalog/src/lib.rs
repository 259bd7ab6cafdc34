//! Master data referenced by stock movements: warehouses, products, locations.
//!
//! Nothing here is ever physically deleted. Products carry an active flag,
//! locations a [`LocationStatus`]; the movement resolver consults both through
//! [`CatalogLookup`] when it validates document lines.

pub mod location;
pub mod lookup;
pub mod product;
pub mod warehouse;

pub use location::{Location, LocationStatus};
pub use lookup::CatalogLookup;
pub use product::{Ean, Product};
pub use warehouse::Warehouse;
