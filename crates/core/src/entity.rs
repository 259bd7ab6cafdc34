//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Master data (warehouses, products, locations) are entities: they are never
/// physically deleted, only moved to an inactive status.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Whether the entity may be referenced by new stock movements.
    fn is_active(&self) -> bool;
}
