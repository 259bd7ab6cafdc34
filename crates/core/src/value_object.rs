//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. In this
/// workspace they are validated at construction (e.g. a document line that
/// cannot exist in an invalid shape), so holding one is proof of validity.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Barcode(String);
///
/// impl ValueObject for Barcode {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
