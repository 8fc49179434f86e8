//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity: two instances with the same attribute values are
/// interchangeable. Derived figures such as a part's recomputed stock levels are
/// modelled this way, so recomputing twice over the same ledger yields equal values.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
