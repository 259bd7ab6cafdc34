use chrono::{DateTime, Utc};

/// A fact emitted by a document or count aggregate.
///
/// Events describe transitions that already passed validation; they are never
/// rejected on apply and never mutated once published.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name, e.g. `"inventory.document.confirmed"`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version, bumped when the serialized shape changes.
    fn version(&self) -> u32;

    /// Business time of the transition.
    fn occurred_at(&self) -> DateTime<Utc>;
}
