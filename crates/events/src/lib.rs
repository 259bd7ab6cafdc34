//! Domain events and their distribution.
//!
//! Document and count aggregates emit typed events; once a transition has been
//! committed the engine wraps each event in an [`EventEnvelope`] and publishes
//! it on an [`EventBus`] for downstream consumers (read models, notifications).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
