//! Workflow events and their distribution mechanics.
//!
//! Domain crates define typed events (implementing [`Event`]); infrastructure
//! wraps them in [`EventEnvelope`]s and fans them out through an [`EventBus`]
//! to consumers such as [`Projection`]s. Nothing here knows about storage.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
pub use projection::Projection;
