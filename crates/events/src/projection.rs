use crate::{Event, EventEnvelope};

/// A projection builds a read model from published events.
///
/// Projections must be **idempotent**: delivery is at-least-once, so applying
/// the same envelope twice has to leave the read model unchanged. Read models
/// are disposable and can be rebuilt by replaying events.
///
/// `apply` does not return errors: an event that is irrelevant to the
/// projection is ignored, anything else is logged by the implementation.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
