//! Post-commit side effects.
//!
//! Operations collect [`Effects`] while their transaction is open and hand
//! them to [`EffectDispatcher::dispatch`] only after a successful commit. A
//! rolled-back operation therefore never audits, notifies or publishes.
//! Dispatch is best-effort: sink failures are logged and swallowed.

use std::sync::Arc;

use tracing::warn;

use scf_events::{EventBus, EventEnvelope};
use scf_financing::{AuditRecord, Notification, RelationshipEvent};

use crate::ports::{AuditSink, NotificationSink};

pub type RelationshipBus = dyn EventBus<EventEnvelope<RelationshipEvent>>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Effects {
    pub audit: Vec<AuditRecord>,
    pub notifications: Vec<Notification>,
    pub relationships: Vec<RelationshipEvent>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit(&mut self, record: AuditRecord) {
        self.audit.push(record);
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn relate(&mut self, event: RelationshipEvent) {
        self.relationships.push(event);
    }
}

#[derive(Clone)]
pub struct EffectDispatcher {
    audit: Arc<dyn AuditSink>,
    notifications: Arc<dyn NotificationSink>,
    relationships: Arc<RelationshipBus>,
}

impl EffectDispatcher {
    pub fn new(
        audit: Arc<dyn AuditSink>,
        notifications: Arc<dyn NotificationSink>,
        relationships: Arc<RelationshipBus>,
    ) -> Self {
        Self {
            audit,
            notifications,
            relationships,
        }
    }

    pub async fn dispatch(&self, effects: Effects) {
        for record in effects.audit {
            let (action, entity_id) = (record.action.clone(), record.entity_id);
            if let Err(err) = self.audit.record(record).await {
                warn!(%action, %entity_id, error = %err, "audit sink rejected record");
            }
        }

        for notification in effects.notifications {
            let (recipient, kind) = (notification.recipient.entity_id, notification.kind);
            if let Err(err) = self.notifications.notify(notification).await {
                warn!(%recipient, ?kind, error = %err, "notification sink rejected notification");
            }
        }

        for event in effects.relationships {
            let envelope = EventEnvelope::wrap("invoice", event.invoice_id().as_uuid(), event);
            if let Err(err) = self.relationships.publish(envelope) {
                warn!(error = %err, "failed to publish relationship event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PortError, RecordingNotificationSink};
    use async_trait::async_trait;
    use chrono::Utc;
    use scf_core::EntityId;
    use scf_events::InMemoryEventBus;
    use scf_financing::{InvoiceId, NotificationKind, Recipient, Subject};

    struct BrokenAudit;

    #[async_trait]
    impl AuditSink for BrokenAudit {
        async fn record(&self, _record: AuditRecord) -> Result<(), PortError> {
            Err(PortError::Unavailable("audit store down".into()))
        }
    }

    #[tokio::test]
    async fn a_failing_sink_does_not_stop_the_others() {
        let notifications = Arc::new(RecordingNotificationSink::new());
        let bus: Arc<InMemoryEventBus<EventEnvelope<RelationshipEvent>>> =
            Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let dispatcher = EffectDispatcher::new(Arc::new(BrokenAudit), notifications.clone(), bus);

        let invoice_id = InvoiceId::generate();
        let (buyer, seller) = (EntityId::new(), EntityId::new());
        let mut effects = Effects::new();
        effects.notify(Notification::new(
            Recipient::seller(seller),
            NotificationKind::OfferReceived,
            "New offer",
            "A buyer made an offer",
            invoice_id,
            Subject::Invoice(invoice_id),
            Utc::now(),
        ));
        effects.relate(RelationshipEvent::BuyerSellerLinked {
            buyer,
            seller,
            invoice_id,
            occurred_at: Utc::now(),
        });

        dispatcher.dispatch(effects).await;

        assert_eq!(notifications.sent().len(), 1);
        let published = subscription.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject_id(), invoice_id.as_uuid());
    }
}
