//! Relationship tracking, driven by [`RelationshipEvent`]s published after
//! workflow commits.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use scf_core::EntityId;
use scf_events::{EventBus, EventEnvelope, Projection, Subscription};
use scf_financing::{InvoiceId, RelationshipEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    BuyerSeller,
    FinancierSeller,
}

/// A counterparty of `seller`, with the invoices that connect them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Buyer or financier, depending on `kind`.
    pub counterparty: EntityId,
    pub seller: EntityId,
    pub invoices: BTreeSet<InvoiceId>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

type Key = (RelationshipKind, EntityId, EntityId);

/// Read model of buyer↔seller and financier↔seller relationships.
#[derive(Debug, Default)]
pub struct RelationshipTracker {
    relationships: HashMap<Key, Relationship>,
    applied: HashSet<Uuid>,
}

impl RelationshipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: RelationshipKind, counterparty: EntityId, seller: EntityId) -> Option<&Relationship> {
        self.relationships.get(&(kind, counterparty, seller))
    }

    /// Every relationship `entity_id` takes part in, oldest first.
    pub fn relationships_of(&self, entity_id: EntityId) -> Vec<Relationship> {
        let mut found: Vec<Relationship> = self
            .relationships
            .values()
            .filter(|r| r.counterparty == entity_id || r.seller == entity_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.first_seen, r.kind));
        found
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }
}

impl Projection for RelationshipTracker {
    type Ev = RelationshipEvent;

    fn apply(&mut self, envelope: &EventEnvelope<RelationshipEvent>) {
        if !self.applied.insert(envelope.event_id()) {
            return;
        }

        let (kind, counterparty, seller, invoice_id, at) = match *envelope.payload() {
            RelationshipEvent::BuyerSellerLinked {
                buyer,
                seller,
                invoice_id,
                occurred_at,
            } => (RelationshipKind::BuyerSeller, buyer, seller, invoice_id, occurred_at),
            RelationshipEvent::FinancierSellerEngaged {
                financier,
                seller,
                invoice_id,
                occurred_at,
            } => (RelationshipKind::FinancierSeller, financier, seller, invoice_id, occurred_at),
        };

        let entry = self
            .relationships
            .entry((kind, counterparty, seller))
            .or_insert_with(|| Relationship {
                kind,
                counterparty,
                seller,
                invoices: BTreeSet::new(),
                first_seen: at,
                last_seen: at,
            });
        entry.invoices.insert(invoice_id);
        entry.first_seen = entry.first_seen.min(at);
        entry.last_seen = entry.last_seen.max(at);
        debug!(?kind, %counterparty, %seller, %invoice_id, "relationship recorded");
    }
}

pub type SharedRelationshipTracker = Arc<RwLock<RelationshipTracker>>;

/// Handle to stop and join the relationship worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Feeds the tracker from a bus subscription on a dedicated thread.
pub struct RelationshipWorker;

impl RelationshipWorker {
    pub fn spawn<B>(bus: &B, tracker: SharedRelationshipTracker) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<RelationshipEvent>> + ?Sized,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription = bus.subscribe();

        let join = thread::Builder::new()
            .name("relationship-tracker".to_string())
            .spawn(move || worker_loop(subscription, shutdown_rx, tracker))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop(
    subscription: Subscription<EventEnvelope<RelationshipEvent>>,
    shutdown_rx: mpsc::Receiver<()>,
    tracker: SharedRelationshipTracker,
) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(envelope) => match tracker.write() {
                Ok(mut tracker) => tracker.apply(&envelope),
                Err(_) => {
                    warn!(event_id = %envelope.event_id(), "relationship tracker lock poisoned; stopping");
                    break;
                }
            },
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
