//! The financing workflow components.
//!
//! Every state-changing operation follows the same shape:
//!
//! ```text
//! begin tx ─→ locking reads ─→ domain transitions ─→ writes ─→ commit ─→ dispatch effects
//! ```
//!
//! Preconditions are evaluated on records read inside the transaction, so a
//! concurrent writer that resolved the same invoice first makes the loser fail
//! with `Conflict` (or the store rejects the write) instead of double-applying.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use scf_events::{EventEnvelope, InMemoryEventBus};
use scf_financing::{
    Actor, AuditChange, AuditRecord, Invoice, InvoiceStatus, Notification, NotificationKind,
    Recipient, RelationshipEvent, Side, Subject,
};

use crate::config::WorkflowConfig;
use crate::effects::{EffectDispatcher, Effects, RelationshipBus};
use crate::error::{WorkflowError, WorkflowResult};
use crate::jobs::{InMemoryJobStore, JobStore};
use crate::ports::{
    BankAccounts, ContractDocumentRenderer, ContractNumbering, InMemoryBankAccounts,
    InMemoryKycDirectory, InMemoryPartyDirectory, KycDirectory, PartyDirectory,
    PlainTextContractRenderer, RecordingAuditSink, RecordingNotificationSink,
    SequentialContractNumbering,
};
use crate::store::{InMemoryWorkflowStore, StoreTx, WorkflowStore};

pub mod auction;
pub mod contracts;
pub mod ledger;
pub mod lifecycle;
pub mod negotiation;

pub use auction::{BidAcceptance, BiddingAuction};
pub use contracts::{ContractGenerator, ContractOutbox, ContractOutcome};
pub use ledger::{DisbursementLedger, DisbursementView, FinancedDisbursement};
pub use lifecycle::InvoiceLifecycleManager;
pub use negotiation::{DiscountNegotiationEngine, OfferResolution, PaymentAuthorization};

/// Everything the components share: the store, configuration and ports.
pub struct WorkflowContext {
    pub store: Arc<dyn WorkflowStore>,
    pub config: WorkflowConfig,
    pub kyc: Arc<dyn KycDirectory>,
    pub bank_accounts: Arc<dyn BankAccounts>,
    pub numbering: Arc<dyn ContractNumbering>,
    pub parties: Arc<dyn PartyDirectory>,
    pub renderer: Arc<dyn ContractDocumentRenderer>,
    pub jobs: Arc<dyn JobStore>,
    pub effects: EffectDispatcher,
}

/// Concrete handles to the adapters behind an in-memory context.
#[derive(Clone)]
pub struct InMemoryAdapters {
    pub store: Arc<InMemoryWorkflowStore>,
    pub kyc: Arc<InMemoryKycDirectory>,
    pub bank_accounts: Arc<InMemoryBankAccounts>,
    pub parties: Arc<InMemoryPartyDirectory>,
    pub audit: Arc<RecordingAuditSink>,
    pub notifications: Arc<RecordingNotificationSink>,
    pub jobs: Arc<InMemoryJobStore>,
    pub relationships: Arc<InMemoryEventBus<EventEnvelope<scf_financing::RelationshipEvent>>>,
}

impl WorkflowContext {
    /// A fully in-process context (tests, local development).
    pub fn in_memory(config: WorkflowConfig) -> (Self, InMemoryAdapters) {
        let adapters = InMemoryAdapters {
            store: Arc::new(InMemoryWorkflowStore::new()),
            kyc: Arc::new(InMemoryKycDirectory::new()),
            bank_accounts: Arc::new(InMemoryBankAccounts::new()),
            parties: Arc::new(InMemoryPartyDirectory::new()),
            audit: Arc::new(RecordingAuditSink::new()),
            notifications: Arc::new(RecordingNotificationSink::new()),
            jobs: Arc::new(InMemoryJobStore::new()),
            relationships: Arc::new(InMemoryEventBus::new()),
        };
        let relationships: Arc<RelationshipBus> = adapters.relationships.clone();

        let context = Self {
            store: adapters.store.clone(),
            config,
            kyc: adapters.kyc.clone(),
            bank_accounts: adapters.bank_accounts.clone(),
            numbering: Arc::new(SequentialContractNumbering::new()),
            parties: adapters.parties.clone(),
            renderer: Arc::new(PlainTextContractRenderer),
            jobs: adapters.jobs.clone(),
            effects: EffectDispatcher::new(
                adapters.audit.clone(),
                adapters.notifications.clone(),
                relationships,
            ),
        };
        (context, adapters)
    }
}

/// The five components wired over one shared context.
#[derive(Clone)]
pub struct FinancingWorkflow {
    pub lifecycle: InvoiceLifecycleManager,
    pub negotiation: DiscountNegotiationEngine,
    pub auction: BiddingAuction,
    pub ledger: DisbursementLedger,
    pub contracts: ContractGenerator,
    pub outbox: ContractOutbox,
}

impl FinancingWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        let ctx = Arc::new(ctx);
        let contracts = ContractGenerator::new(ctx.clone());
        let outbox = ContractOutbox::new(contracts.clone(), ctx.jobs.clone(), ctx.config.contract_retry_policy());

        Self {
            lifecycle: InvoiceLifecycleManager::new(ctx.clone()),
            negotiation: DiscountNegotiationEngine::new(ctx.clone(), outbox.clone()),
            auction: BiddingAuction::new(ctx.clone(), outbox.clone()),
            ledger: DisbursementLedger::new(ctx),
            contracts,
            outbox,
        }
    }
}

pub(crate) async fn load_invoice(
    tx: &mut Box<dyn StoreTx>,
    id: scf_financing::InvoiceId,
) -> WorkflowResult<Invoice> {
    tx.invoice(id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("invoice", id))
}

/// Whether `actor` may see `invoice`. Financiers see invoices on the
/// marketplace and those they have bid on.
pub(crate) fn can_view(actor: &Actor, invoice: &Invoice, has_bid: bool) -> bool {
    match actor {
        Actor::Admin { .. } => true,
        Actor::Buyer(_) | Actor::Seller(_) => invoice.is_linked_party(actor),
        Actor::Financier(_) => has_bid || invoice.status() == InvoiceStatus::OpenForBidding,
    }
}

pub(crate) fn recipient(side: Side, entity_id: scf_core::EntityId) -> Recipient {
    match side {
        Side::Buyer => Recipient::buyer(entity_id),
        Side::Seller => Recipient::seller(entity_id),
    }
}

/// Notification to the linked party on `side`, if any.
#[allow(clippy::too_many_arguments)]
pub(crate) fn notify_party(
    effects: &mut Effects,
    invoice: &Invoice,
    side: Side,
    kind: NotificationKind,
    title: &str,
    message: String,
    subject: Subject,
    now: DateTime<Utc>,
) {
    if let Some(entity_id) = invoice.party(side) {
        effects.notify(Notification::new(
            recipient(side, entity_id),
            kind,
            title,
            message,
            invoice.id,
            subject,
            now,
        ));
    }
}

pub(crate) fn audit_invoice_status(
    effects: &mut Effects,
    actor: Option<&Actor>,
    action: &str,
    invoice: &Invoice,
    from: InvoiceStatus,
    now: DateTime<Utc>,
) {
    if from == invoice.status() {
        return;
    }
    effects.audit(AuditRecord::new(
        actor.map(Actor::user_id),
        action,
        invoice,
        AuditChange::InvoiceStatus {
            from,
            to: invoice.status(),
        },
        now,
    ));
}

pub(crate) fn buyer_seller_linked(invoice: &Invoice, now: DateTime<Utc>) -> Option<RelationshipEvent> {
    match (invoice.buyer(), invoice.seller()) {
        (Some(buyer), Some(seller)) => Some(RelationshipEvent::BuyerSellerLinked {
            buyer,
            seller,
            invoice_id: invoice.id,
            occurred_at: now,
        }),
        _ => None,
    }
}
