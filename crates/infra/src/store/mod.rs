//! Transactional persistence for workflow records.
//!
//! Every workflow operation runs inside one [`StoreTx`]:
//!
//! ```text
//! begin() ─→ locking reads ─→ domain transition ─→ insert/update ─→ commit()
//!                                    │
//!                                    └─ any error: drop the tx (rollback)
//! ```
//!
//! Reads inside a transaction are *locking* reads: once a record has been read
//! no other transaction can change it until this one ends, so preconditions
//! checked after the read still hold at commit.
//!
//! Backends also enforce the uniqueness invariants themselves (one active offer
//! per invoice, one accepted bid per invoice, one disbursement per invoice, one
//! repayment per disbursement, one contract per offer or bid) and report a
//! violation as [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use scf_core::EntityId;
use scf_financing::{
    Bid, BidId, Contract, ContractId, Disbursement, DisbursementId, DiscountOffer, Invoice,
    InvoiceId, InvoiceStatus, OfferId, Repayment, RepaymentId,
};

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryWorkflowStore;
#[cfg(feature = "postgres")]
pub use postgres::{PgContractNumbering, PgWorkflowStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness invariant or lock acquisition failed; a concurrent writer won.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// An update targeted a record that does not exist.
    #[error("record missing: {0}")]
    Missing(String),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Filter for invoice listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceQuery {
    /// Only invoices where this entity is buyer or seller.
    pub party: Option<EntityId>,
    pub status: Option<InvoiceStatus>,
    /// Only invoices this financier has bid on.
    pub bid_by: Option<EntityId>,
}

impl InvoiceQuery {
    pub fn for_party(entity_id: EntityId) -> Self {
        Self {
            party: Some(entity_id),
            ..Self::default()
        }
    }

    pub fn with_status(status: InvoiceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn bid_on_by(financier: EntityId) -> Self {
        Self {
            bid_by: Some(financier),
            ..Self::default()
        }
    }
}

/// One all-or-nothing unit of work. Dropping it without [`StoreTx::commit`]
/// rolls everything back.
#[async_trait]
pub trait StoreTx: Send {
    async fn invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;
    async fn invoices(&mut self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError>;
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;
    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;
    async fn delete_invoice(&mut self, id: InvoiceId) -> Result<(), StoreError>;

    async fn offer(&mut self, id: OfferId) -> Result<Option<DiscountOffer>, StoreError>;
    /// The non-cancelled offer on an invoice, if any.
    async fn active_offer_for_invoice(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<DiscountOffer>, StoreError>;
    async fn insert_offer(&mut self, offer: &DiscountOffer) -> Result<(), StoreError>;
    async fn update_offer(&mut self, offer: &DiscountOffer) -> Result<(), StoreError>;
    /// Ids of `PENDING` offers whose `expires_at` is before `now`.
    async fn expired_offer_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<OfferId>, StoreError>;

    async fn bid(&mut self, id: BidId) -> Result<Option<Bid>, StoreError>;
    async fn bids_for_invoice(&mut self, invoice_id: InvoiceId) -> Result<Vec<Bid>, StoreError>;
    async fn insert_bid(&mut self, bid: &Bid) -> Result<(), StoreError>;
    async fn update_bid(&mut self, bid: &Bid) -> Result<(), StoreError>;
    /// Ids of `PENDING` bids whose `valid_until` is before `now`.
    async fn expired_bid_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<BidId>, StoreError>;

    async fn disbursement(&mut self, id: DisbursementId) -> Result<Option<Disbursement>, StoreError>;
    async fn disbursement_for_invoice(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<Disbursement>, StoreError>;
    async fn insert_disbursement(&mut self, disbursement: &Disbursement) -> Result<(), StoreError>;
    async fn update_disbursement(&mut self, disbursement: &Disbursement) -> Result<(), StoreError>;

    async fn repayment(&mut self, id: RepaymentId) -> Result<Option<Repayment>, StoreError>;
    async fn repayment_for_disbursement(
        &mut self,
        disbursement_id: DisbursementId,
    ) -> Result<Option<Repayment>, StoreError>;
    async fn insert_repayment(&mut self, repayment: &Repayment) -> Result<(), StoreError>;
    async fn update_repayment(&mut self, repayment: &Repayment) -> Result<(), StoreError>;
    /// Ids of `PENDING` repayments whose `due_date` is before `now`.
    async fn overdue_repayment_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<RepaymentId>, StoreError>;

    async fn contract(&mut self, id: ContractId) -> Result<Option<Contract>, StoreError>;
    /// The two-party contract generated for an offer, if any.
    async fn contract_for_offer(&mut self, offer_id: OfferId) -> Result<Option<Contract>, StoreError>;
    async fn contract_for_bid(&mut self, bid_id: BidId) -> Result<Option<Contract>, StoreError>;
    async fn insert_contract(&mut self, contract: &Contract) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of transactions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
impl<S> WorkflowStore for std::sync::Arc<S>
where
    S: WorkflowStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        (**self).begin().await
    }
}
