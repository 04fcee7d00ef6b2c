//! In-memory [`WorkflowStore`].
//!
//! One `tokio` mutex guards all tables; a transaction holds the guard for its
//! whole lifetime and works on a private copy that replaces the tables on
//! commit. Transactions are therefore fully serialized, which trivially gives
//! locking-read semantics. Intended for tests and single-node development.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use scf_core::{Entity, EntityId};
use scf_financing::{
    Bid, BidId, BidStatus, Contract, ContractId, ContractType, Disbursement, DisbursementId,
    DiscountOffer, Invoice, InvoiceId, OfferId, Repayment, RepaymentId,
};

use super::{InvoiceQuery, StoreError, StoreTx, WorkflowStore};

#[derive(Debug, Clone, Default)]
struct Tables {
    invoices: HashMap<InvoiceId, Invoice>,
    offers: HashMap<OfferId, DiscountOffer>,
    bids: HashMap<BidId, Bid>,
    disbursements: HashMap<DisbursementId, Disbursement>,
    repayments: HashMap<RepaymentId, Repayment>,
    contracts: HashMap<ContractId, Contract>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

fn insert_row<E>(table: &mut HashMap<E::Id, E>, row: &E) -> Result<(), StoreError>
where
    E: Entity + Clone,
    E::Id: Hash + Copy + core::fmt::Display,
{
    let id = *row.id();
    if table.contains_key(&id) {
        return Err(StoreError::Conflict(format!("{} {id} already exists", E::KIND)));
    }
    table.insert(id, row.clone());
    Ok(())
}

fn update_row<E>(table: &mut HashMap<E::Id, E>, row: &E) -> Result<(), StoreError>
where
    E: Entity + Clone,
    E::Id: Hash + Copy + core::fmt::Display,
{
    let id = *row.id();
    match table.get_mut(&id) {
        Some(slot) => {
            *slot = row.clone();
            Ok(())
        }
        None => Err(StoreError::Missing(format!("{} {id}", E::KIND))),
    }
}

fn sorted<E, K>(rows: impl Iterator<Item = E>, key: impl Fn(&E) -> K) -> Vec<E>
where
    K: Ord,
{
    let mut rows: Vec<E> = rows.collect();
    rows.sort_by_key(key);
    rows
}

fn is_party(invoice: &Invoice, entity_id: EntityId) -> bool {
    invoice.buyer() == Some(entity_id) || invoice.seller() == Some(entity_id)
}

impl InMemoryTx {
    fn ensure_single_active_offer(&self, offer: &DiscountOffer) -> Result<(), StoreError> {
        if !offer.is_active() {
            return Ok(());
        }
        let clash = self.working.offers.values().any(|other| {
            other.id != offer.id && other.invoice_id == offer.invoice_id && other.is_active()
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "invoice {} already has an active offer",
                offer.invoice_id
            )));
        }
        Ok(())
    }

    fn ensure_single_accepted_bid(&self, bid: &Bid) -> Result<(), StoreError> {
        if bid.status() != BidStatus::Accepted {
            return Ok(());
        }
        let clash = self.working.bids.values().any(|other| {
            other.id != bid.id
                && other.invoice_id == bid.invoice_id
                && other.status() == BidStatus::Accepted
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "invoice {} already has an accepted bid",
                bid.invoice_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.working.invoices.get(&id).cloned())
    }

    async fn invoices(&mut self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError> {
        let bid_on: Option<Vec<InvoiceId>> = query.bid_by.map(|financier| {
            self.working
                .bids
                .values()
                .filter(|b| b.financier == financier)
                .map(|b| b.invoice_id)
                .collect()
        });

        let rows = self.working.invoices.values().filter(|invoice| {
            query.party.is_none_or(|entity_id| is_party(invoice, entity_id))
                && query.status.is_none_or(|status| invoice.status() == status)
                && bid_on.as_ref().is_none_or(|ids| ids.contains(&invoice.id))
        });
        Ok(sorted(rows.cloned(), |i| (i.created_at, i.id)))
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        insert_row(&mut self.working.invoices, invoice)
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        update_row(&mut self.working.invoices, invoice)
    }

    async fn delete_invoice(&mut self, id: InvoiceId) -> Result<(), StoreError> {
        self.working
            .invoices
            .remove(&id)
            .ok_or_else(|| StoreError::Missing(format!("invoice {id}")))?;
        self.working.offers.retain(|_, offer| offer.invoice_id != id);
        Ok(())
    }

    async fn offer(&mut self, id: OfferId) -> Result<Option<DiscountOffer>, StoreError> {
        Ok(self.working.offers.get(&id).cloned())
    }

    async fn active_offer_for_invoice(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<DiscountOffer>, StoreError> {
        Ok(self
            .working
            .offers
            .values()
            .find(|o| o.invoice_id == invoice_id && o.is_active())
            .cloned())
    }

    async fn insert_offer(&mut self, offer: &DiscountOffer) -> Result<(), StoreError> {
        self.ensure_single_active_offer(offer)?;
        insert_row(&mut self.working.offers, offer)
    }

    async fn update_offer(&mut self, offer: &DiscountOffer) -> Result<(), StoreError> {
        self.ensure_single_active_offer(offer)?;
        update_row(&mut self.working.offers, offer)
    }

    async fn expired_offer_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<OfferId>, StoreError> {
        let rows = self.working.offers.values().filter(|o| o.is_expired_at(now));
        Ok(sorted(rows, |o| (o.expires_at, o.id)).into_iter().map(|o| o.id).collect())
    }

    async fn bid(&mut self, id: BidId) -> Result<Option<Bid>, StoreError> {
        Ok(self.working.bids.get(&id).cloned())
    }

    async fn bids_for_invoice(&mut self, invoice_id: InvoiceId) -> Result<Vec<Bid>, StoreError> {
        let rows = self.working.bids.values().filter(|b| b.invoice_id == invoice_id);
        Ok(sorted(rows.cloned(), |b| (b.created_at, b.id)))
    }

    async fn insert_bid(&mut self, bid: &Bid) -> Result<(), StoreError> {
        self.ensure_single_accepted_bid(bid)?;
        insert_row(&mut self.working.bids, bid)
    }

    async fn update_bid(&mut self, bid: &Bid) -> Result<(), StoreError> {
        self.ensure_single_accepted_bid(bid)?;
        update_row(&mut self.working.bids, bid)
    }

    async fn expired_bid_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<BidId>, StoreError> {
        let rows = self.working.bids.values().filter(|b| b.is_expired_at(now));
        Ok(sorted(rows, |b| (b.valid_until, b.id)).into_iter().map(|b| b.id).collect())
    }

    async fn disbursement(&mut self, id: DisbursementId) -> Result<Option<Disbursement>, StoreError> {
        Ok(self.working.disbursements.get(&id).cloned())
    }

    async fn disbursement_for_invoice(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<Disbursement>, StoreError> {
        Ok(self
            .working
            .disbursements
            .values()
            .find(|d| d.invoice_id == invoice_id)
            .cloned())
    }

    async fn insert_disbursement(&mut self, disbursement: &Disbursement) -> Result<(), StoreError> {
        let clash = self
            .working
            .disbursements
            .values()
            .any(|d| d.invoice_id == disbursement.invoice_id);
        if clash {
            return Err(StoreError::Conflict(format!(
                "invoice {} already has a disbursement",
                disbursement.invoice_id
            )));
        }
        insert_row(&mut self.working.disbursements, disbursement)
    }

    async fn update_disbursement(&mut self, disbursement: &Disbursement) -> Result<(), StoreError> {
        update_row(&mut self.working.disbursements, disbursement)
    }

    async fn repayment(&mut self, id: RepaymentId) -> Result<Option<Repayment>, StoreError> {
        Ok(self.working.repayments.get(&id).cloned())
    }

    async fn repayment_for_disbursement(
        &mut self,
        disbursement_id: DisbursementId,
    ) -> Result<Option<Repayment>, StoreError> {
        Ok(self
            .working
            .repayments
            .values()
            .find(|r| r.disbursement_id == disbursement_id)
            .cloned())
    }

    async fn insert_repayment(&mut self, repayment: &Repayment) -> Result<(), StoreError> {
        let clash = self
            .working
            .repayments
            .values()
            .any(|r| r.disbursement_id == repayment.disbursement_id);
        if clash {
            return Err(StoreError::Conflict(format!(
                "disbursement {} already has a repayment",
                repayment.disbursement_id
            )));
        }
        insert_row(&mut self.working.repayments, repayment)
    }

    async fn update_repayment(&mut self, repayment: &Repayment) -> Result<(), StoreError> {
        update_row(&mut self.working.repayments, repayment)
    }

    async fn overdue_repayment_ids(&mut self, now: DateTime<Utc>) -> Result<Vec<RepaymentId>, StoreError> {
        let rows = self.working.repayments.values().filter(|r| r.is_overdue_at(now));
        Ok(sorted(rows, |r| (r.due_date, r.id)).into_iter().map(|r| r.id).collect())
    }

    async fn contract(&mut self, id: ContractId) -> Result<Option<Contract>, StoreError> {
        Ok(self.working.contracts.get(&id).cloned())
    }

    async fn contract_for_offer(&mut self, offer_id: OfferId) -> Result<Option<Contract>, StoreError> {
        Ok(self
            .working
            .contracts
            .values()
            .find(|c| c.offer_id == offer_id && c.contract_type() == ContractType::TwoParty)
            .cloned())
    }

    async fn contract_for_bid(&mut self, bid_id: BidId) -> Result<Option<Contract>, StoreError> {
        Ok(self
            .working
            .contracts
            .values()
            .find(|c| c.bid_id == Some(bid_id))
            .cloned())
    }

    async fn insert_contract(&mut self, contract: &Contract) -> Result<(), StoreError> {
        let clash = self.working.contracts.values().any(|c| match contract.bid_id {
            Some(bid_id) => c.bid_id == Some(bid_id),
            None => c.bid_id.is_none() && c.offer_id == contract.offer_id,
        }) || self
            .working
            .contracts
            .values()
            .any(|c| c.contract_number == contract.contract_number);
        if clash {
            return Err(StoreError::Conflict(format!(
                "contract for invoice {} already exists",
                contract.invoice_id
            )));
        }
        insert_row(&mut self.working.contracts, contract)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{gst_invoice, now, seller};
    use scf_financing::{BidTerms, InvoiceStatus};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn bid_on(invoice: &Invoice) -> Bid {
        Bid::place(
            BidId::generate(),
            invoice,
            &crate::test_support::financier(),
            BidTerms {
                discount_rate: dec!(12),
                haircut_percentage: dec!(1),
                processing_fee: dec!(100),
                valid_until: now() + Duration::days(3),
            },
            now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryWorkflowStore::new();
        let invoice = gst_invoice(seller());

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_invoice(&invoice).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.invoice(invoice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_writes_are_visible_to_later_transactions() {
        let store = InMemoryWorkflowStore::new();
        let invoice = gst_invoice(seller());

        let mut tx = store.begin().await.unwrap();
        tx.insert_invoice(&invoice).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let loaded = tx.invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), InvoiceStatus::OpenForBidding);

        let listed = tx
            .invoices(&InvoiceQuery::with_status(InvoiceStatus::OpenForBidding))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn second_accepted_bid_on_an_invoice_conflicts() {
        let store = InMemoryWorkflowStore::new();
        let invoice = gst_invoice(seller());
        let mut first = bid_on(&invoice);
        let mut second = bid_on(&invoice);

        let mut tx = store.begin().await.unwrap();
        tx.insert_invoice(&invoice).await.unwrap();
        tx.insert_bid(&first).await.unwrap();
        tx.insert_bid(&second).await.unwrap();

        first.accept(now()).unwrap();
        tx.update_bid(&first).await.unwrap();

        second.accept(now()).unwrap();
        let err = tx.update_bid(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn updating_a_missing_record_is_reported() {
        let store = InMemoryWorkflowStore::new();
        let invoice = gst_invoice(seller());

        let mut tx = store.begin().await.unwrap();
        let err = tx.update_invoice(&invoice).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }

    #[tokio::test]
    async fn bid_query_lists_only_invoices_the_financier_bid_on() {
        let store = InMemoryWorkflowStore::new();
        let with_bid = gst_invoice(seller());
        let without_bid = gst_invoice(seller());
        let bid = bid_on(&with_bid);

        let mut tx = store.begin().await.unwrap();
        tx.insert_invoice(&with_bid).await.unwrap();
        tx.insert_invoice(&without_bid).await.unwrap();
        tx.insert_bid(&bid).await.unwrap();

        let listed = tx.invoices(&InvoiceQuery::bid_on_by(bid.financier)).await.unwrap();
        assert_eq!(listed.iter().map(|i| i.id).collect::<Vec<_>>(), vec![with_bid.id]);
    }
}
