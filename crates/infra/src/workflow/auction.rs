//! Financier bidding on invoices open for financier-funded discounting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use scf_financing::{
    Actor, AuditChange, AuditRecord, Bid, BidId, BidStatus, BidTerms, Invoice, InvoiceId,
    InvoiceStatus, Notification, NotificationKind, Recipient, RelationshipEvent, Subject,
};

use super::{
    ContractOutbox, ContractOutcome, WorkflowContext, audit_invoice_status, load_invoice,
    notify_party,
};
use crate::effects::Effects;
use crate::error::{WorkflowError, WorkflowResult};
use crate::jobs::ContractTarget;
use crate::ports::KycStatus;
use crate::store::{InvoiceQuery, StoreTx};
use crate::sweeps::SweepReport;

/// Result of resolving an auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BidAcceptance {
    pub bid: Bid,
    pub invoice: Invoice,
    /// Pending bids rejected in the same transaction.
    pub rejected: Vec<BidId>,
    pub contract: ContractOutcome,
}

#[derive(Clone)]
pub struct BiddingAuction {
    ctx: Arc<WorkflowContext>,
    outbox: ContractOutbox,
}

async fn load_bid(tx: &mut Box<dyn StoreTx>, id: BidId) -> WorkflowResult<Bid> {
    tx.bid(id).await?.ok_or_else(|| WorkflowError::not_found("bid", id))
}

fn audit_bid_status(
    effects: &mut Effects,
    actor: Option<&Actor>,
    action: &str,
    bid: &Bid,
    from: BidStatus,
    now: DateTime<Utc>,
) {
    effects.audit(AuditRecord::new(
        actor.map(Actor::user_id),
        action,
        bid,
        AuditChange::BidStatus {
            from,
            to: bid.status(),
        },
        now,
    ));
}

fn notify_financier(
    effects: &mut Effects,
    bid: &Bid,
    kind: NotificationKind,
    title: &str,
    message: String,
    now: DateTime<Utc>,
) {
    effects.notify(Notification::new(
        Recipient::financier(bid.financier),
        kind,
        title,
        message,
        bid.invoice_id,
        Subject::Bid(bid.id),
        now,
    ));
}

impl BiddingAuction {
    pub fn new(ctx: Arc<WorkflowContext>, outbox: ContractOutbox) -> Self {
        Self { ctx, outbox }
    }

    /// Invoices open for bidding whose seller passed KYC. A KYC lookup
    /// failure hides the invoice rather than failing the listing.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn marketplace(&self, actor: &Actor) -> WorkflowResult<Vec<Invoice>> {
        actor.require_financier()?;

        let open = {
            let mut tx = self.ctx.store.begin().await?;
            tx.invoices(&InvoiceQuery::with_status(InvoiceStatus::OpenForBidding))
                .await?
        };

        let mut listed = Vec::with_capacity(open.len());
        for invoice in open {
            let Some(seller) = invoice.seller() else {
                continue;
            };
            match self.ctx.kyc.status(seller).await {
                Ok(KycStatus::Verified) => listed.push(invoice),
                Ok(status) => debug!(invoice_id = %invoice.id, ?status, "seller not verified; hidden"),
                Err(err) => warn!(invoice_id = %invoice.id, error = %err, "KYC lookup failed; hidden"),
            }
        }
        Ok(listed)
    }

    #[instrument(skip(self, actor, terms), fields(user_id = %actor.user_id()), err)]
    pub async fn place_bid(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        terms: BidTerms,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Bid> {
        let financier = *actor.require_financier()?;

        let mut tx = self.ctx.store.begin().await?;
        let invoice = load_invoice(&mut tx, invoice_id).await?;
        let duplicate = tx
            .bids_for_invoice(invoice_id)
            .await?
            .into_iter()
            .find(|b| b.financier == financier.entity_id && b.status() == BidStatus::Pending);
        if let Some(existing) = duplicate {
            return Err(WorkflowError::Conflict(format!(
                "financier already has pending bid {} on invoice {invoice_id}",
                existing.id
            )));
        }

        let bid = Bid::place(BidId::generate(), &invoice, &financier, terms, now)?;
        tx.insert_bid(&bid).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "bid.place",
            &bid,
            AuditChange::Created,
            now,
        ));
        notify_party(
            &mut effects,
            &invoice,
            invoice.product_type.bid_acceptor(),
            NotificationKind::BidPlaced,
            "New bid",
            format!(
                "A financier bid on invoice {}: {} {} net",
                invoice.invoice_number, bid.net_amount, invoice.currency
            ),
            Subject::Bid(bid.id),
            now,
        );
        if let Some(seller) = invoice.seller() {
            effects.relate(RelationshipEvent::FinancierSellerEngaged {
                financier: financier.entity_id,
                seller,
                invoice_id,
                occurred_at: now,
            });
        }
        self.ctx.effects.dispatch(effects).await;

        info!(bid_id = %bid.id, %invoice_id, net_amount = %bid.net_amount, days_early = bid.days_early, "bid placed");
        Ok(bid)
    }

    /// Parties and admins see every bid; a financier sees only its own.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn list_bids(&self, actor: &Actor, invoice_id: InvoiceId) -> WorkflowResult<Vec<Bid>> {
        let mut tx = self.ctx.store.begin().await?;
        let invoice = load_invoice(&mut tx, invoice_id).await?;
        let bids = tx.bids_for_invoice(invoice_id).await?;

        match actor {
            Actor::Admin { .. } => Ok(bids),
            Actor::Buyer(_) | Actor::Seller(_) if invoice.is_linked_party(actor) => Ok(bids),
            Actor::Financier(p) => Ok(bids.into_iter().filter(|b| b.financier == p.entity_id).collect()),
            Actor::Buyer(_) | Actor::Seller(_) => Err(WorkflowError::not_found("invoice", invoice_id)),
        }
    }

    #[instrument(skip(self, actor, terms), fields(user_id = %actor.user_id()), err)]
    pub async fn update_bid(
        &self,
        actor: &Actor,
        bid_id: BidId,
        terms: BidTerms,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Bid> {
        let financier = *actor.require_financier()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut bid = load_bid(&mut tx, bid_id).await?;
        bid.ensure_owner(&financier)?;
        let invoice = load_invoice(&mut tx, bid.invoice_id).await?;

        let from_net = bid.net_amount;
        bid.update(&invoice, terms, now)?;
        tx.update_bid(&bid).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "bid.update",
            &bid,
            AuditChange::BidRepriced {
                from_net,
                to_net: bid.net_amount,
            },
            now,
        ));
        self.ctx.effects.dispatch(effects).await;
        Ok(bid)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn withdraw_bid(&self, actor: &Actor, bid_id: BidId, now: DateTime<Utc>) -> WorkflowResult<Bid> {
        let financier = *actor.require_financier()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut bid = load_bid(&mut tx, bid_id).await?;
        bid.ensure_owner(&financier)?;

        let from = bid.status();
        bid.withdraw(now)?;
        tx.update_bid(&bid).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_bid_status(&mut effects, Some(actor), "bid.withdraw", &bid, from, now);
        self.ctx.effects.dispatch(effects).await;
        Ok(bid)
    }

    /// Resolve the auction: the chosen bid is accepted, every other pending
    /// bid rejected and the invoice moved to BID_SELECTED, all in one
    /// transaction. The three-party contract follows after commit.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn accept_bid(
        &self,
        actor: &Actor,
        bid_id: BidId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<BidAcceptance> {
        let mut tx = self.ctx.store.begin().await?;
        let mut bid = load_bid(&mut tx, bid_id).await?;
        let mut invoice = load_invoice(&mut tx, bid.invoice_id).await?;

        invoice.ensure_linked(actor, invoice.product_type.bid_acceptor())?;
        if invoice.status() != InvoiceStatus::OpenForBidding {
            return Err(WorkflowError::Conflict(format!(
                "invoice {} is {}, bidding has closed",
                invoice.id,
                invoice.status()
            )));
        }

        let mut effects = Effects::new();
        let from = bid.status();
        bid.accept(now)?;
        audit_bid_status(&mut effects, Some(actor), "bid.accept", &bid, from, now);

        let mut rejected = Vec::new();
        for mut other in tx.bids_for_invoice(invoice.id).await? {
            if other.id == bid.id {
                continue;
            }
            let other_from = other.status();
            if other.reject(now) {
                tx.update_bid(&other).await?;
                audit_bid_status(&mut effects, Some(actor), "bid.reject", &other, other_from, now);
                notify_financier(
                    &mut effects,
                    &other,
                    NotificationKind::BidRejected,
                    "Bid not selected",
                    format!("Another bid was selected for invoice {}", invoice.invoice_number),
                    now,
                );
                rejected.push(other.id);
            }
        }

        let invoice_from = invoice.transition_to(InvoiceStatus::BidSelected, now)?;
        tx.update_bid(&bid).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        audit_invoice_status(&mut effects, Some(actor), "bid.accept", &invoice, invoice_from, now);
        notify_financier(
            &mut effects,
            &bid,
            NotificationKind::BidAccepted,
            "Bid accepted",
            format!(
                "Your bid on invoice {} was accepted; disburse {} {} to the seller",
                invoice.invoice_number, bid.net_amount, invoice.currency
            ),
            now,
        );
        notify_party(
            &mut effects,
            &invoice,
            invoice.product_type.bid_acceptor().opposite(),
            NotificationKind::BidAccepted,
            "Financier selected",
            format!("A financier was selected for invoice {}", invoice.invoice_number),
            Subject::Bid(bid.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;

        let contract = self
            .outbox
            .generate_or_defer(ContractTarget::AcceptedBid { bid_id }, now)
            .await;
        info!(%bid_id, invoice_id = %invoice.id, rejected = rejected.len(), ?contract, "bid accepted");
        Ok(BidAcceptance {
            bid,
            invoice,
            rejected,
            contract,
        })
    }

    /// Expire PENDING bids past `valid_until`.
    #[instrument(skip(self))]
    pub async fn sweep_expired_bids(&self, now: DateTime<Utc>) -> WorkflowResult<SweepReport> {
        let candidates = {
            let mut tx = self.ctx.store.begin().await?;
            tx.expired_bid_ids(now).await?
        };

        let mut report = SweepReport::default();
        for bid_id in candidates {
            report.examined += 1;
            match self.expire_bid(bid_id, now).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(err) => warn!(%bid_id, error = %err, "bid expiry failed; will retry next sweep"),
            }
        }

        if report.updated > 0 {
            info!(examined = report.examined, updated = report.updated, "expired bids");
        }
        Ok(report)
    }

    async fn expire_bid(&self, bid_id: BidId, now: DateTime<Utc>) -> WorkflowResult<bool> {
        let mut tx = self.ctx.store.begin().await?;
        let mut bid = load_bid(&mut tx, bid_id).await?;
        let from = bid.status();
        if !bid.expire(now) {
            return Ok(false);
        }
        tx.update_bid(&bid).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_bid_status(&mut effects, None, "bid.expire", &bid, from, now);
        self.ctx.effects.dispatch(effects).await;
        Ok(true)
    }
}
