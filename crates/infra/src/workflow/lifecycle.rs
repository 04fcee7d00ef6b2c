//! Invoice lifecycle: upload, drafts, counterparty response, bidding, cancel
//! and dispute.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use scf_core::EntityId;
use scf_financing::{
    Actor, AuditChange, AuditRecord, FundingType, Invoice, InvoiceDetails, InvoiceId,
    InvoiceStatus, Notification, NotificationKind, OfferStatus, Recipient, Side, Subject,
    UploadInvoice,
};

use super::{
    WorkflowContext, audit_invoice_status, buyer_seller_linked, can_view, load_invoice,
    notify_party,
};
use crate::effects::Effects;
use crate::error::{WorkflowError, WorkflowResult};
use crate::store::{InvoiceQuery, StoreTx};

#[derive(Clone)]
pub struct InvoiceLifecycleManager {
    ctx: Arc<WorkflowContext>,
}

/// Direct invoice accept/reject is only for invoices without a negotiation.
async fn ensure_no_negotiation(tx: &mut Box<dyn StoreTx>, invoice: &Invoice) -> WorkflowResult<()> {
    match tx.active_offer_for_invoice(invoice.id).await? {
        Some(offer) => Err(WorkflowError::InvalidState(format!(
            "invoice {} is under offer negotiation (offer {} is {}); respond to the offer instead",
            invoice.id,
            offer.id,
            offer.status()
        ))),
        None => Ok(()),
    }
}

impl InvoiceLifecycleManager {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, actor, cmd), fields(user_id = %actor.user_id(), product_type = %cmd.product_type), err)]
    pub async fn upload(
        &self,
        actor: &Actor,
        cmd: UploadInvoice,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let invoice = Invoice::upload(InvoiceId::generate(), actor, cmd, now)?;

        let mut tx = self.ctx.store.begin().await?;
        tx.insert_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "invoice.upload",
            &invoice,
            AuditChange::Created,
            now,
        ));
        if let Some(event) = buyer_seller_linked(&invoice, now) {
            effects.relate(event);
        }
        self.ctx.effects.dispatch(effects).await;

        info!(invoice_id = %invoice.id, status = %invoice.status(), "invoice uploaded");
        Ok(invoice)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn get(&self, actor: &Actor, invoice_id: InvoiceId) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let invoice = load_invoice(&mut tx, invoice_id).await?;
        let has_bid = match actor {
            Actor::Financier(p) => tx
                .bids_for_invoice(invoice_id)
                .await?
                .iter()
                .any(|b| b.financier == p.entity_id),
            _ => false,
        };

        if can_view(actor, &invoice, has_bid) {
            Ok(invoice)
        } else {
            Err(WorkflowError::not_found("invoice", invoice_id))
        }
    }

    /// Invoices visible to the actor, oldest first.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn list(
        &self,
        actor: &Actor,
        status: Option<InvoiceStatus>,
    ) -> WorkflowResult<Vec<Invoice>> {
        let mut query = match actor {
            Actor::Admin { .. } => InvoiceQuery::default(),
            Actor::Buyer(p) | Actor::Seller(p) => InvoiceQuery::for_party(p.entity_id),
            Actor::Financier(p) => InvoiceQuery::bid_on_by(p.entity_id),
        };
        query.status = status;

        let mut tx = self.ctx.store.begin().await?;
        let invoices = tx.invoices(&query).await?;
        Ok(invoices
            .into_iter()
            .filter(|i| can_view(actor, i, matches!(actor, Actor::Financier(_))))
            .collect())
    }

    #[instrument(skip(self, actor, details), fields(user_id = %actor.user_id()), err)]
    pub async fn update_draft(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        details: InvoiceDetails,
        counterparty: Option<EntityId>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;

        invoice.update_draft(actor, details, counterparty, now)?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "invoice.update",
            &invoice,
            AuditChange::Edited,
            now,
        ));
        self.ctx.effects.dispatch(effects).await;
        Ok(invoice)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn delete_draft(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        let mut tx = self.ctx.store.begin().await?;
        let invoice = load_invoice(&mut tx, invoice_id).await?;

        invoice.ensure_deletable(actor)?;
        tx.delete_invoice(invoice_id).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "invoice.delete",
            &invoice,
            AuditChange::Deleted,
            now,
        ));
        self.ctx.effects.dispatch(effects).await;
        Ok(())
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn submit(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;

        let from = invoice.submit(actor, now)?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_invoice_status(&mut effects, Some(actor), "invoice.submit", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            invoice.uploaded_by.side.opposite(),
            NotificationKind::InvoiceSubmitted,
            "Invoice awaiting your acceptance",
            format!("Invoice {} was submitted for your acceptance", invoice.invoice_number),
            Subject::Invoice(invoice.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;
        Ok(invoice)
    }

    /// Counterparty accepts an invoice that has no offer attached.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn accept(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;
        ensure_no_negotiation(&mut tx, &invoice).await?;

        let from = invoice.status();
        let linked = invoice.accept(actor, now)?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        if linked {
            effects.audit(AuditRecord::new(
                Some(actor.user_id()),
                "invoice.link_counterparty",
                &invoice,
                AuditChange::CounterpartyLinked {
                    side: invoice.uploaded_by.side.opposite(),
                },
                now,
            ));
        }
        audit_invoice_status(&mut effects, Some(actor), "invoice.accept", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            invoice.uploaded_by.side,
            NotificationKind::InvoiceAccepted,
            "Invoice accepted",
            format!("Invoice {} was accepted", invoice.invoice_number),
            Subject::Invoice(invoice.id),
            now,
        );
        if let Some(event) = buyer_seller_linked(&invoice, now) {
            effects.relate(event);
        }
        self.ctx.effects.dispatch(effects).await;
        Ok(invoice)
    }

    #[instrument(skip(self, actor, reason), fields(user_id = %actor.user_id()), err)]
    pub async fn reject(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;
        ensure_no_negotiation(&mut tx, &invoice).await?;

        let from = invoice.status();
        invoice.reject(actor, reason, now)?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_invoice_status(&mut effects, Some(actor), "invoice.reject", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            invoice.uploaded_by.side,
            NotificationKind::InvoiceRejected,
            "Invoice rejected",
            format!(
                "Invoice {} was rejected{}",
                invoice.invoice_number,
                invoice
                    .rejection_reason
                    .as_deref()
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default()
            ),
            Subject::Invoice(invoice.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;
        Ok(invoice)
    }

    /// Open an accepted invoice to financiers. An accepted offer without a
    /// funding type is recorded as financier-funded.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn open_for_bidding(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;
        let offer = tx.active_offer_for_invoice(invoice_id).await?;

        let from = invoice.status();
        invoice.open_for_bidding(actor, now)?;

        let mut effects = Effects::new();
        if let Some(mut offer) = offer.filter(|o| o.status() == OfferStatus::Accepted) {
            match offer.funding_type() {
                Some(FundingType::SelfFunded) => {
                    return Err(WorkflowError::InvalidState(format!(
                        "invoice {invoice_id} is self-funded through offer {}",
                        offer.id
                    )));
                }
                Some(FundingType::FinancierFunded) => {}
                None => {
                    offer.select_funding_type(FundingType::FinancierFunded, now)?;
                    tx.update_offer(&offer).await?;
                    effects.audit(AuditRecord::new(
                        Some(actor.user_id()),
                        "offer.funding_type",
                        &offer,
                        AuditChange::FundingTypeSelected {
                            funding_type: FundingType::FinancierFunded,
                        },
                        now,
                    ));
                }
            }
        }
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        audit_invoice_status(&mut effects, Some(actor), "invoice.open_for_bidding", &invoice, from, now);
        let other = actor.side().map(Side::opposite).unwrap_or(Side::Seller);
        notify_party(
            &mut effects,
            &invoice,
            other,
            NotificationKind::InvoiceOpenedForBidding,
            "Invoice open for bidding",
            format!("Invoice {} is now open to financier bids", invoice.invoice_number),
            Subject::Invoice(invoice.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;
        Ok(invoice)
    }

    /// Cancel the invoice, its open offer and all pending bids together.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn cancel(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;

        let from = invoice.cancel(actor, now)?;
        let mut effects = Effects::new();

        if let Some(mut offer) = tx.active_offer_for_invoice(invoice_id).await? {
            let offer_from = offer.status();
            if offer.void(now) {
                tx.update_offer(&offer).await?;
                effects.audit(AuditRecord::new(
                    Some(actor.user_id()),
                    "offer.void",
                    &offer,
                    AuditChange::OfferStatus {
                        from: offer_from,
                        to: offer.status(),
                    },
                    now,
                ));
            }
        }

        for mut bid in tx.bids_for_invoice(invoice_id).await? {
            let bid_from = bid.status();
            if bid.reject(now) {
                tx.update_bid(&bid).await?;
                effects.audit(AuditRecord::new(
                    Some(actor.user_id()),
                    "bid.reject",
                    &bid,
                    AuditChange::BidStatus {
                        from: bid_from,
                        to: bid.status(),
                    },
                    now,
                ));
                effects.notify(Notification::new(
                    Recipient::financier(bid.financier),
                    NotificationKind::BidRejected,
                    "Invoice cancelled",
                    format!("Invoice {} was cancelled; your bid is closed", invoice.invoice_number),
                    invoice.id,
                    Subject::Bid(bid.id),
                    now,
                ));
            }
        }

        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        audit_invoice_status(&mut effects, Some(actor), "invoice.cancel", &invoice, from, now);
        for side in [Side::Buyer, Side::Seller] {
            if actor.side() != Some(side) {
                notify_party(
                    &mut effects,
                    &invoice,
                    side,
                    NotificationKind::InvoiceCancelled,
                    "Invoice cancelled",
                    format!("Invoice {} was cancelled", invoice.invoice_number),
                    Subject::Invoice(invoice.id),
                    now,
                );
            }
        }
        self.ctx.effects.dispatch(effects).await;
        Ok(invoice)
    }

    #[instrument(skip(self, actor, reason), fields(user_id = %actor.user_id()), err)]
    pub async fn dispute(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        reason: String,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Invoice> {
        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;

        let from = invoice.dispute(actor, reason, now)?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_invoice_status(&mut effects, Some(actor), "invoice.dispute", &invoice, from, now);
        for side in [Side::Buyer, Side::Seller] {
            if actor.side() != Some(side) {
                notify_party(
                    &mut effects,
                    &invoice,
                    side,
                    NotificationKind::InvoiceDisputed,
                    "Invoice disputed",
                    format!("Invoice {} is under dispute", invoice.invoice_number),
                    Subject::Invoice(invoice.id),
                    now,
                );
            }
        }
        self.ctx.effects.dispatch(effects).await;
        Ok(invoice)
    }
}
