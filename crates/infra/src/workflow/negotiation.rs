//! Buyer discount offers: creation, seller response, revision, funding-type
//! choice, self-funded payment authorisation and expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use scf_financing::{
    Actor, AuditChange, AuditRecord, BankAccountId, Disbursement, DisbursementId, DiscountOffer,
    FundingType, Invoice, InvoiceId, InvoiceStatus, NotificationKind, OfferId, OfferResponse,
    OfferStatus, OfferTerms, ResponseOutcome, Side, Subject,
};

use super::{
    ContractOutbox, ContractOutcome, WorkflowContext, audit_invoice_status, buyer_seller_linked,
    can_view, load_invoice, notify_party,
};
use crate::effects::Effects;
use crate::error::{WorkflowError, WorkflowResult};
use crate::jobs::ContractTarget;
use crate::store::StoreTx;
use crate::sweeps::SweepReport;

/// An offer together with the invoice it moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferResolution {
    pub offer: DiscountOffer,
    pub invoice: Invoice,
}

/// Result of authorising a self-funded payment. The disbursement is committed
/// whatever happened to the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentAuthorization {
    pub disbursement: Disbursement,
    pub contract: ContractOutcome,
}

#[derive(Clone)]
pub struct DiscountNegotiationEngine {
    ctx: Arc<WorkflowContext>,
    outbox: ContractOutbox,
}

async fn load_offer(tx: &mut Box<dyn StoreTx>, id: OfferId) -> WorkflowResult<DiscountOffer> {
    tx.offer(id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("offer", id))
}

fn audit_offer_status(
    effects: &mut Effects,
    actor: Option<&Actor>,
    action: &str,
    offer: &DiscountOffer,
    from: OfferStatus,
    now: DateTime<Utc>,
) {
    effects.audit(AuditRecord::new(
        actor.map(Actor::user_id),
        action,
        offer,
        AuditChange::OfferStatus {
            from,
            to: offer.status(),
        },
        now,
    ));
}

fn audit_link(effects: &mut Effects, actor: &Actor, invoice: &Invoice, side: Side, now: DateTime<Utc>) {
    effects.audit(AuditRecord::new(
        Some(actor.user_id()),
        "invoice.link_counterparty",
        invoice,
        AuditChange::CounterpartyLinked { side },
        now,
    ));
    if let Some(event) = buyer_seller_linked(invoice, now) {
        effects.relate(event);
    }
}

/// Move the invoice only when the target differs from where it already is.
fn move_invoice(invoice: &mut Invoice, next: InvoiceStatus, now: DateTime<Utc>) -> WorkflowResult<InvoiceStatus> {
    if invoice.status() == next {
        return Ok(next);
    }
    Ok(invoice.transition_to(next, now)?)
}

impl DiscountNegotiationEngine {
    pub fn new(ctx: Arc<WorkflowContext>, outbox: ContractOutbox) -> Self {
        Self { ctx, outbox }
    }

    /// Buyer offer on a DRAFT or PENDING_ACCEPTANCE invoice. Links the buyer
    /// if the invoice has none yet.
    #[instrument(skip(self, actor, terms), fields(user_id = %actor.user_id()), err)]
    pub async fn create_offer(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
        terms: OfferTerms,
        funding_type: Option<FundingType>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<OfferResolution> {
        let buyer = *actor.require_buyer()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut invoice = load_invoice(&mut tx, invoice_id).await?;
        if let Some(existing) = tx.active_offer_for_invoice(invoice_id).await? {
            return Err(WorkflowError::Conflict(format!(
                "invoice {invoice_id} already has offer {} ({})",
                existing.id,
                existing.status()
            )));
        }

        let linked = invoice.link_party(Side::Buyer, buyer.entity_id)?;
        let offer = DiscountOffer::create(
            OfferId::generate(),
            &invoice,
            &buyer,
            terms,
            funding_type,
            self.ctx.config.offer_ttl(),
            now,
        )?;
        let from = move_invoice(&mut invoice, InvoiceStatus::PendingAcceptance, now)?;

        tx.insert_offer(&offer).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "offer.create",
            &offer,
            AuditChange::Created,
            now,
        ));
        if linked {
            audit_link(&mut effects, actor, &invoice, Side::Buyer, now);
        }
        audit_invoice_status(&mut effects, Some(actor), "offer.create", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            Side::Seller,
            NotificationKind::OfferReceived,
            "Discount offer received",
            format!(
                "A {}% discount offer was made on invoice {} for early payment on {}",
                offer.discount_percentage,
                invoice.invoice_number,
                offer.early_payment_date.format("%Y-%m-%d")
            ),
            Subject::Offer(offer.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;

        info!(offer_id = %offer.id, %invoice_id, discounted_amount = %offer.discounted_amount, "offer created");
        Ok(OfferResolution { offer, invoice })
    }

    /// Seller response. Offer and invoice move together or not at all.
    #[instrument(skip(self, actor, reason), fields(user_id = %actor.user_id()), err)]
    pub async fn respond(
        &self,
        actor: &Actor,
        offer_id: OfferId,
        response: OfferResponse,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<OfferResolution> {
        let seller = *actor.require_seller()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut offer = load_offer(&mut tx, offer_id).await?;
        let mut invoice = load_invoice(&mut tx, offer.invoice_id).await?;

        let linked = invoice.link_party(Side::Seller, seller.entity_id)?;
        if invoice.status() != InvoiceStatus::PendingAcceptance {
            return Err(WorkflowError::Conflict(format!(
                "invoice {} is {}, no longer awaiting a response",
                invoice.id,
                invoice.status()
            )));
        }

        let offer_from = offer.status();
        let outcome = offer.respond(response, reason, now)?;
        let from = move_invoice(&mut invoice, outcome.invoice_status(), now)?;

        tx.update_offer(&offer).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        if linked {
            audit_link(&mut effects, actor, &invoice, Side::Seller, now);
        }
        audit_offer_status(&mut effects, Some(actor), "offer.respond", &offer, offer_from, now);
        audit_invoice_status(&mut effects, Some(actor), "offer.respond", &invoice, from, now);
        let (kind, title, message) = match outcome {
            ResponseOutcome::Accepted => (
                NotificationKind::OfferAccepted,
                "Offer accepted",
                format!("Your offer on invoice {} was accepted", invoice.invoice_number),
            ),
            ResponseOutcome::RejectedRevisable => (
                NotificationKind::OfferRejected,
                "Offer rejected",
                format!(
                    "Your offer on invoice {} was rejected; {} revision(s) left",
                    invoice.invoice_number,
                    offer.revisions_left()
                ),
            ),
            ResponseOutcome::RejectedFinal => (
                NotificationKind::OfferRejected,
                "Offer rejected",
                format!(
                    "Your final offer on invoice {} was rejected; the invoice is closed",
                    invoice.invoice_number
                ),
            ),
        };
        notify_party(&mut effects, &invoice, Side::Buyer, kind, title, message, Subject::Offer(offer.id), now);
        self.ctx.effects.dispatch(effects).await;

        info!(%offer_id, outcome = ?outcome, invoice_status = %invoice.status(), "offer resolved");
        Ok(OfferResolution { offer, invoice })
    }

    /// New terms after a rejection or expiry.
    #[instrument(skip(self, actor, terms), fields(user_id = %actor.user_id()), err)]
    pub async fn revise_offer(
        &self,
        actor: &Actor,
        offer_id: OfferId,
        terms: OfferTerms,
        now: DateTime<Utc>,
    ) -> WorkflowResult<OfferResolution> {
        let buyer = *actor.require_buyer()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut offer = load_offer(&mut tx, offer_id).await?;
        offer.ensure_owner(&buyer)?;
        let mut invoice = load_invoice(&mut tx, offer.invoice_id).await?;

        let from_amount = offer.discounted_amount;
        offer.revise(&invoice, terms, self.ctx.config.offer_ttl(), now)?;
        let from = move_invoice(&mut invoice, InvoiceStatus::PendingAcceptance, now)?;

        tx.update_offer(&offer).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "offer.revise",
            &offer,
            AuditChange::OfferRevised {
                revision: offer.revision_count(),
                from_amount,
                to_amount: offer.discounted_amount,
            },
            now,
        ));
        audit_invoice_status(&mut effects, Some(actor), "offer.revise", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            Side::Seller,
            NotificationKind::OfferRevised,
            "Offer revised",
            format!(
                "The offer on invoice {} was revised to {}% (revision {})",
                invoice.invoice_number,
                offer.discount_percentage,
                offer.revision_count()
            ),
            Subject::Offer(offer.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;
        Ok(OfferResolution { offer, invoice })
    }

    /// Record how an accepted offer is funded. Financier funding opens the
    /// invoice for bidding.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn select_funding_type(
        &self,
        actor: &Actor,
        offer_id: OfferId,
        funding_type: FundingType,
        now: DateTime<Utc>,
    ) -> WorkflowResult<OfferResolution> {
        let side = match actor {
            Actor::Buyer(_) => Side::Buyer,
            Actor::Seller(_) => Side::Seller,
            Actor::Financier(_) | Actor::Admin { .. } => {
                return Err(WorkflowError::Forbidden(
                    "only the buyer or seller of the invoice may choose its funding".into(),
                ));
            }
        };

        let mut tx = self.ctx.store.begin().await?;
        let mut offer = load_offer(&mut tx, offer_id).await?;
        let mut invoice = load_invoice(&mut tx, offer.invoice_id).await?;
        invoice.ensure_linked(actor, side)?;
        invoice.ensure_status(&[InvoiceStatus::Accepted], "choose funding for")?;

        let previously = offer.funding_type();
        offer.select_funding_type(funding_type, now)?;
        let from = match funding_type {
            FundingType::FinancierFunded => invoice.transition_to(InvoiceStatus::OpenForBidding, now)?,
            FundingType::SelfFunded => invoice.status(),
        };

        tx.update_offer(&offer).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        if previously.is_none() {
            effects.audit(AuditRecord::new(
                Some(actor.user_id()),
                "offer.funding_type",
                &offer,
                AuditChange::FundingTypeSelected { funding_type },
                now,
            ));
        }
        audit_invoice_status(&mut effects, Some(actor), "offer.funding_type", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            side.opposite(),
            NotificationKind::FundingTypeSelected,
            "Funding type selected",
            format!(
                "Invoice {} will be {}",
                invoice.invoice_number,
                match funding_type {
                    FundingType::SelfFunded => "paid early by the buyer",
                    FundingType::FinancierFunded => "financed through financier bidding",
                }
            ),
            Subject::Offer(offer.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;
        Ok(OfferResolution { offer, invoice })
    }

    /// Buyer authorises the early payment of a self-funded offer. Creates the
    /// disbursement, then asks for the two-party contract.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn authorize_payment(
        &self,
        actor: &Actor,
        offer_id: OfferId,
        bank_account_id: BankAccountId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<PaymentAuthorization> {
        let buyer = *actor.require_buyer()?;
        if !self
            .ctx
            .bank_accounts
            .is_owned_by(bank_account_id, buyer.entity_id)
            .await?
        {
            return Err(WorkflowError::Forbidden(format!(
                "bank account {bank_account_id} does not belong to the paying buyer"
            )));
        }

        let mut tx = self.ctx.store.begin().await?;
        let offer = load_offer(&mut tx, offer_id).await?;
        offer.ensure_owner(&buyer)?;
        let mut invoice = load_invoice(&mut tx, offer.invoice_id).await?;
        if let Some(existing) = tx.disbursement_for_invoice(invoice.id).await? {
            return Err(WorkflowError::Conflict(format!(
                "invoice {} already has disbursement {}",
                invoice.id, existing.id
            )));
        }

        let disbursement =
            Disbursement::self_funded(DisbursementId::generate(), &invoice, &offer, bank_account_id, now)?;
        let from = invoice.transition_to(InvoiceStatus::Disbursed, now)?;

        tx.insert_disbursement(&disbursement).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        effects.audit(AuditRecord::new(
            Some(actor.user_id()),
            "disbursement.create",
            &disbursement,
            AuditChange::Created,
            now,
        ));
        audit_invoice_status(&mut effects, Some(actor), "offer.authorize_payment", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            Side::Seller,
            NotificationKind::DisbursementCreated,
            "Early payment authorised",
            format!(
                "The buyer authorised early payment of {} {} for invoice {}",
                disbursement.amount, invoice.currency, invoice.invoice_number
            ),
            Subject::Disbursement(disbursement.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;

        let contract = self
            .outbox
            .generate_or_defer(ContractTarget::SelfFundedOffer { offer_id }, now)
            .await;
        info!(%offer_id, disbursement_id = %disbursement.id, ?contract, "self-funded payment authorised");
        Ok(PaymentAuthorization {
            disbursement,
            contract,
        })
    }

    /// Buyer withdraws an unresolved offer, freeing the invoice for a new one.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn cancel_offer(
        &self,
        actor: &Actor,
        offer_id: OfferId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<OfferResolution> {
        let buyer = *actor.require_buyer()?;

        let mut tx = self.ctx.store.begin().await?;
        let mut offer = load_offer(&mut tx, offer_id).await?;
        offer.ensure_owner(&buyer)?;
        let mut invoice = load_invoice(&mut tx, offer.invoice_id).await?;

        let offer_from = offer.status();
        offer.cancel(now)?;
        let from = match invoice.status() {
            InvoiceStatus::PendingAcceptance => invoice.transition_to(InvoiceStatus::Draft, now)?,
            status => status,
        };

        tx.update_offer(&offer).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_offer_status(&mut effects, Some(actor), "offer.cancel", &offer, offer_from, now);
        audit_invoice_status(&mut effects, Some(actor), "offer.cancel", &invoice, from, now);
        notify_party(
            &mut effects,
            &invoice,
            Side::Seller,
            NotificationKind::OfferCancelled,
            "Offer withdrawn",
            format!("The buyer withdrew the offer on invoice {}", invoice.invoice_number),
            Subject::Offer(offer.id),
            now,
        );
        self.ctx.effects.dispatch(effects).await;
        Ok(OfferResolution { offer, invoice })
    }

    /// The invoice's current (non-cancelled) offer.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id()), err)]
    pub async fn offer_for_invoice(
        &self,
        actor: &Actor,
        invoice_id: InvoiceId,
    ) -> WorkflowResult<DiscountOffer> {
        let mut tx = self.ctx.store.begin().await?;
        let invoice = load_invoice(&mut tx, invoice_id).await?;
        if !can_view(actor, &invoice, false) {
            return Err(WorkflowError::not_found("invoice", invoice_id));
        }
        tx.active_offer_for_invoice(invoice_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("invoice {invoice_id} has no offer")))
    }

    /// Expire PENDING offers past `expires_at` and return their invoices to
    /// DRAFT. Each offer is handled in its own transaction.
    #[instrument(skip(self))]
    pub async fn sweep_expired_offers(&self, now: DateTime<Utc>) -> WorkflowResult<SweepReport> {
        let candidates = {
            let mut tx = self.ctx.store.begin().await?;
            tx.expired_offer_ids(now).await?
        };

        let mut report = SweepReport::default();
        for offer_id in candidates {
            report.examined += 1;
            match self.expire_offer(offer_id, now).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(err) => warn!(%offer_id, error = %err, "offer expiry failed; will retry next sweep"),
            }
        }

        if report.updated > 0 {
            info!(examined = report.examined, updated = report.updated, "expired offers");
        }
        Ok(report)
    }

    async fn expire_offer(&self, offer_id: OfferId, now: DateTime<Utc>) -> WorkflowResult<bool> {
        let mut tx = self.ctx.store.begin().await?;
        let mut offer = load_offer(&mut tx, offer_id).await?;
        let offer_from = offer.status();
        if !offer.expire(now) {
            return Ok(false);
        }

        let mut invoice = load_invoice(&mut tx, offer.invoice_id).await?;
        let from = match invoice.status() {
            InvoiceStatus::PendingAcceptance => invoice.transition_to(InvoiceStatus::Draft, now)?,
            status => status,
        };

        tx.update_offer(&offer).await?;
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        let mut effects = Effects::new();
        audit_offer_status(&mut effects, None, "offer.expire", &offer, offer_from, now);
        audit_invoice_status(&mut effects, None, "offer.expire", &invoice, from, now);
        let message = format!(
            "The offer on invoice {} expired; {} revision(s) left",
            invoice.invoice_number,
            offer.revisions_left()
        );
        for side in [Side::Buyer, Side::Seller] {
            notify_party(
                &mut effects,
                &invoice,
                side,
                NotificationKind::OfferExpired,
                "Offer expired",
                message.clone(),
                Subject::Offer(offer.id),
                now,
            );
        }
        self.ctx.effects.dispatch(effects).await;
        Ok(true)
    }
}
