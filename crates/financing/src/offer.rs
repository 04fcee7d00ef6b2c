//! Discount offers: buyer-proposed early payment in exchange for a discount.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use scf_core::{DomainError, DomainResult, Entity, EntityId, Percentage, UserId};

use crate::ids::{InvoiceId, OfferId};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::party::PartyActor;

/// Revisions a buyer may make after the seller rejects (or the offer expires).
pub const MAX_REVISIONS: u8 = 2;

/// Default validity window of a new or revised offer.
pub const DEFAULT_OFFER_TTL_HOURS: i64 = 72;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingType {
    SelfFunded,
    FinancierFunded,
}

impl FundingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingType::SelfFunded => "SELF_FUNDED",
            FundingType::FinancierFunded => "FINANCIER_FUNDED",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "PENDING",
            OfferStatus::Accepted => "ACCEPTED",
            OfferStatus::Rejected => "REJECTED",
            OfferStatus::Expired => "EXPIRED",
            OfferStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seller's answer to a pending offer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferResponse {
    Accept,
    Reject,
}

/// What a response means for the invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Accepted,
    /// Rejected; the buyer may still revise.
    RejectedRevisable,
    /// Rejected with no revisions left; the negotiation is over.
    RejectedFinal,
}

impl ResponseOutcome {
    /// Invoice status implied by the outcome.
    pub fn invoice_status(self) -> InvoiceStatus {
        match self {
            ResponseOutcome::Accepted => InvoiceStatus::Accepted,
            ResponseOutcome::RejectedRevisable => InvoiceStatus::PendingAcceptance,
            ResponseOutcome::RejectedFinal => InvoiceStatus::Rejected,
        }
    }
}

/// Buyer-supplied offer terms (creation and revision).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub discount_percentage: Decimal,
    pub early_payment_date: DateTime<Utc>,
}

/// `total × (1 − pct/100)`, rounded to cents (midpoint away from zero).
pub fn discounted_amount(total: Decimal, pct: Percentage) -> Decimal {
    pct.discount(total)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn validate_terms(
    invoice: &Invoice,
    terms: &OfferTerms,
    now: DateTime<Utc>,
) -> DomainResult<Percentage> {
    let pct = Percentage::new(terms.discount_percentage)?;
    if pct.is_zero() || pct.value() >= Percentage::HUNDRED {
        return Err(DomainError::validation(
            "discount_percentage must be greater than 0 and less than 100",
        ));
    }
    if terms.early_payment_date <= now || terms.early_payment_date >= invoice.due_date {
        return Err(DomainError::validation(
            "early_payment_date must fall between now and the invoice due date",
        ));
    }
    Ok(pct)
}

/// Discount offer record (one active offer per invoice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountOffer {
    pub id: OfferId,
    pub invoice_id: InvoiceId,
    pub buyer: EntityId,
    pub created_by: UserId,
    pub discount_percentage: Percentage,
    pub discounted_amount: Decimal,
    pub early_payment_date: DateTime<Utc>,
    funding_type: Option<FundingType>,
    status: OfferStatus,
    revision_count: u8,
    pub expires_at: DateTime<Utc>,
    pub response_reason: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for DiscountOffer {
    type Id = OfferId;
    const KIND: &'static str = "discount_offer";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl DiscountOffer {
    /// Create a pending offer on an invoice the buyer is linked to.
    ///
    /// The caller is responsible for the one-active-offer-per-invoice check
    /// (it needs the store) and for moving the invoice to `PENDING_ACCEPTANCE`.
    pub fn create(
        id: OfferId,
        invoice: &Invoice,
        buyer: &PartyActor,
        terms: OfferTerms,
        funding_type: Option<FundingType>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        invoice.ensure_status(
            &[InvoiceStatus::Draft, InvoiceStatus::PendingAcceptance],
            "create an offer on",
        )?;
        if invoice.buyer() != Some(buyer.entity_id) {
            return Err(DomainError::forbidden(format!(
                "only the linked buyer may make an offer on invoice {}",
                invoice.id
            )));
        }
        let pct = validate_terms(invoice, &terms, now)?;

        Ok(Self {
            id,
            invoice_id: invoice.id,
            buyer: buyer.entity_id,
            created_by: buyer.user_id,
            discount_percentage: pct,
            discounted_amount: discounted_amount(invoice.total_amount, pct),
            early_payment_date: terms.early_payment_date,
            funding_type,
            status: OfferStatus::Pending,
            revision_count: 0,
            expires_at: now + ttl,
            response_reason: None,
            responded_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> OfferStatus {
        self.status
    }

    pub fn funding_type(&self) -> Option<FundingType> {
        self.funding_type
    }

    pub fn revision_count(&self) -> u8 {
        self.revision_count
    }

    pub fn revisions_left(&self) -> u8 {
        MAX_REVISIONS.saturating_sub(self.revision_count)
    }

    /// Active offers block new offers on the same invoice.
    pub fn is_active(&self) -> bool {
        self.status != OfferStatus::Cancelled
    }

    pub fn discount_amount(&self, invoice_total: Decimal) -> Decimal {
        invoice_total - self.discounted_amount
    }

    pub fn ensure_owner(&self, buyer: &PartyActor) -> DomainResult<()> {
        if self.buyer == buyer.entity_id {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!(
                "offer {} belongs to another buyer",
                self.id
            )))
        }
    }

    /// Seller response. Late or repeated responses lose to whoever resolved
    /// the offer first and fail with `Conflict`.
    pub fn respond(
        &mut self,
        response: OfferResponse,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<ResponseOutcome> {
        if self.status != OfferStatus::Pending {
            return Err(DomainError::conflict(format!(
                "offer {} is already {}",
                self.id, self.status
            )));
        }
        if now > self.expires_at {
            return Err(DomainError::conflict(format!("offer {} has expired", self.id)));
        }

        let outcome = match response {
            OfferResponse::Accept => {
                self.status = OfferStatus::Accepted;
                ResponseOutcome::Accepted
            }
            OfferResponse::Reject => {
                self.status = OfferStatus::Rejected;
                if self.revision_count < MAX_REVISIONS {
                    ResponseOutcome::RejectedRevisable
                } else {
                    ResponseOutcome::RejectedFinal
                }
            }
        };
        self.response_reason = reason;
        self.responded_at = Some(now);
        self.updated_at = now;
        Ok(outcome)
    }

    /// Buyer revision after a rejection or expiry.
    pub fn revise(
        &mut self,
        invoice: &Invoice,
        terms: OfferTerms,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.revision_count >= MAX_REVISIONS {
            return Err(DomainError::validation(format!(
                "offer {} has used all {MAX_REVISIONS} revisions",
                self.id
            )));
        }
        if !matches!(self.status, OfferStatus::Rejected | OfferStatus::Expired) {
            return Err(DomainError::invalid_state(format!(
                "cannot revise offer {} in status {}",
                self.id, self.status
            )));
        }
        invoice.ensure_status(
            &[InvoiceStatus::Draft, InvoiceStatus::PendingAcceptance],
            "revise an offer on",
        )?;
        let pct = validate_terms(invoice, &terms, now)?;

        self.discount_percentage = pct;
        self.discounted_amount = discounted_amount(invoice.total_amount, pct);
        self.early_payment_date = terms.early_payment_date;
        self.revision_count += 1;
        self.status = OfferStatus::Pending;
        self.expires_at = now + ttl;
        self.response_reason = None;
        self.responded_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Record the funding type. Write-once: confirming the recorded value is a
    /// no-op, choosing a different one is a conflict.
    pub fn select_funding_type(&mut self, funding_type: FundingType, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OfferStatus::Accepted {
            return Err(DomainError::invalid_state(format!(
                "funding type can only be chosen for an accepted offer (offer {} is {})",
                self.id, self.status
            )));
        }
        match self.funding_type {
            Some(existing) if existing == funding_type => Ok(()),
            Some(existing) => Err(DomainError::conflict(format!(
                "offer {} is already {}",
                self.id,
                existing.as_str()
            ))),
            None => {
                self.funding_type = Some(funding_type);
                self.updated_at = now;
                Ok(())
            }
        }
    }

    pub fn require_self_funded(&self) -> DomainResult<()> {
        if self.status != OfferStatus::Accepted {
            return Err(DomainError::invalid_state(format!(
                "offer {} is {}, not ACCEPTED",
                self.id, self.status
            )));
        }
        match self.funding_type {
            Some(FundingType::SelfFunded) => Ok(()),
            _ => Err(DomainError::invalid_state(format!(
                "offer {} is not self-funded",
                self.id
            ))),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Pending && self.expires_at < now
    }

    /// Sweep transition. Returns `false` when the offer no longer qualifies.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired_at(now) {
            return false;
        }
        self.status = OfferStatus::Expired;
        self.updated_at = now;
        true
    }

    /// Buyer withdrawal of an unresolved offer.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            OfferStatus::Pending | OfferStatus::Rejected | OfferStatus::Expired => {
                self.status = OfferStatus::Cancelled;
                self.updated_at = now;
                Ok(())
            }
            OfferStatus::Accepted | OfferStatus::Cancelled => Err(DomainError::invalid_state(
                format!("cannot cancel offer {} in status {}", self.id, self.status),
            )),
        }
    }

    /// Cancellation cascaded from the invoice. Returns `false` if already cancelled.
    pub fn void(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == OfferStatus::Cancelled {
            return false;
        }
        self.status = OfferStatus::Cancelled;
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::ProductType;
    use crate::invoice::tests::{draft, now, party};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn ttl() -> Duration {
        Duration::hours(DEFAULT_OFFER_TTL_HOURS)
    }

    fn terms(pct: Decimal) -> OfferTerms {
        OfferTerms {
            discount_percentage: pct,
            early_payment_date: now() + Duration::days(5),
        }
    }

    fn offer() -> (Invoice, DiscountOffer) {
        let (buyer, seller) = (party(), party());
        let invoice = draft(buyer, seller, ProductType::DynamicDiscounting);
        let offer = DiscountOffer::create(
            OfferId::generate(),
            &invoice,
            &buyer,
            terms(dec!(2.5)),
            None,
            ttl(),
            now(),
        )
        .unwrap();
        (invoice, offer)
    }

    #[test]
    fn create_computes_discounted_amount_and_expiry() {
        let (_, offer) = offer();
        assert_eq!(offer.discounted_amount, dec!(97500.00));
        assert_eq!(offer.expires_at, now() + Duration::hours(72));
        assert_eq!(offer.status(), OfferStatus::Pending);
    }

    #[test]
    fn create_rejects_out_of_range_terms_and_strangers() {
        let (buyer, seller) = (party(), party());
        let invoice = draft(buyer, seller, ProductType::DynamicDiscounting);

        for pct in [dec!(0), dec!(100), dec!(-1)] {
            let err = DiscountOffer::create(OfferId::generate(), &invoice, &buyer, terms(pct), None, ttl(), now())
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "{pct}");
        }

        let late = OfferTerms {
            discount_percentage: dec!(1),
            early_payment_date: invoice.due_date,
        };
        assert!(matches!(
            DiscountOffer::create(OfferId::generate(), &invoice, &buyer, late, None, ttl(), now()),
            Err(DomainError::Validation(_))
        ));

        let stranger = party();
        assert!(matches!(
            DiscountOffer::create(OfferId::generate(), &invoice, &stranger, terms(dec!(1)), None, ttl(), now()),
            Err(DomainError::Forbidden(_))
        ));
    }

    #[test]
    fn rejection_with_revisions_left_is_revisable() {
        let (invoice, mut offer) = offer();
        let outcome = offer.respond(OfferResponse::Reject, None, now()).unwrap();
        assert_eq!(outcome, ResponseOutcome::RejectedRevisable);
        assert_eq!(outcome.invoice_status(), InvoiceStatus::PendingAcceptance);

        offer.revise(&invoice, terms(dec!(2)), ttl(), now()).unwrap();
        assert_eq!(offer.revision_count(), 1);
        assert_eq!(offer.status(), OfferStatus::Pending);
        assert_eq!(offer.discounted_amount, dec!(98000.00));
    }

    #[test]
    fn rejecting_at_revision_cap_is_final_and_third_revision_fails() {
        let (invoice, mut offer) = offer();
        for _ in 0..MAX_REVISIONS {
            offer.respond(OfferResponse::Reject, None, now()).unwrap();
            offer.revise(&invoice, terms(dec!(1.5)), ttl(), now()).unwrap();
        }
        assert_eq!(offer.revision_count(), 2);

        let outcome = offer.respond(OfferResponse::Reject, None, now()).unwrap();
        assert_eq!(outcome, ResponseOutcome::RejectedFinal);
        assert_eq!(outcome.invoice_status(), InvoiceStatus::Rejected);

        let err = offer.revise(&invoice, terms(dec!(1)), ttl(), now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn responding_twice_or_late_is_a_conflict() {
        let (_, mut offer) = offer();
        let late = offer.expires_at + Duration::seconds(1);
        assert!(matches!(
            offer.respond(OfferResponse::Accept, None, late),
            Err(DomainError::Conflict(_))
        ));

        offer.respond(OfferResponse::Accept, None, now()).unwrap();
        assert!(matches!(
            offer.respond(OfferResponse::Reject, None, now()),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn revising_a_pending_offer_is_invalid_state() {
        let (invoice, mut offer) = offer();
        let err = offer.revise(&invoice, terms(dec!(3)), ttl(), now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn funding_type_is_write_once() {
        let (_, mut offer) = offer();
        assert!(matches!(
            offer.select_funding_type(FundingType::SelfFunded, now()),
            Err(DomainError::InvalidState(_))
        ));

        offer.respond(OfferResponse::Accept, None, now()).unwrap();
        offer.select_funding_type(FundingType::SelfFunded, now()).unwrap();
        offer.select_funding_type(FundingType::SelfFunded, now()).unwrap();
        assert!(matches!(
            offer.select_funding_type(FundingType::FinancierFunded, now()),
            Err(DomainError::Conflict(_))
        ));
        offer.require_self_funded().unwrap();
    }

    #[test]
    fn expiry_only_touches_overdue_pending_offers() {
        let (_, mut offer) = offer();
        assert!(!offer.expire(now()));

        let later = offer.expires_at + Duration::minutes(1);
        assert!(offer.expire(later));
        assert!(!offer.expire(later));
        assert_eq!(offer.status(), OfferStatus::Expired);

        offer.cancel(later).unwrap();
        assert!(!offer.is_active());
    }

    proptest! {
        #[test]
        fn discounted_amount_never_exceeds_total(
            cents in 1i64..10_000_000_000,
            bps in 1u32..10_000,
        ) {
            let total = Decimal::new(cents, 2);
            let pct = Percentage::new(Decimal::new(bps as i64, 2)).unwrap();
            let amount = discounted_amount(total, pct);

            prop_assert!(amount <= total);
            prop_assert!(amount >= Decimal::ZERO);
            prop_assert!(amount.scale() <= 2);
        }

        #[test]
        fn revision_count_never_exceeds_cap(attempts in 0usize..8) {
            let (invoice, mut offer) = offer();
            for _ in 0..attempts {
                let _ = offer.respond(OfferResponse::Reject, None, now());
                let _ = offer.revise(&invoice, terms(dec!(1)), ttl(), now());
            }
            prop_assert!(offer.revision_count() <= MAX_REVISIONS);
        }
    }
}
