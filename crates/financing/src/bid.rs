//! Financier bids and auction pricing.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use scf_core::{DomainError, DomainResult, Entity, EntityId, UserId};

use crate::ids::{BidId, InvoiceId};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::party::PartyActor;

const DAYS_PER_YEAR: i64 = 365;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Withdrawn,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidStatus::Pending => "PENDING",
            BidStatus::Accepted => "ACCEPTED",
            BidStatus::Rejected => "REJECTED",
            BidStatus::Expired => "EXPIRED",
            BidStatus::Withdrawn => "WITHDRAWN",
        }
    }
}

impl core::fmt::Display for BidStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Financier-supplied bid terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidTerms {
    /// Annualised discount rate, in percent.
    pub discount_rate: Decimal,
    pub haircut_percentage: Decimal,
    pub processing_fee: Decimal,
    pub valid_until: DateTime<Utc>,
}

/// Breakdown of what the seller receives for a bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidPricing {
    pub days_early: i64,
    pub discount_amount: Decimal,
    pub haircut_amount: Decimal,
    pub net_amount: Decimal,
}

fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Price a bid.
///
/// The annual `discount_rate` is prorated over `days_early`:
///
/// ```text
/// effective  = discount_rate / 365 × days_early
/// net_amount = total − total × effective / 100 − total × haircut / 100 − fee
/// ```
pub fn price_bid(total: Decimal, days_early: i64, terms: &BidTerms) -> DomainResult<BidPricing> {
    if terms.discount_rate.is_sign_negative() || terms.discount_rate > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation("discount_rate must be within 0..=100"));
    }
    if terms.haircut_percentage.is_sign_negative() || terms.haircut_percentage >= Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(
            "haircut_percentage must be at least 0 and below 100",
        ));
    }
    if terms.processing_fee.is_sign_negative() {
        return Err(DomainError::validation("processing_fee must not be negative"));
    }
    if days_early < 1 {
        return Err(DomainError::validation(
            "invoice is due too soon to be financed early",
        ));
    }

    let out_of_range = || DomainError::validation("bid amounts are out of range");
    let discount_amount = total
        .checked_mul(terms.discount_rate)
        .and_then(|v| v.checked_mul(Decimal::from(days_early)))
        .and_then(|v| v.checked_div(Decimal::from(DAYS_PER_YEAR * 100)))
        .ok_or_else(out_of_range)?;
    let haircut_amount = total
        .checked_mul(terms.haircut_percentage)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(out_of_range)?;
    let net_amount = total
        .checked_sub(discount_amount)
        .and_then(|v| v.checked_sub(haircut_amount))
        .and_then(|v| v.checked_sub(terms.processing_fee))
        .map(round_cents)
        .ok_or_else(out_of_range)?;

    if net_amount <= Decimal::ZERO {
        return Err(DomainError::validation(
            "bid terms leave nothing for the seller",
        ));
    }

    Ok(BidPricing {
        days_early,
        discount_amount: round_cents(discount_amount),
        haircut_amount: round_cents(haircut_amount),
        net_amount,
    })
}

/// Bid record. Many per invoice; at most one `ACCEPTED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub invoice_id: InvoiceId,
    pub financier: EntityId,
    pub placed_by: UserId,
    pub discount_rate: Decimal,
    pub haircut_percentage: Decimal,
    pub processing_fee: Decimal,
    pub days_early: i64,
    pub discount_amount: Decimal,
    pub haircut_amount: Decimal,
    pub net_amount: Decimal,
    pub valid_until: DateTime<Utc>,
    status: BidStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Bid {
    type Id = BidId;
    const KIND: &'static str = "bid";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn priced_terms(invoice: &Invoice, terms: &BidTerms, now: DateTime<Utc>) -> DomainResult<BidPricing> {
    if terms.valid_until <= now {
        return Err(DomainError::validation("valid_until must be in the future"));
    }
    price_bid(invoice.total_amount, invoice.days_until_due(now), terms)
}

impl Bid {
    /// Place a bid on an invoice open for bidding.
    ///
    /// The one-pending-bid-per-financier check needs the store and is done by
    /// the caller inside its transaction.
    pub fn place(
        id: BidId,
        invoice: &Invoice,
        financier: &PartyActor,
        terms: BidTerms,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        invoice.ensure_status(&[InvoiceStatus::OpenForBidding], "bid on")?;
        if invoice.side_of(financier.entity_id).is_some() {
            return Err(DomainError::forbidden(
                "a party to the invoice cannot finance it",
            ));
        }
        let pricing = priced_terms(invoice, &terms, now)?;

        Ok(Self {
            id,
            invoice_id: invoice.id,
            financier: financier.entity_id,
            placed_by: financier.user_id,
            discount_rate: terms.discount_rate,
            haircut_percentage: terms.haircut_percentage,
            processing_fee: terms.processing_fee,
            days_early: pricing.days_early,
            discount_amount: pricing.discount_amount,
            haircut_amount: pricing.haircut_amount,
            net_amount: pricing.net_amount,
            valid_until: terms.valid_until,
            status: BidStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> BidStatus {
        self.status
    }

    pub fn ensure_owner(&self, financier: &PartyActor) -> DomainResult<()> {
        if self.financier == financier.entity_id {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!(
                "bid {} belongs to another financier",
                self.id
            )))
        }
    }

    fn ensure_pending(&self, action: &str) -> DomainResult<()> {
        if self.status == BidStatus::Pending {
            Ok(())
        } else {
            Err(DomainError::invalid_state(format!(
                "cannot {action} bid {} in status {}",
                self.id, self.status
            )))
        }
    }

    /// Replace the terms of a pending bid and reprice it.
    pub fn update(&mut self, invoice: &Invoice, terms: BidTerms, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("update")?;
        invoice.ensure_status(&[InvoiceStatus::OpenForBidding], "update a bid on")?;
        let pricing = priced_terms(invoice, &terms, now)?;

        self.discount_rate = terms.discount_rate;
        self.haircut_percentage = terms.haircut_percentage;
        self.processing_fee = terms.processing_fee;
        self.valid_until = terms.valid_until;
        self.days_early = pricing.days_early;
        self.discount_amount = pricing.discount_amount;
        self.haircut_amount = pricing.haircut_amount;
        self.net_amount = pricing.net_amount;
        self.updated_at = now;
        Ok(())
    }

    pub fn withdraw(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("withdraw")?;
        self.status = BidStatus::Withdrawn;
        self.updated_at = now;
        Ok(())
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("accept")?;
        if self.valid_until < now {
            return Err(DomainError::invalid_state(format!(
                "bid {} lapsed at {}",
                self.id, self.valid_until
            )));
        }
        self.status = BidStatus::Accepted;
        self.updated_at = now;
        Ok(())
    }

    /// Losing-bid transition. Returns `false` for bids no longer pending.
    pub fn reject(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != BidStatus::Pending {
            return false;
        }
        self.status = BidStatus::Rejected;
        self.updated_at = now;
        true
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BidStatus::Pending && self.valid_until < now
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired_at(now) {
            return false;
        }
        self.status = BidStatus::Expired;
        self.updated_at = now;
        true
    }
}
