//! Money movement: disbursements and the repayments they create.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scf_core::{DomainError, DomainResult, Entity, EntityId};

use crate::bid::{Bid, BidStatus};
use crate::ids::{BankAccountId, BidId, DisbursementId, InvoiceId, OfferId, RepaymentId};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::offer::DiscountOffer;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisbursementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DisbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementStatus::Pending => "PENDING",
            DisbursementStatus::Processing => "PROCESSING",
            DisbursementStatus::Completed => "COMPLETED",
            DisbursementStatus::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(self, next: DisbursementStatus) -> bool {
        use DisbursementStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl core::fmt::Display for DisbursementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepaymentStatus {
    Pending,
    Paid,
    Overdue,
    Defaulted,
}

impl RepaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepaymentStatus::Pending => "PENDING",
            RepaymentStatus::Paid => "PAID",
            RepaymentStatus::Overdue => "OVERDUE",
            RepaymentStatus::Defaulted => "DEFAULTED",
        }
    }
}

impl core::fmt::Display for RepaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a disbursement was funded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "funding", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisbursementSource {
    SelfFunded {
        offer_id: OfferId,
        bank_account_id: BankAccountId,
    },
    FinancierFunded {
        bid_id: BidId,
        financier: EntityId,
    },
}

/// One disbursement per invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disbursement {
    pub id: DisbursementId,
    pub invoice_id: InvoiceId,
    pub source: DisbursementSource,
    pub payer: EntityId,
    pub recipient: EntityId,
    pub amount: Decimal,
    status: DisbursementStatus,
    pub payment_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Disbursement {
    type Id = DisbursementId;
    const KIND: &'static str = "disbursement";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Disbursement {
    /// Buyer pays the seller the discounted amount directly.
    pub fn self_funded(
        id: DisbursementId,
        invoice: &Invoice,
        offer: &DiscountOffer,
        bank_account_id: BankAccountId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        offer.require_self_funded()?;
        invoice.ensure_status(&[InvoiceStatus::Accepted], "disburse")?;
        if offer.invoice_id != invoice.id {
            return Err(DomainError::validation("offer does not belong to invoice"));
        }

        Ok(Self {
            id,
            invoice_id: invoice.id,
            source: DisbursementSource::SelfFunded {
                offer_id: offer.id,
                bank_account_id,
            },
            payer: invoice.require_buyer()?,
            recipient: invoice.require_seller()?,
            amount: offer.discounted_amount,
            status: DisbursementStatus::Pending,
            payment_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Winning financier pays the seller the bid's net amount.
    pub fn financier_funded(
        id: DisbursementId,
        invoice: &Invoice,
        bid: &Bid,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        invoice.ensure_status(&[InvoiceStatus::BidSelected], "disburse")?;
        if bid.invoice_id != invoice.id {
            return Err(DomainError::validation("bid does not belong to invoice"));
        }
        if bid.status() != BidStatus::Accepted {
            return Err(DomainError::invalid_state(format!(
                "bid {} is {}, not ACCEPTED",
                bid.id,
                bid.status()
            )));
        }

        Ok(Self {
            id,
            invoice_id: invoice.id,
            source: DisbursementSource::FinancierFunded {
                bid_id: bid.id,
                financier: bid.financier,
            },
            payer: bid.financier,
            recipient: invoice.require_seller()?,
            amount: bid.net_amount,
            status: DisbursementStatus::Pending,
            payment_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> DisbursementStatus {
        self.status
    }

    pub fn financier(&self) -> Option<EntityId> {
        match self.source {
            DisbursementSource::FinancierFunded { financier, .. } => Some(financier),
            DisbursementSource::SelfFunded { .. } => None,
        }
    }

    /// Externally driven progress (payment confirmation).
    pub fn advance(
        &mut self,
        next: DisbursementStatus,
        payment_reference: Option<String>,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<DisbursementStatus> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state(format!(
                "disbursement {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        if next == DisbursementStatus::Failed && failure_reason.is_none() {
            return Err(DomainError::validation("a failed disbursement needs a reason"));
        }

        let previous = self.status;
        self.status = next;
        if payment_reference.is_some() {
            self.payment_reference = payment_reference;
        }
        self.failure_reason = failure_reason;
        self.updated_at = now;
        Ok(previous)
    }
}

/// Obligation to repay a financier (financier-funded path only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: RepaymentId,
    pub disbursement_id: DisbursementId,
    pub invoice_id: InvoiceId,
    pub payer: EntityId,
    pub payee: EntityId,
    pub amount: Decimal,
    pub due_date: DateTime<Utc>,
    status: RepaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Repayment {
    type Id = RepaymentId;
    const KIND: &'static str = "repayment";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Repayment {
    /// Full invoice amount, due on the original due date, paid by the side
    /// the product type names.
    pub fn for_disbursement(
        id: RepaymentId,
        invoice: &Invoice,
        disbursement: &Disbursement,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let payee = disbursement.financier().ok_or_else(|| {
            DomainError::invalid_state("self-funded disbursements have no repayment")
        })?;

        Ok(Self {
            id,
            disbursement_id: disbursement.id,
            invoice_id: invoice.id,
            payer: invoice.require_party(invoice.product_type.repayment_payer())?,
            payee,
            amount: invoice.total_amount,
            due_date: invoice.due_date,
            status: RepaymentStatus::Pending,
            paid_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> RepaymentStatus {
        self.status
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> DomainResult<RepaymentStatus> {
        match self.status {
            RepaymentStatus::Pending | RepaymentStatus::Overdue => {
                let previous = self.status;
                self.status = RepaymentStatus::Paid;
                self.paid_at = Some(now);
                self.updated_at = now;
                Ok(previous)
            }
            RepaymentStatus::Paid => Err(DomainError::conflict(format!(
                "repayment {} is already PAID",
                self.id
            ))),
            RepaymentStatus::Defaulted => Err(DomainError::invalid_state(format!(
                "repayment {} has defaulted",
                self.id
            ))),
        }
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RepaymentStatus::Pending && self.due_date < now
    }

    /// Sweep transition; `false` when the predicate no longer holds.
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_overdue_at(now) {
            return false;
        }
        self.status = RepaymentStatus::Overdue;
        self.updated_at = now;
        true
    }

    pub fn mark_defaulted(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != RepaymentStatus::Overdue {
            return Err(DomainError::invalid_state(format!(
                "only OVERDUE repayments can default (repayment {} is {})",
                self.id, self.status
            )));
        }
        self.status = RepaymentStatus::Defaulted;
        self.updated_at = now;
        Ok(())
    }
}
