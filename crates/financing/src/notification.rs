//! Notifications emitted to parties affected by a transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scf_core::{EntityId, Role};

use crate::ids::{BidId, ContractId, DisbursementId, InvoiceId, OfferId, RepaymentId};

/// Addressee of a notification: every user of `entity_id` acting as `role`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub entity_id: EntityId,
    pub role: Role,
}

impl Recipient {
    pub fn buyer(entity_id: EntityId) -> Self {
        Self { entity_id, role: Role::Buyer }
    }

    pub fn seller(entity_id: EntityId) -> Self {
        Self { entity_id, role: Role::Seller }
    }

    pub fn financier(entity_id: EntityId) -> Self {
        Self { entity_id, role: Role::Financier }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InvoiceSubmitted,
    InvoiceAccepted,
    InvoiceRejected,
    InvoiceCancelled,
    InvoiceDisputed,
    InvoiceOpenedForBidding,
    OfferReceived,
    OfferAccepted,
    OfferRejected,
    OfferRevised,
    OfferExpired,
    OfferCancelled,
    FundingTypeSelected,
    BidPlaced,
    BidAccepted,
    BidRejected,
    DisbursementCreated,
    DisbursementCompleted,
    DisbursementFailed,
    RepaymentPaid,
    RepaymentOverdue,
    RepaymentDefaulted,
    ContractGenerated,
}

/// The record a notification points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Invoice(InvoiceId),
    Offer(OfferId),
    Bid(BidId),
    Disbursement(DisbursementId),
    Repayment(RepaymentId),
    Contract(ContractId),
}

/// Structured notification handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub invoice_id: InvoiceId,
    pub subject: Subject,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient: Recipient,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        invoice_id: InvoiceId,
        subject: Subject,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient,
            kind,
            title: title.into(),
            message: message.into(),
            invoice_id,
            subject,
            created_at,
        }
    }
}
