//! Typed audit records.
//!
//! Every state-changing operation produces one record per touched entity.
//! The change itself is a closed enum so consumers can match on it rather
//! than parse serialized before/after blobs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scf_core::{Entity, UserId};

use crate::bid::BidStatus;
use crate::disbursement::{DisbursementStatus, RepaymentStatus};
use crate::invoice::InvoiceStatus;
use crate::offer::{FundingType, OfferStatus};
use crate::party::Side;

/// Old/new value pair of an audited change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditChange {
    Created,
    Deleted,
    Edited,
    InvoiceStatus {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },
    CounterpartyLinked {
        side: Side,
    },
    OfferStatus {
        from: OfferStatus,
        to: OfferStatus,
    },
    OfferRevised {
        revision: u8,
        from_amount: Decimal,
        to_amount: Decimal,
    },
    FundingTypeSelected {
        funding_type: FundingType,
    },
    BidStatus {
        from: BidStatus,
        to: BidStatus,
    },
    BidRepriced {
        from_net: Decimal,
        to_net: Decimal,
    },
    DisbursementStatus {
        from: DisbursementStatus,
        to: DisbursementStatus,
    },
    RepaymentStatus {
        from: RepaymentStatus,
        to: RepaymentStatus,
    },
}

/// One audit-trail entry: `(actor, action, entity type, entity id, change)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// `None` for system actions (sweeps, workers).
    pub actor: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub change: AuditChange,
    pub occurred_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new<E>(
        actor: Option<UserId>,
        action: impl Into<String>,
        entity: &E,
        change: AuditChange,
        occurred_at: DateTime<Utc>,
    ) -> Self
    where
        E: Entity,
        E::Id: Into<Uuid>,
    {
        Self {
            id: Uuid::now_v7(),
            actor,
            action: action.into(),
            entity_type: E::KIND.to_string(),
            entity_id: (*entity.id()).into(),
            change,
            occurred_at,
        }
    }
}
