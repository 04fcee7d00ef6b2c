//! Relationship facts published after commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scf_core::EntityId;
use scf_events::Event;

use crate::ids::InvoiceId;

/// A trading or financing relationship was observed on an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationshipEvent {
    BuyerSellerLinked {
        buyer: EntityId,
        seller: EntityId,
        invoice_id: InvoiceId,
        occurred_at: DateTime<Utc>,
    },
    FinancierSellerEngaged {
        financier: EntityId,
        seller: EntityId,
        invoice_id: InvoiceId,
        occurred_at: DateTime<Utc>,
    },
}

impl RelationshipEvent {
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            RelationshipEvent::BuyerSellerLinked { invoice_id, .. }
            | RelationshipEvent::FinancierSellerEngaged { invoice_id, .. } => *invoice_id,
        }
    }
}

impl Event for RelationshipEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RelationshipEvent::BuyerSellerLinked { .. } => "relationship.buyer_seller_linked",
            RelationshipEvent::FinancierSellerEngaged { .. } => {
                "relationship.financier_seller_engaged"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RelationshipEvent::BuyerSellerLinked { occurred_at, .. }
            | RelationshipEvent::FinancierSellerEngaged { occurred_at, .. } => *occurred_at,
        }
    }
}
