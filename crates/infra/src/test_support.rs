//! Shared fixtures for the workflow tests.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use scf_core::{EntityId, UserId};
use scf_financing::{
    Actor, Bid, BidTerms, DiscountOffer, Invoice, InvoiceDetails, InvoiceId, OfferResponse,
    OfferTerms, PartyActor, PartyProfile, ProductType, UploadInvoice,
};

use crate::config::WorkflowConfig;
use crate::workflow::{FinancingWorkflow, InMemoryAdapters, WorkflowContext};

pub(crate) fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn party() -> PartyActor {
    PartyActor {
        user_id: UserId::new(),
        entity_id: EntityId::new(),
    }
}

pub(crate) fn buyer() -> PartyActor {
    party()
}

pub(crate) fn seller() -> PartyActor {
    party()
}

pub(crate) fn financier() -> PartyActor {
    party()
}

pub(crate) fn admin() -> Actor {
    Actor::Admin {
        user_id: UserId::new(),
    }
}

/// 100 000.00 INR, due in 60 days.
pub(crate) fn details() -> InvoiceDetails {
    InvoiceDetails {
        invoice_number: "INV-2026-0117".to_string(),
        issue_date: now() - Duration::days(2),
        due_date: now() + Duration::days(60),
        subtotal: dec!(90000),
        tax_amount: dec!(10000),
        currency: "INR".to_string(),
        description: Some("hot rolled steel".to_string()),
    }
}

/// A seller-uploaded GST invoice, already open for bidding.
pub(crate) fn gst_invoice(seller: PartyActor) -> Invoice {
    Invoice::upload(
        InvoiceId::generate(),
        &Actor::Seller(seller),
        UploadInvoice {
            details: details(),
            product_type: ProductType::GstBacked,
            counterparty: None,
        },
        now(),
    )
    .unwrap()
}

pub(crate) fn offer_terms(pct: Decimal) -> OfferTerms {
    OfferTerms {
        discount_percentage: pct,
        early_payment_date: now() + Duration::days(10),
    }
}

pub(crate) fn bid_terms(annual_rate: Decimal) -> BidTerms {
    BidTerms {
        discount_rate: annual_rate,
        haircut_percentage: dec!(1),
        processing_fee: dec!(500),
        valid_until: now() + Duration::days(7),
    }
}

pub(crate) fn profile(party: &PartyActor, name: &str) -> PartyProfile {
    PartyProfile {
        entity_id: party.entity_id,
        legal_name: name.to_string(),
        registration_number: format!("REG-{}", &party.entity_id.to_string()[..8]),
        address: "12 Industrial Estate, Pune".to_string(),
        contact_email: format!("{}@example.test", name.to_lowercase().replace(' ', ".")),
    }
}

/// An in-memory workflow plus handles on its adapters.
pub(crate) struct Harness {
    pub workflow: FinancingWorkflow,
    pub adapters: InMemoryAdapters,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WorkflowConfig::default())
    }

    pub fn with_config(config: WorkflowConfig) -> Self {
        let (ctx, adapters) = WorkflowContext::in_memory(config);
        Self {
            workflow: FinancingWorkflow::new(ctx),
            adapters,
        }
    }

    pub fn register(&self, party: &PartyActor, name: &str) {
        self.adapters.parties.register(profile(party, name));
    }

    /// Seller-uploaded dynamic discounting invoice in DRAFT.
    pub async fn draft_invoice(&self, seller: &PartyActor, buyer: Option<EntityId>) -> Invoice {
        self.register(seller, "Shakti Steel Works");
        self.workflow
            .lifecycle
            .upload(
                &Actor::Seller(*seller),
                UploadInvoice {
                    details: details(),
                    product_type: ProductType::DynamicDiscounting,
                    counterparty: buyer,
                },
                now(),
            )
            .await
            .unwrap()
    }

    /// GST invoice open for bidding, uploaded by `seller`.
    pub async fn gst_invoice(&self, seller: &PartyActor) -> Invoice {
        self.register(seller, "Shakti Steel Works");
        self.workflow
            .lifecycle
            .upload(
                &Actor::Seller(*seller),
                UploadInvoice {
                    details: details(),
                    product_type: ProductType::GstBacked,
                    counterparty: None,
                },
                now(),
            )
            .await
            .unwrap()
    }

    /// An offer the seller accepted, with no funding type chosen yet.
    pub async fn accepted_offer(&self, buyer: &PartyActor, seller: &PartyActor) -> (DiscountOffer, Invoice) {
        self.register(buyer, "Apex Motors");
        let invoice = self.draft_invoice(seller, Some(buyer.entity_id)).await;
        let offer = self
            .workflow
            .negotiation
            .create_offer(&Actor::Buyer(*buyer), invoice.id, offer_terms(dec!(2)), None, now())
            .await
            .unwrap()
            .offer;
        let resolved = self
            .workflow
            .negotiation
            .respond(&Actor::Seller(*seller), offer.id, OfferResponse::Accept, None, now())
            .await
            .unwrap();
        (resolved.offer, resolved.invoice)
    }

    /// A GST invoice whose seller accepted a bid from `financier`.
    pub async fn selected_gst_bid(
        &self,
        buyer: &PartyActor,
        seller: &PartyActor,
        financier: &PartyActor,
    ) -> Bid {
        self.register(buyer, "Apex Motors");
        self.register(financier, "Northwind Capital");
        self.register(seller, "Shakti Steel Works");
        let invoice = self
            .workflow
            .lifecycle
            .upload(
                &Actor::Seller(*seller),
                UploadInvoice {
                    details: details(),
                    product_type: ProductType::GstBacked,
                    counterparty: Some(buyer.entity_id),
                },
                now(),
            )
            .await
            .unwrap();
        let bid = self
            .workflow
            .auction
            .place_bid(&Actor::Financier(*financier), invoice.id, bid_terms(dec!(18)), now())
            .await
            .unwrap();
        self.workflow
            .auction
            .accept_bid(&Actor::Seller(*seller), bid.id, now())
            .await
            .unwrap()
            .bid
    }
}
