//! Contracts: immutable snapshots of settled financing terms.
//!
//! A contract is assembled once from the records it settles and never
//! mutated afterwards. Display text is a pure function of the stored
//! snapshot ([`render_contract`]).

use chrono::{DateTime, Utc};
use core::fmt::Write as _;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scf_core::{DomainError, DomainResult, Entity, EntityId, Percentage};

use crate::bid::{Bid, BidStatus};
use crate::ids::{BidId, ContractId, InvoiceId, OfferId};
use crate::invoice::Invoice;
use crate::offer::{DiscountOffer, FundingType, OfferStatus};
use crate::party::{PartyProfile, Side};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    TwoParty,
    ThreeParty,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::TwoParty => "TWO_PARTY",
            ContractType::ThreeParty => "THREE_PARTY",
        }
    }

    /// Short code used in contract numbers.
    pub fn code(&self) -> &'static str {
        match self {
            ContractType::TwoParty => "2P",
            ContractType::ThreeParty => "3P",
        }
    }
}

/// A scheduled transfer between two parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLeg {
    pub payer: EntityId,
    pub payee: EntityId,
    pub amount: Decimal,
    pub due_on: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPartyTerms {
    pub invoice_number: String,
    pub currency: String,
    pub invoice_total: Decimal,
    pub discount_percentage: Percentage,
    pub discount_amount: Decimal,
    pub seller_receives: Decimal,
    pub early_payment_date: DateTime<Utc>,
    pub original_due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreePartyTerms {
    pub invoice_number: String,
    pub currency: String,
    pub invoice_total: Decimal,
    pub annual_discount_rate: Decimal,
    pub haircut_percentage: Decimal,
    pub processing_fee: Decimal,
    pub days_early: i64,
    pub net_amount: Decimal,
    pub repayment_payer: Side,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractTerms {
    TwoParty(TwoPartyTerms),
    ThreeParty(ThreePartyTerms),
}

/// Contract record. At most one per self-funded offer and one per bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub contract_number: String,
    pub invoice_id: InvoiceId,
    pub offer_id: OfferId,
    pub bid_id: Option<BidId>,
    pub buyer: PartyProfile,
    pub seller: PartyProfile,
    pub financier: Option<PartyProfile>,
    pub terms: ContractTerms,
    pub payment_legs: Vec<PaymentLeg>,
    pub generated_at: DateTime<Utc>,
}

impl Entity for Contract {
    type Id = ContractId;
    const KIND: &'static str = "contract";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn ensure_profile(profile: &PartyProfile, expected: EntityId, label: &str) -> DomainResult<()> {
    if profile.entity_id == expected {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "{label} profile is for entity {}, expected {expected}",
            profile.entity_id
        )))
    }
}

impl Contract {
    pub fn contract_type(&self) -> ContractType {
        match self.terms {
            ContractTerms::TwoParty(_) => ContractType::TwoParty,
            ContractTerms::ThreeParty(_) => ContractType::ThreeParty,
        }
    }

    /// Buyer ↔ seller contract for an accepted self-funded offer.
    pub fn two_party(
        id: ContractId,
        contract_number: String,
        invoice: &Invoice,
        offer: &DiscountOffer,
        buyer: PartyProfile,
        seller: PartyProfile,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if offer.funding_type() != Some(FundingType::SelfFunded) {
            return Err(DomainError::validation(format!(
                "offer {} is not self-funded",
                offer.id
            )));
        }
        if offer.status() != OfferStatus::Accepted {
            return Err(DomainError::invalid_state(format!(
                "offer {} is {}, not ACCEPTED",
                offer.id,
                offer.status()
            )));
        }
        if offer.invoice_id != invoice.id {
            return Err(DomainError::validation("offer does not belong to invoice"));
        }
        ensure_profile(&buyer, invoice.require_buyer()?, "buyer")?;
        ensure_profile(&seller, invoice.require_seller()?, "seller")?;

        let terms = TwoPartyTerms {
            invoice_number: invoice.invoice_number.clone(),
            currency: invoice.currency.clone(),
            invoice_total: invoice.total_amount,
            discount_percentage: offer.discount_percentage,
            discount_amount: offer.discount_amount(invoice.total_amount),
            seller_receives: offer.discounted_amount,
            early_payment_date: offer.early_payment_date,
            original_due_date: invoice.due_date,
        };
        let payment_legs = vec![PaymentLeg {
            payer: buyer.entity_id,
            payee: seller.entity_id,
            amount: offer.discounted_amount,
            due_on: offer.early_payment_date,
            description: "Early payment of discounted invoice".to_string(),
        }];

        Ok(Self {
            id,
            contract_number,
            invoice_id: invoice.id,
            offer_id: offer.id,
            bid_id: None,
            buyer,
            seller,
            financier: None,
            terms: ContractTerms::TwoParty(terms),
            payment_legs,
            generated_at: now,
        })
    }

    /// Buyer ↔ seller ↔ financier contract for an accepted bid.
    #[allow(clippy::too_many_arguments)]
    pub fn three_party(
        id: ContractId,
        contract_number: String,
        invoice: &Invoice,
        offer: &DiscountOffer,
        bid: &Bid,
        buyer: PartyProfile,
        seller: PartyProfile,
        financier: PartyProfile,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if bid.status() != BidStatus::Accepted {
            return Err(DomainError::invalid_state(format!(
                "bid {} is {}, not ACCEPTED",
                bid.id,
                bid.status()
            )));
        }
        if bid.invoice_id != invoice.id || offer.invoice_id != invoice.id {
            return Err(DomainError::validation("bid and offer must belong to invoice"));
        }
        ensure_profile(&buyer, invoice.require_buyer()?, "buyer")?;
        ensure_profile(&seller, invoice.require_seller()?, "seller")?;
        ensure_profile(&financier, bid.financier, "financier")?;

        let repayment_payer = invoice.product_type.repayment_payer();
        let repaying = match repayment_payer {
            Side::Buyer => buyer.entity_id,
            Side::Seller => seller.entity_id,
        };

        let terms = ThreePartyTerms {
            invoice_number: invoice.invoice_number.clone(),
            currency: invoice.currency.clone(),
            invoice_total: invoice.total_amount,
            annual_discount_rate: bid.discount_rate,
            haircut_percentage: bid.haircut_percentage,
            processing_fee: bid.processing_fee,
            days_early: bid.days_early,
            net_amount: bid.net_amount,
            repayment_payer,
            due_date: invoice.due_date,
        };
        let payment_legs = vec![
            PaymentLeg {
                payer: financier.entity_id,
                payee: seller.entity_id,
                amount: bid.net_amount,
                due_on: now,
                description: "Financier disbursement to seller".to_string(),
            },
            PaymentLeg {
                payer: repaying,
                payee: financier.entity_id,
                amount: invoice.total_amount,
                due_on: invoice.due_date,
                description: "Repayment of invoice to financier".to_string(),
            },
        ];

        Ok(Self {
            id,
            contract_number,
            invoice_id: invoice.id,
            offer_id: offer.id,
            bid_id: Some(bid.id),
            buyer,
            seller,
            financier: Some(financier),
            terms: ContractTerms::ThreeParty(terms),
            payment_legs,
            generated_at: now,
        })
    }
}

fn date(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn write_party(out: &mut String, label: &str, party: &PartyProfile) {
    let _ = writeln!(out, "{label}:");
    let _ = writeln!(out, "  {}", party.legal_name);
    let _ = writeln!(out, "  Registration: {}", party.registration_number);
    let _ = writeln!(out, "  Address: {}", party.address);
    let _ = writeln!(out, "  Contact: {}", party.contact_email);
}

fn party_name(contract: &Contract, entity_id: EntityId) -> &str {
    [Some(&contract.buyer), Some(&contract.seller), contract.financier.as_ref()]
        .into_iter()
        .flatten()
        .find(|p| p.entity_id == entity_id)
        .map(|p| p.legal_name.as_str())
        .unwrap_or("unknown party")
}

/// Render the contract's display text.
///
/// Depends on nothing but the snapshot, so the same contract always renders
/// to the same bytes.
pub fn render_contract(contract: &Contract) -> String {
    let mut out = String::new();
    let title = match contract.contract_type() {
        ContractType::TwoParty => "INVOICE DISCOUNTING AGREEMENT (TWO-PARTY)",
        ContractType::ThreeParty => "INVOICE FINANCING AGREEMENT (THREE-PARTY)",
    };

    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "Contract No: {}", contract.contract_number);
    let _ = writeln!(out, "Date: {}", date(contract.generated_at));
    let _ = writeln!(out);

    write_party(&mut out, "Buyer", &contract.buyer);
    write_party(&mut out, "Seller", &contract.seller);
    if let Some(financier) = &contract.financier {
        write_party(&mut out, "Financier", financier);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "TERMS");

    match &contract.terms {
        ContractTerms::TwoParty(t) => {
            let _ = writeln!(out, "  Invoice: {}", t.invoice_number);
            let _ = writeln!(out, "  Invoice total: {} {:.2}", t.currency, t.invoice_total);
            let _ = writeln!(out, "  Discount: {}", t.discount_percentage);
            let _ = writeln!(out, "  Discount amount: {} {:.2}", t.currency, t.discount_amount);
            let _ = writeln!(out, "  Seller receives: {} {:.2}", t.currency, t.seller_receives);
            let _ = writeln!(out, "  Early payment date: {}", date(t.early_payment_date));
            let _ = writeln!(out, "  Original due date: {}", date(t.original_due_date));
        }
        ContractTerms::ThreeParty(t) => {
            let _ = writeln!(out, "  Invoice: {}", t.invoice_number);
            let _ = writeln!(out, "  Invoice total: {} {:.2}", t.currency, t.invoice_total);
            let _ = writeln!(out, "  Annual discount rate: {}%", t.annual_discount_rate.normalize());
            let _ = writeln!(out, "  Haircut: {}%", t.haircut_percentage.normalize());
            let _ = writeln!(out, "  Processing fee: {} {:.2}", t.currency, t.processing_fee);
            let _ = writeln!(out, "  Days early: {}", t.days_early);
            let _ = writeln!(out, "  Net amount to seller: {} {:.2}", t.currency, t.net_amount);
            let _ = writeln!(out, "  Repayment by: {}", t.repayment_payer.role());
            let _ = writeln!(out, "  Repayment due: {}", date(t.due_date));
        }
    }

    let currency = match &contract.terms {
        ContractTerms::TwoParty(t) => &t.currency,
        ContractTerms::ThreeParty(t) => &t.currency,
    };
    let _ = writeln!(out);
    let _ = writeln!(out, "PAYMENT SCHEDULE");
    for (n, leg) in contract.payment_legs.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}. {} -> {}: {} {:.2} on {} ({})",
            n + 1,
            party_name(contract, leg.payer),
            party_name(contract, leg.payee),
            currency,
            leg.amount,
            date(leg.due_on),
            leg.description
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bid::BidTerms;
    use crate::ids::BidId;
    use crate::invoice::tests::{draft, now, party};
    use crate::invoice::{InvoiceStatus, ProductType};
    use crate::offer::{OfferResponse, OfferTerms};
    use crate::party::Actor;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn profile(entity_id: EntityId, name: &str) -> PartyProfile {
        PartyProfile {
            entity_id,
            legal_name: name.to_string(),
            registration_number: format!("REG-{name}"),
            address: "1 Harbour Road".to_string(),
            contact_email: format!("{}@example.test", name.to_lowercase()),
        }
    }

    fn accepted_offer(funding: FundingType) -> (Invoice, DiscountOffer) {
        let (buyer, seller) = (party(), party());
        let mut invoice = draft(buyer, seller, ProductType::DdEarlyPayment);
        let mut offer = DiscountOffer::create(
            OfferId::generate(),
            &invoice,
            &buyer,
            OfferTerms {
                discount_percentage: dec!(2),
                early_payment_date: now() + Duration::days(2),
            },
            Some(funding),
            Duration::hours(72),
            now(),
        )
        .unwrap();
        invoice.transition_to(InvoiceStatus::PendingAcceptance, now()).unwrap();
        offer.respond(OfferResponse::Accept, None, now()).unwrap();
        invoice.transition_to(InvoiceStatus::Accepted, now()).unwrap();
        (invoice, offer)
    }

    fn two_party() -> Contract {
        let (invoice, offer) = accepted_offer(FundingType::SelfFunded);
        Contract::two_party(
            ContractId::generate(),
            "SCF/2P/2026/000001".to_string(),
            &invoice,
            &offer,
            profile(invoice.buyer().unwrap(), "Acme"),
            profile(invoice.seller().unwrap(), "Forge"),
            now(),
        )
        .unwrap()
    }

    #[test]
    fn two_party_terms_snapshot_the_offer() {
        let contract = two_party();
        assert_eq!(contract.contract_type(), ContractType::TwoParty);
        match &contract.terms {
            ContractTerms::TwoParty(t) => {
                assert_eq!(t.discount_amount, dec!(2000));
                assert_eq!(t.seller_receives, dec!(98000));
            }
            other => panic!("unexpected terms {other:?}"),
        }
        assert_eq!(contract.payment_legs.len(), 1);
    }

    #[test]
    fn two_party_requires_self_funding() {
        let (invoice, offer) = accepted_offer(FundingType::FinancierFunded);
        let err = Contract::two_party(
            ContractId::generate(),
            "n".to_string(),
            &invoice,
            &offer,
            profile(invoice.buyer().unwrap(), "Acme"),
            profile(invoice.seller().unwrap(), "Forge"),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn three_party_has_two_legs_with_repayment_at_due_date() {
        let (mut invoice, offer) = accepted_offer(FundingType::FinancierFunded);
        let seller = invoice.seller().unwrap();
        invoice
            .open_for_bidding(
                &Actor::Seller(crate::party::PartyActor {
                    user_id: scf_core::UserId::new(),
                    entity_id: seller,
                }),
                now(),
            )
            .unwrap();
        let financier = party();
        let mut bid = Bid::place(
            BidId::generate(),
            &invoice,
            &financier,
            BidTerms {
                discount_rate: dec!(18),
                haircut_percentage: dec!(1),
                processing_fee: dec!(500),
                valid_until: now() + Duration::days(1),
            },
            now(),
        )
        .unwrap();
        bid.accept(now()).unwrap();

        let contract = Contract::three_party(
            ContractId::generate(),
            "SCF/3P/2026/000001".to_string(),
            &invoice,
            &offer,
            &bid,
            profile(invoice.buyer().unwrap(), "Acme"),
            profile(seller, "Forge"),
            profile(financier.entity_id, "Capital"),
            now(),
        )
        .unwrap();

        assert_eq!(contract.payment_legs.len(), 2);
        let repayment = &contract.payment_legs[1];
        assert_eq!(repayment.payer, invoice.buyer().unwrap());
        assert_eq!(repayment.payee, financier.entity_id);
        assert_eq!(repayment.due_on, invoice.due_date);
        assert!(render_contract(&contract).contains("Capital -> Forge"));
    }

    #[test]
    fn rendering_is_reproducible_from_stored_snapshot() {
        let contract = two_party();
        let stored = serde_json::to_string(&contract).unwrap();
        let restored: Contract = serde_json::from_str(&stored).unwrap();

        let text = render_contract(&contract);
        assert_eq!(text, render_contract(&restored));
        assert!(text.contains("Contract No: SCF/2P/2026/000001"));
        assert!(text.contains("Seller receives: INR 98000.00"));
    }
}
