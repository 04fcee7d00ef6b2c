//! End-to-end flows across the workflow components, on in-memory adapters.

use rust_decimal_macros::dec;
use scf_events::{EventBus, Projection};
use scf_financing::{
    Actor, BankAccountId, BidStatus, ContractType, DisbursementStatus, FundingType, InvoiceStatus,
    NotificationKind, OfferStatus, RelationshipEvent,
};

use crate::error::WorkflowError;
use crate::ports::KycStatus;
use crate::relationships::{RelationshipKind, RelationshipTracker};
use crate::test_support::{admin, bid_terms, buyer, financier, now, offer_terms, seller, Harness};
use crate::workflow::ContractOutcome;

#[tokio::test]
async fn self_funded_offer_runs_to_settlement_with_a_two_party_contract() {
    let h = Harness::new();
    let (b, s) = (buyer(), seller());
    let (offer, invoice) = h.accepted_offer(&b, &s).await;
    assert_eq!(invoice.status(), InvoiceStatus::Accepted);

    h.workflow
        .negotiation
        .select_funding_type(&Actor::Buyer(b), offer.id, FundingType::SelfFunded, now())
        .await
        .unwrap();

    let account = BankAccountId::generate();
    h.adapters.bank_accounts.register(account, b.entity_id);
    let authorization = h
        .workflow
        .negotiation
        .authorize_payment(&Actor::Buyer(b), offer.id, account, now())
        .await
        .unwrap();

    let contract_id = match authorization.contract {
        ContractOutcome::Generated {
            contract_id,
            ref contract_number,
        } => {
            assert_eq!(contract_number, "SCF/2P/2026/000001");
            contract_id
        }
        ref other => panic!("expected a generated contract, got {other:?}"),
    };

    let contract = h
        .workflow
        .contracts
        .get_contract(&Actor::Seller(s), contract_id)
        .await
        .unwrap();
    assert_eq!(contract.contract_type(), ContractType::TwoParty);
    assert!(contract.financier.is_none());

    // Re-running the generator returns the same contract.
    let again = h.workflow.contracts.generate_two_party(offer.id, now()).await.unwrap();
    assert_eq!(again.id, contract_id);

    let view = h
        .workflow
        .ledger
        .disbursement_for_invoice(&Actor::Seller(s), invoice.id)
        .await
        .unwrap();
    assert!(view.repayment.is_none());
    assert_eq!(view.disbursement.amount, offer.discounted_amount);

    let operator = admin();
    let disbursement_id = view.disbursement.id;
    h.workflow
        .ledger
        .advance_disbursement(&operator, disbursement_id, DisbursementStatus::Processing, None, None, now())
        .await
        .unwrap();
    h.workflow
        .ledger
        .advance_disbursement(
            &operator,
            disbursement_id,
            DisbursementStatus::Completed,
            Some("UTR-884213".to_string()),
            None,
            now(),
        )
        .await
        .unwrap();

    let settled = h.workflow.lifecycle.get(&Actor::Buyer(b), invoice.id).await.unwrap();
    assert_eq!(settled.status(), InvoiceStatus::Settled);

    let first = h
        .workflow
        .contracts
        .render_document(&Actor::Buyer(b), contract_id)
        .await
        .unwrap();
    let second = h
        .workflow
        .contracts
        .render_document(&Actor::Buyer(b), contract_id)
        .await
        .unwrap();
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(first.file_name, "SCF-2P-2026-000001.txt");
}

#[tokio::test]
async fn financier_funded_offer_goes_through_the_auction() {
    let h = Harness::new();
    let (b, s) = (buyer(), seller());
    let (f1, f2) = (financier(), financier());
    h.register(&f1, "Northwind Capital");
    h.register(&f2, "Meridian Finance");
    h.adapters.kyc.set_status(s.entity_id, KycStatus::Verified);

    let (offer, _) = h.accepted_offer(&b, &s).await;
    let resolution = h
        .workflow
        .negotiation
        .select_funding_type(&Actor::Seller(s), offer.id, FundingType::FinancierFunded, now())
        .await
        .unwrap();
    assert_eq!(resolution.invoice.status(), InvoiceStatus::OpenForBidding);
    let invoice_id = resolution.invoice.id;

    let listed = h.workflow.auction.marketplace(&Actor::Financier(f1)).await.unwrap();
    assert!(listed.iter().any(|i| i.id == invoice_id));

    let cheap = h
        .workflow
        .auction
        .place_bid(&Actor::Financier(f1), invoice_id, bid_terms(dec!(12)), now())
        .await
        .unwrap();
    let dear = h
        .workflow
        .auction
        .place_bid(&Actor::Financier(f2), invoice_id, bid_terms(dec!(20)), now())
        .await
        .unwrap();
    assert!(cheap.net_amount > dear.net_amount);

    // Dynamic discounting bids are chosen by the buyer.
    let denied = h.workflow.auction.accept_bid(&Actor::Seller(s), cheap.id, now()).await;
    assert!(matches!(denied, Err(WorkflowError::Forbidden(_))));

    let acceptance = h
        .workflow
        .auction
        .accept_bid(&Actor::Buyer(b), cheap.id, now())
        .await
        .unwrap();
    assert_eq!(acceptance.rejected, vec![dear.id]);
    assert_eq!(acceptance.invoice.status(), InvoiceStatus::BidSelected);
    let contract_id = match acceptance.contract {
        ContractOutcome::Generated { contract_id, .. } => contract_id,
        other => panic!("expected a generated contract, got {other:?}"),
    };

    let contract = h
        .workflow
        .contracts
        .get_contract(&Actor::Financier(f1), contract_id)
        .await
        .unwrap();
    assert_eq!(contract.contract_type(), ContractType::ThreeParty);
    assert_eq!(contract.bid_id, Some(cheap.id));
    assert!(h
        .workflow
        .contracts
        .get_contract(&Actor::Financier(f2), contract_id)
        .await
        .is_err());

    let financed = h
        .workflow
        .ledger
        .disburse_bid(&Actor::Financier(f1), cheap.id, now())
        .await
        .unwrap();
    assert_eq!(financed.disbursement.amount, cheap.net_amount);
    assert_eq!(financed.repayment.payer, b.entity_id);
    assert_eq!(financed.repayment.payee, f1.entity_id);
    assert_eq!(financed.invoice.status(), InvoiceStatus::Disbursed);

    h.workflow
        .ledger
        .mark_repayment_paid(&Actor::Financier(f1), financed.repayment.id, now())
        .await
        .unwrap();
    let settled = h.workflow.lifecycle.get(&Actor::Seller(s), invoice_id).await.unwrap();
    assert_eq!(settled.status(), InvoiceStatus::Settled);

    let losing = h
        .adapters
        .notifications
        .sent()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::BidRejected && n.recipient.entity_id == f2.entity_id)
        .count();
    assert_eq!(losing, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bid_acceptances_select_exactly_one() {
    let h = Harness::new();
    let s = seller();
    let invoice = h.gst_invoice(&s).await;

    let mut bids = Vec::new();
    for rate in [dec!(14), dec!(15), dec!(16), dec!(17)] {
        let f = financier();
        let bid = h
            .workflow
            .auction
            .place_bid(&Actor::Financier(f), invoice.id, bid_terms(rate), now())
            .await
            .unwrap();
        bids.push(bid.id);
    }

    let attempts: Vec<_> = bids
        .iter()
        .map(|&bid_id| {
            let auction = h.workflow.auction.clone();
            tokio::spawn(async move { auction.accept_bid(&Actor::Seller(s), bid_id, now()).await })
        })
        .collect();

    let mut accepted = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(WorkflowError::Conflict(_)) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }
    assert_eq!(accepted, 1);

    let final_bids = h.workflow.auction.list_bids(&Actor::Seller(s), invoice.id).await.unwrap();
    assert_eq!(final_bids.iter().filter(|b| b.status() == BidStatus::Accepted).count(), 1);
    assert_eq!(final_bids.iter().filter(|b| b.status() == BidStatus::Rejected).count(), 3);
}

#[tokio::test]
async fn late_response_to_an_expired_offer_is_refused() {
    let h = Harness::new();
    let (b, s) = (buyer(), seller());
    h.register(&b, "Apex Motors");
    let invoice = h.draft_invoice(&s, Some(b.entity_id)).await;
    let offer = h
        .workflow
        .negotiation
        .create_offer(&Actor::Buyer(b), invoice.id, offer_terms(dec!(2)), None, now())
        .await
        .unwrap()
        .offer;

    let after_expiry = offer.expires_at + chrono::Duration::minutes(1);
    let report = h.workflow.negotiation.sweep_expired_offers(after_expiry).await.unwrap();
    assert_eq!(report.updated, 1);

    let late = h
        .workflow
        .negotiation
        .respond(
            &Actor::Seller(s),
            offer.id,
            scf_financing::OfferResponse::Accept,
            None,
            after_expiry,
        )
        .await;
    assert!(matches!(late, Err(WorkflowError::Conflict(_))));

    let current = h
        .workflow
        .negotiation
        .offer_for_invoice(&Actor::Buyer(b), invoice.id)
        .await
        .unwrap();
    assert_eq!(current.status(), OfferStatus::Expired);
}

#[tokio::test]
async fn cancelling_an_open_invoice_rejects_its_bids() {
    let h = Harness::new();
    let s = seller();
    let invoice = h.gst_invoice(&s).await;
    let f = financier();
    let bid = h
        .workflow
        .auction
        .place_bid(&Actor::Financier(f), invoice.id, bid_terms(dec!(15)), now())
        .await
        .unwrap();

    let cancelled = h.workflow.lifecycle.cancel(&Actor::Seller(s), invoice.id, now()).await.unwrap();
    assert_eq!(cancelled.status(), InvoiceStatus::Cancelled);

    let bids = h.workflow.auction.list_bids(&Actor::Seller(s), invoice.id).await.unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].id, bid.id);
    assert_eq!(bids[0].status(), BidStatus::Rejected);

    let late = h
        .workflow
        .auction
        .place_bid(&Actor::Financier(financier()), invoice.id, bid_terms(dec!(15)), now())
        .await;
    assert!(matches!(late, Err(WorkflowError::Conflict(_))));
}

#[tokio::test]
async fn workflow_activity_feeds_the_relationship_tracker() {
    let h = Harness::new();
    let subscription = h.adapters.relationships.subscribe();
    let (b, s, f) = (buyer(), seller(), financier());

    let bid = h.selected_gst_bid(&b, &s, &f).await;

    let mut tracker = RelationshipTracker::new();
    let events = subscription.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e.payload(), RelationshipEvent::FinancierSellerEngaged { .. })));
    for event in &events {
        tracker.apply(event);
    }

    let engaged = tracker
        .get(RelationshipKind::FinancierSeller, f.entity_id, s.entity_id)
        .unwrap();
    assert!(engaged.invoices.contains(&bid.invoice_id));
    let linked = tracker
        .get(RelationshipKind::BuyerSeller, b.entity_id, s.entity_id)
        .unwrap();
    assert!(linked.invoices.contains(&bid.invoice_id));
}
