//! Invoice record and its status state machine.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scf_core::{DomainError, DomainResult, Entity, EntityId, UserId};

use crate::ids::InvoiceId;
use crate::party::{Actor, Side};

/// Invoice status lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    PendingAcceptance,
    Accepted,
    Rejected,
    OpenForBidding,
    BidSelected,
    Disbursed,
    Settled,
    Disputed,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 10] = [
        InvoiceStatus::Draft,
        InvoiceStatus::PendingAcceptance,
        InvoiceStatus::Accepted,
        InvoiceStatus::Rejected,
        InvoiceStatus::OpenForBidding,
        InvoiceStatus::BidSelected,
        InvoiceStatus::Disbursed,
        InvoiceStatus::Settled,
        InvoiceStatus::Disputed,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::PendingAcceptance => "PENDING_ACCEPTANCE",
            InvoiceStatus::Accepted => "ACCEPTED",
            InvoiceStatus::Rejected => "REJECTED",
            InvoiceStatus::OpenForBidding => "OPEN_FOR_BIDDING",
            InvoiceStatus::BidSelected => "BID_SELECTED",
            InvoiceStatus::Disbursed => "DISBURSED",
            InvoiceStatus::Settled => "SETTLED",
            InvoiceStatus::Disputed => "DISPUTED",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// Allowed status transitions. Anything not listed is rejected.
    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;

        matches!(
            (self, next),
            (Draft, PendingAcceptance)
                | (Draft, Cancelled)
                | (PendingAcceptance, Accepted)
                | (PendingAcceptance, Rejected)
                | (PendingAcceptance, Draft)
                | (PendingAcceptance, Cancelled)
                | (Accepted, OpenForBidding)
                | (Accepted, Disbursed)
                | (Accepted, Cancelled)
                | (Accepted, Disputed)
                | (OpenForBidding, BidSelected)
                | (OpenForBidding, Cancelled)
                | (BidSelected, Disbursed)
                | (BidSelected, Disputed)
                | (Disbursed, Settled)
                | (Disbursed, Disputed)
        )
    }

    /// No workflow transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        InvoiceStatus::ALL
            .iter()
            .all(|next| !self.can_transition_to(*next))
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown invoice status '{s}'")))
    }
}

/// Financing product an invoice is uploaded under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    DynamicDiscounting,
    DdEarlyPayment,
    GstBacked,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::DynamicDiscounting => "DYNAMIC_DISCOUNTING",
            ProductType::DdEarlyPayment => "DD_EARLY_PAYMENT",
            ProductType::GstBacked => "GST_BACKED",
        }
    }

    /// Side that chooses the winning financier bid.
    pub fn bid_acceptor(self) -> Side {
        match self {
            ProductType::GstBacked => Side::Seller,
            ProductType::DdEarlyPayment | ProductType::DynamicDiscounting => Side::Buyer,
        }
    }

    /// Side that repays the financier at the original due date.
    pub fn repayment_payer(self) -> Side {
        match self {
            ProductType::GstBacked => Side::Seller,
            ProductType::DdEarlyPayment | ProductType::DynamicDiscounting => Side::Buyer,
        }
    }
}

impl core::fmt::Display for ProductType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who uploaded the invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uploader {
    pub user_id: UserId,
    pub side: Side,
    pub entity_id: EntityId,
}

/// Editable commercial details of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDetails {
    pub invoice_number: String,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
}

/// Largest accepted subtotal or tax amount, in currency units.
pub const MAX_INVOICE_AMOUNT: i64 = 1_000_000_000_000_000;

impl InvoiceDetails {
    pub fn total_amount(&self) -> DomainResult<Decimal> {
        self.subtotal
            .checked_add(self.tax_amount)
            .ok_or_else(|| DomainError::validation("invoice total is out of range"))
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice_number must not be empty"));
        }
        if self.subtotal <= Decimal::ZERO {
            return Err(DomainError::validation("subtotal must be positive"));
        }
        if self.tax_amount.is_sign_negative() {
            return Err(DomainError::validation("tax_amount must not be negative"));
        }
        let max = Decimal::from(MAX_INVOICE_AMOUNT);
        if self.subtotal > max || self.tax_amount > max {
            return Err(DomainError::validation(format!(
                "amounts must not exceed {MAX_INVOICE_AMOUNT}"
            )));
        }
        if self.due_date <= self.issue_date {
            return Err(DomainError::validation("due_date must be after issue_date"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::validation(
                "currency must be a three-letter ISO code",
            ));
        }
        Ok(())
    }
}

/// Command: upload a new invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInvoice {
    pub details: InvoiceDetails,
    pub product_type: ProductType,
    /// The other side of the trade, when already known.
    pub counterparty: Option<EntityId>,
}

/// Invoice record.
///
/// `buyer`/`seller` may be unset until the counterparty accepts; callers
/// narrow them through [`Invoice::require_party`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub product_type: ProductType,
    status: InvoiceStatus,
    buyer: Option<EntityId>,
    seller: Option<EntityId>,
    pub uploaded_by: Uploader,
    pub rejection_reason: Option<String>,
    pub dispute_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Invoice {
    type Id = InvoiceId;
    const KIND: &'static str = "invoice";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Invoice {
    /// Upload a new invoice.
    ///
    /// GST-backed invoices uploaded by a seller go straight to bidding;
    /// everything else starts as a draft.
    pub fn upload(
        id: InvoiceId,
        actor: &Actor,
        cmd: UploadInvoice,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let (side, party) = match actor {
            Actor::Buyer(p) => (Side::Buyer, p),
            Actor::Seller(p) => (Side::Seller, p),
            Actor::Financier(_) | Actor::Admin { .. } => {
                return Err(DomainError::forbidden(format!(
                    "{} cannot upload invoices",
                    actor.role()
                )));
            }
        };

        cmd.details.validate()?;
        if cmd.counterparty == Some(party.entity_id) {
            return Err(DomainError::validation(
                "counterparty must differ from the uploading entity",
            ));
        }

        let (buyer, seller) = match side {
            Side::Buyer => (Some(party.entity_id), cmd.counterparty),
            Side::Seller => (cmd.counterparty, Some(party.entity_id)),
        };

        let status = match (side, cmd.product_type) {
            (Side::Seller, ProductType::GstBacked) => InvoiceStatus::OpenForBidding,
            _ => InvoiceStatus::Draft,
        };

        let total_amount = cmd.details.total_amount()?;
        let InvoiceDetails {
            invoice_number,
            issue_date,
            due_date,
            subtotal,
            tax_amount,
            currency,
            description,
        } = cmd.details;

        Ok(Self {
            id,
            invoice_number,
            issue_date,
            due_date,
            subtotal,
            tax_amount,
            total_amount,
            currency,
            description,
            product_type: cmd.product_type,
            status,
            buyer,
            seller,
            uploaded_by: Uploader {
                user_id: party.user_id,
                side,
                entity_id: party.entity_id,
            },
            rejection_reason: None,
            dispute_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn buyer(&self) -> Option<EntityId> {
        self.buyer
    }

    pub fn seller(&self) -> Option<EntityId> {
        self.seller
    }

    pub fn party(&self, side: Side) -> Option<EntityId> {
        match side {
            Side::Buyer => self.buyer,
            Side::Seller => self.seller,
        }
    }

    /// Narrow an optional party reference; a missing party means the invoice
    /// has not progressed far enough for the requested action.
    pub fn require_party(&self, side: Side) -> DomainResult<EntityId> {
        self.party(side).ok_or_else(|| {
            DomainError::invalid_state(format!(
                "invoice {} has no linked {}",
                self.id,
                side.role()
            ))
        })
    }

    pub fn require_buyer(&self) -> DomainResult<EntityId> {
        self.require_party(Side::Buyer)
    }

    pub fn require_seller(&self) -> DomainResult<EntityId> {
        self.require_party(Side::Seller)
    }

    /// Which side of this invoice `entity_id` is on, if any.
    pub fn side_of(&self, entity_id: EntityId) -> Option<Side> {
        if self.buyer == Some(entity_id) {
            Some(Side::Buyer)
        } else if self.seller == Some(entity_id) {
            Some(Side::Seller)
        } else {
            None
        }
    }

    /// Whether the actor acts for the linked party on its own side.
    pub fn is_linked_party(&self, actor: &Actor) -> bool {
        match (actor.side(), actor.entity_id()) {
            (Some(side), Some(entity_id)) => self.party(side) == Some(entity_id),
            _ => false,
        }
    }

    /// Require the actor to be the linked party of `side`.
    pub fn ensure_linked(&self, actor: &Actor, side: Side) -> DomainResult<EntityId> {
        let linked = self.require_party(side)?;
        if actor.side() == Some(side) && actor.entity_id() == Some(linked) {
            Ok(linked)
        } else {
            Err(DomainError::forbidden(format!(
                "only the linked {} of invoice {} may do this",
                side.role(),
                self.id
            )))
        }
    }

    /// Link the party on `side` if unset. Returns `true` when a new link was made.
    pub fn link_party(&mut self, side: Side, entity_id: EntityId) -> DomainResult<bool> {
        let slot = match side {
            Side::Buyer => &mut self.buyer,
            Side::Seller => &mut self.seller,
        };
        match *slot {
            Some(existing) if existing == entity_id => Ok(false),
            Some(_) => Err(DomainError::forbidden(format!(
                "invoice {} is linked to a different {}",
                self.id,
                side.role()
            ))),
            None => {
                *slot = Some(entity_id);
                Ok(true)
            }
        }
    }

    pub fn ensure_status(&self, allowed: &[InvoiceStatus], action: &str) -> DomainResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::invalid_state(format!(
                "cannot {action} invoice {} in status {}",
                self.id, self.status
            )))
        }
    }

    /// Apply a status transition, validated against the transition table.
    pub fn transition_to(&mut self, next: InvoiceStatus, now: DateTime<Utc>) -> DomainResult<InvoiceStatus> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state(format!(
                "invoice {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        Ok(previous)
    }

    fn ensure_uploader(&self, actor: &Actor) -> DomainResult<()> {
        let is_uploader = actor.side() == Some(self.uploaded_by.side)
            && actor.entity_id() == Some(self.uploaded_by.entity_id);
        if is_uploader {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!(
                "only the uploading party may modify invoice {}",
                self.id
            )))
        }
    }

    /// Require the actor to be on the counterparty side, linking it if the
    /// counterparty reference is still unset. Returns `true` on a new link.
    fn claim_counterparty(&mut self, actor: &Actor) -> DomainResult<bool> {
        let side = self.uploaded_by.side.opposite();
        match (actor.side(), actor.entity_id()) {
            (Some(actor_side), Some(entity_id)) if actor_side == side => {
                self.link_party(side, entity_id)
            }
            _ => Err(DomainError::forbidden(format!(
                "only the {} counterparty may respond to invoice {}",
                side.role(),
                self.id
            ))),
        }
    }

    pub fn update_draft(
        &mut self,
        actor: &Actor,
        details: InvoiceDetails,
        counterparty: Option<EntityId>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_uploader(actor)?;
        self.ensure_status(&[InvoiceStatus::Draft], "update")?;
        details.validate()?;

        if let Some(entity_id) = counterparty {
            if entity_id == self.uploaded_by.entity_id {
                return Err(DomainError::validation(
                    "counterparty must differ from the uploading entity",
                ));
            }
            match self.uploaded_by.side.opposite() {
                Side::Buyer => self.buyer = Some(entity_id),
                Side::Seller => self.seller = Some(entity_id),
            }
        }

        self.total_amount = details.total_amount()?;
        self.invoice_number = details.invoice_number;
        self.issue_date = details.issue_date;
        self.due_date = details.due_date;
        self.subtotal = details.subtotal;
        self.tax_amount = details.tax_amount;
        self.currency = details.currency;
        self.description = details.description;
        self.updated_at = now;
        Ok(())
    }

    /// Drafts are the only invoices that may be deleted.
    pub fn ensure_deletable(&self, actor: &Actor) -> DomainResult<()> {
        self.ensure_uploader(actor)?;
        self.ensure_status(&[InvoiceStatus::Draft], "delete")
    }

    pub fn submit(&mut self, actor: &Actor, now: DateTime<Utc>) -> DomainResult<InvoiceStatus> {
        self.ensure_uploader(actor)?;
        self.ensure_status(&[InvoiceStatus::Draft], "submit")?;
        self.transition_to(InvoiceStatus::PendingAcceptance, now)
    }

    /// Counterparty acceptance. Returns `true` when the counterparty was newly linked.
    pub fn accept(&mut self, actor: &Actor, now: DateTime<Utc>) -> DomainResult<bool> {
        self.ensure_status(&[InvoiceStatus::PendingAcceptance], "accept")?;
        let linked = self.claim_counterparty(actor)?;
        self.transition_to(InvoiceStatus::Accepted, now)?;
        Ok(linked)
    }

    pub fn reject(&mut self, actor: &Actor, reason: Option<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(&[InvoiceStatus::PendingAcceptance], "reject")?;
        self.claim_counterparty(actor)?;
        self.transition_to(InvoiceStatus::Rejected, now)?;
        self.rejection_reason = reason;
        Ok(())
    }

    pub fn open_for_bidding(&mut self, actor: &Actor, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(&[InvoiceStatus::Accepted], "open for bidding")?;
        self.require_seller()?;
        match actor.side() {
            Some(side) => {
                self.ensure_linked(actor, side)?;
            }
            None => {
                return Err(DomainError::forbidden(
                    "only the seller or linked buyer may open bidding",
                ));
            }
        }
        self.transition_to(InvoiceStatus::OpenForBidding, now)?;
        Ok(())
    }

    pub fn cancel(&mut self, actor: &Actor, now: DateTime<Utc>) -> DomainResult<InvoiceStatus> {
        if self.ensure_uploader(actor).is_err() && !self.is_linked_party(actor) {
            return Err(DomainError::forbidden(format!(
                "only a party to invoice {} may cancel it",
                self.id
            )));
        }
        self.ensure_status(
            &[
                InvoiceStatus::Draft,
                InvoiceStatus::PendingAcceptance,
                InvoiceStatus::Accepted,
                InvoiceStatus::OpenForBidding,
            ],
            "cancel",
        )?;
        self.transition_to(InvoiceStatus::Cancelled, now)
    }

    pub fn dispute(&mut self, actor: &Actor, reason: String, now: DateTime<Utc>) -> DomainResult<InvoiceStatus> {
        if !actor.is_admin() && !self.is_linked_party(actor) {
            return Err(DomainError::forbidden(format!(
                "only a linked party or admin may dispute invoice {}",
                self.id
            )));
        }
        if reason.trim().is_empty() {
            return Err(DomainError::validation("dispute reason must not be empty"));
        }
        self.ensure_status(
            &[
                InvoiceStatus::Accepted,
                InvoiceStatus::BidSelected,
                InvoiceStatus::Disbursed,
            ],
            "dispute",
        )?;
        let previous = self.transition_to(InvoiceStatus::Disputed, now)?;
        self.dispute_reason = Some(reason);
        Ok(previous)
    }

    /// Days between `now` and the due date, rounded up. Zero or negative once due.
    pub fn days_until_due(&self, now: DateTime<Utc>) -> i64 {
        let secs = (self.due_date - now).num_seconds();
        secs.div_euclid(86_400) + i64::from(secs.rem_euclid(86_400) > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::party::PartyActor;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    pub(crate) fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    pub(crate) fn party() -> PartyActor {
        PartyActor {
            user_id: UserId::new(),
            entity_id: EntityId::new(),
        }
    }

    pub(crate) fn details(total: Decimal, due_in_days: i64) -> InvoiceDetails {
        InvoiceDetails {
            invoice_number: "INV-0042".to_string(),
            issue_date: now() - Duration::days(5),
            due_date: now() + Duration::days(due_in_days),
            subtotal: total,
            tax_amount: Decimal::ZERO,
            currency: "INR".to_string(),
            description: Some("steel coils".to_string()),
        }
    }

    /// Buyer-uploaded invoice with a known seller, in `DRAFT`.
    pub(crate) fn draft(buyer: PartyActor, seller: PartyActor, product_type: ProductType) -> Invoice {
        Invoice::upload(
            InvoiceId::generate(),
            &Actor::Buyer(buyer),
            UploadInvoice {
                details: details(dec!(100000), 30),
                product_type,
                counterparty: Some(seller.entity_id),
            },
            now(),
        )
        .unwrap()
    }

    #[test]
    fn transition_table_has_expected_terminals() {
        let terminals: Vec<_> = InvoiceStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminals,
            vec![
                InvoiceStatus::Rejected,
                InvoiceStatus::Settled,
                InvoiceStatus::Disputed,
                InvoiceStatus::Cancelled
            ]
        );
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in InvoiceStatus::ALL {
            assert_eq!(status.as_str().parse::<InvoiceStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
    }

    #[test]
    fn gst_backed_seller_upload_starts_open_for_bidding() {
        let seller = party();
        let invoice = Invoice::upload(
            InvoiceId::generate(),
            &Actor::Seller(seller),
            UploadInvoice {
                details: details(dec!(50000), 45),
                product_type: ProductType::GstBacked,
                counterparty: None,
            },
            now(),
        )
        .unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::OpenForBidding);
        assert_eq!(invoice.seller(), Some(seller.entity_id));
        assert_eq!(invoice.buyer(), None);
    }

    #[test]
    fn upload_validates_amounts_and_dates() {
        let mut bad = details(dec!(100), 10);
        bad.due_date = bad.issue_date;
        let err = Invoice::upload(
            InvoiceId::generate(),
            &Actor::Buyer(party()),
            UploadInvoice {
                details: bad,
                product_type: ProductType::DynamicDiscounting,
                counterparty: None,
            },
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = Invoice::upload(
            InvoiceId::generate(),
            &Actor::Financier(party()),
            UploadInvoice {
                details: details(dec!(100), 10),
                product_type: ProductType::DynamicDiscounting,
                counterparty: None,
            },
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn oversized_amounts_are_rejected_without_overflow() {
        let mut huge = details(Decimal::MAX, 10);
        huge.tax_amount = Decimal::ONE;
        assert!(matches!(huge.validate(), Err(DomainError::Validation(_))));
        assert!(matches!(huge.total_amount(), Err(DomainError::Validation(_))));

        let err = Invoice::upload(
            InvoiceId::generate(),
            &Actor::Buyer(party()),
            UploadInvoice {
                details: huge,
                product_type: ProductType::DynamicDiscounting,
                counterparty: None,
            },
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut at_cap = details(Decimal::from(MAX_INVOICE_AMOUNT), 10);
        at_cap.tax_amount = Decimal::from(MAX_INVOICE_AMOUNT);
        at_cap.validate().unwrap();
        assert_eq!(
            at_cap.total_amount().unwrap(),
            Decimal::from(2 * MAX_INVOICE_AMOUNT)
        );
    }

    #[test]
    fn only_uploader_submits_and_only_counterparty_accepts() {
        let (buyer, seller) = (party(), party());
        let mut invoice = draft(buyer, seller, ProductType::DynamicDiscounting);

        assert!(matches!(
            invoice.submit(&Actor::Seller(seller), now()),
            Err(DomainError::Forbidden(_))
        ));
        invoice.submit(&Actor::Buyer(buyer), now()).unwrap();

        assert!(matches!(
            invoice.accept(&Actor::Buyer(buyer), now()),
            Err(DomainError::Forbidden(_))
        ));
        let linked = invoice.accept(&Actor::Seller(seller), now()).unwrap();
        assert!(!linked);
        assert_eq!(invoice.status(), InvoiceStatus::Accepted);
    }

    #[test]
    fn accepting_links_an_unset_counterparty() {
        let buyer = party();
        let mut invoice = Invoice::upload(
            InvoiceId::generate(),
            &Actor::Buyer(buyer),
            UploadInvoice {
                details: details(dec!(1000), 30),
                product_type: ProductType::DdEarlyPayment,
                counterparty: None,
            },
            now(),
        )
        .unwrap();
        invoice.submit(&Actor::Buyer(buyer), now()).unwrap();

        let seller = party();
        assert!(invoice.accept(&Actor::Seller(seller), now()).unwrap());
        assert_eq!(invoice.require_seller().unwrap(), seller.entity_id);
    }

    #[test]
    fn wrong_state_is_never_coerced() {
        let (buyer, seller) = (party(), party());
        let mut invoice = draft(buyer, seller, ProductType::DynamicDiscounting);

        let err = invoice.accept(&Actor::Seller(seller), now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(invoice.status(), InvoiceStatus::Draft);

        let err = invoice
            .transition_to(InvoiceStatus::Settled, now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn days_until_due_rounds_up_partial_days() {
        let (buyer, seller) = (party(), party());
        let invoice = draft(buyer, seller, ProductType::DynamicDiscounting);

        assert_eq!(invoice.days_until_due(now()), 30);
        assert_eq!(invoice.days_until_due(now() + Duration::hours(1)), 30);
        assert_eq!(invoice.days_until_due(now() + Duration::days(30)), 0);
        assert_eq!(invoice.days_until_due(now() + Duration::days(31)), -1);
    }
}
