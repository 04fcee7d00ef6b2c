//! Invoice financing domain (pure, deterministic; no IO, no HTTP, no storage).
//!
//! Records and their state machines:
//!
//! - [`invoice`]: invoice lifecycle and the status transition table
//! - [`offer`]: buyer discount offers, revisions and funding-type choice
//! - [`bid`]: financier bids and the prorated pricing algorithm
//! - [`disbursement`]: disbursements and financier repayments
//! - [`contract`]: immutable contract snapshots and their rendering
//!
//! Cross-record invariants (one active offer per invoice, one accepted bid,
//! ...) need a transactional store and are enforced by `scf-infra`.

pub mod audit;
pub mod bid;
pub mod contract;
pub mod disbursement;
pub mod ids;
pub mod invoice;
pub mod notification;
pub mod offer;
pub mod party;
pub mod relationship;

pub use audit::{AuditChange, AuditRecord};
pub use bid::{Bid, BidPricing, BidStatus, BidTerms, price_bid};
pub use contract::{
    Contract, ContractTerms, ContractType, PaymentLeg, ThreePartyTerms, TwoPartyTerms,
    render_contract,
};
pub use disbursement::{
    Disbursement, DisbursementSource, DisbursementStatus, Repayment, RepaymentStatus,
};
pub use ids::{BankAccountId, BidId, ContractId, DisbursementId, InvoiceId, OfferId, RepaymentId};
pub use invoice::{Invoice, InvoiceDetails, InvoiceStatus, ProductType, UploadInvoice, Uploader};
pub use notification::{Notification, NotificationKind, Recipient, Subject};
pub use offer::{
    DEFAULT_OFFER_TTL_HOURS, DiscountOffer, FundingType, MAX_REVISIONS, OfferResponse,
    OfferStatus, OfferTerms, ResponseOutcome, discounted_amount,
};
pub use party::{Actor, PartyActor, PartyProfile, Side};
pub use relationship::RelationshipEvent;
