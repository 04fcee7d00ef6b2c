use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scf_core::{EntityId, Role, UserId};
use scf_financing::{
    BankAccountId, DisbursementStatus, FundingType, InvoiceDetails, InvoiceStatus, OfferResponse,
    OfferTerms, ProductType, UploadInvoice,
};

// -------------------------
// Request DTOs
// -------------------------

/// Invoice body shared by upload and draft edits.
#[derive(Debug, Deserialize)]
pub struct InvoiceDetailsRequest {
    pub invoice_number: String,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    /// The other side of the trade, when already known.
    #[serde(default)]
    pub counterparty_entity_id: Option<EntityId>,
}

impl InvoiceDetailsRequest {
    pub fn into_parts(self) -> (InvoiceDetails, Option<EntityId>) {
        (
            InvoiceDetails {
                invoice_number: self.invoice_number,
                issue_date: self.issue_date,
                due_date: self.due_date,
                subtotal: self.subtotal,
                tax_amount: self.tax_amount,
                currency: self.currency,
                description: self.description,
            },
            self.counterparty_entity_id,
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadInvoiceRequest {
    pub product_type: ProductType,
    #[serde(flatten)]
    pub details: InvoiceDetailsRequest,
}

impl From<UploadInvoiceRequest> for UploadInvoice {
    fn from(req: UploadInvoiceRequest) -> Self {
        let (details, counterparty) = req.details.into_parts();
        UploadInvoice {
            details,
            product_type: req.product_type,
            counterparty,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<InvoiceStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    #[serde(flatten)]
    pub terms: OfferTerms,
    #[serde(default)]
    pub funding_type: Option<FundingType>,
}

#[derive(Debug, Deserialize)]
pub struct RespondOfferRequest {
    pub response: OfferResponse,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FundingTypeRequest {
    pub funding_type: FundingType,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizePaymentRequest {
    pub bank_account_id: BankAccountId,
}

#[derive(Debug, Deserialize)]
pub struct DisbursementStatusRequest {
    pub status: DisbursementStatus,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub user_id: UserId,
    pub role: Role,
    pub entity_id: Option<EntityId>,
}

#[derive(Debug, Serialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for Items<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}
