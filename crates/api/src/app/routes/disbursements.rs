use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use scf_auth::Permission;
use scf_financing::{BidId, DisbursementId, InvoiceId, RepaymentId};

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/:id/status", post(advance_disbursement))
}

pub fn repayments_router() -> Router {
    Router::new()
        .route("/:id/paid", post(mark_repayment_paid))
        .route("/:id/defaulted", post(mark_repayment_defaulted))
}

/// Winning financier releases funds against an accepted bid.
pub async fn disburse_bid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::DISBURSE) {
        return r;
    }
    let bid_id: BidId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .ledger
        .disburse_bid(principal.actor(), bid_id, Utc::now())
        .await;
    common::respond(StatusCode::CREATED, result)
}

pub async fn disbursement_for_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_READ) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .ledger
        .disbursement_for_invoice(principal.actor(), invoice_id)
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn advance_disbursement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DisbursementStatusRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::DISBURSEMENT_CONFIRM) {
        return r;
    }
    let disbursement_id: DisbursementId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .ledger
        .advance_disbursement(
            principal.actor(),
            disbursement_id,
            body.status,
            body.payment_reference,
            body.failure_reason,
            Utc::now(),
        )
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn mark_repayment_paid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::REPAYMENT_SETTLE) {
        return r;
    }
    let repayment_id: RepaymentId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .ledger
        .mark_repayment_paid(principal.actor(), repayment_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn mark_repayment_defaulted(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::REPAYMENT_DEFAULT) {
        return r;
    }
    let repayment_id: RepaymentId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .ledger
        .mark_repayment_defaulted(principal.actor(), repayment_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}
