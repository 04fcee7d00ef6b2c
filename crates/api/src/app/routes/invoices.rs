use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use scf_auth::Permission;
use scf_financing::InvoiceId;

use crate::app::dto;
use crate::app::routes::{bids, common, offers};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(upload_invoice).get(list_invoices))
        .route("/:id", get(get_invoice).put(update_invoice).delete(delete_invoice))
        .route("/:id/submit", post(submit_invoice))
        .route("/:id/accept", post(accept_invoice))
        .route("/:id/reject", post(reject_invoice))
        .route("/:id/open-bidding", post(open_bidding))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/dispute", post(dispute_invoice))
        .route("/:id/offers", post(offers::create_offer))
        .route("/:id/offer", get(offers::offer_for_invoice))
        .route("/:id/bids", post(bids::place_bid).get(bids::list_bids))
        .route("/:id/disbursement", get(super::disbursements::disbursement_for_invoice))
}

pub async fn upload_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::UploadInvoiceRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_UPLOAD) {
        return r;
    }
    let result = services
        .workflow
        .lifecycle
        .upload(principal.actor(), body.into(), Utc::now())
        .await;
    common::respond(StatusCode::CREATED, result)
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListInvoicesQuery>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_READ) {
        return r;
    }
    let result = services
        .workflow
        .lifecycle
        .list(principal.actor(), query.status)
        .await
        .map(dto::Items::from);
    common::respond(StatusCode::OK, result)
}

pub async fn get_invoice(
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
    let result = services.workflow.lifecycle.get(principal.actor(), invoice_id).await;
    common::respond(StatusCode::OK, result)
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::InvoiceDetailsRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_UPLOAD) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let (details, counterparty) = body.into_parts();
    let result = services
        .workflow
        .lifecycle
        .update_draft(principal.actor(), invoice_id, details, counterparty, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_UPLOAD) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match services
        .workflow
        .lifecycle
        .delete_draft(principal.actor(), invoice_id, Utc::now())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => crate::app::errors::workflow_error_to_response(e),
    }
}

pub async fn submit_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_UPLOAD) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .lifecycle
        .submit(principal.actor(), invoice_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn accept_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_RESPOND) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .lifecycle
        .accept(principal.actor(), invoice_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn reject_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_RESPOND) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    let result = services
        .workflow
        .lifecycle
        .reject(principal.actor(), invoice_id, reason, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn open_bidding(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_UPLOAD) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .lifecycle
        .open_for_bidding(principal.actor(), invoice_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_UPLOAD) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .lifecycle
        .cancel(principal.actor(), invoice_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn dispute_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DisputeRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::INVOICE_DISPUTE) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .lifecycle
        .dispute(principal.actor(), invoice_id, body.reason, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}
