use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use scf_auth::Permission;
use scf_financing::{InvoiceId, OfferId, OfferTerms};

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id/respond", post(respond_to_offer))
        .route("/:id/revise", post(revise_offer))
        .route("/:id/funding-type", post(select_funding_type))
        .route("/:id/authorize-payment", post(authorize_payment))
        .route("/:id/cancel", post(cancel_offer))
}

pub async fn create_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CreateOfferRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OFFER_CREATE) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .negotiation
        .create_offer(principal.actor(), invoice_id, body.terms, body.funding_type, Utc::now())
        .await;
    common::respond(StatusCode::CREATED, result)
}

pub async fn offer_for_invoice(
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
        .negotiation
        .offer_for_invoice(principal.actor(), invoice_id)
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn respond_to_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RespondOfferRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OFFER_RESPOND) {
        return r;
    }
    let offer_id: OfferId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .negotiation
        .respond(principal.actor(), offer_id, body.response, body.reason, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn revise_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(terms): Json<OfferTerms>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OFFER_CREATE) {
        return r;
    }
    let offer_id: OfferId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .negotiation
        .revise_offer(principal.actor(), offer_id, terms, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn select_funding_type(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::FundingTypeRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::FUNDING_SELECT) {
        return r;
    }
    let offer_id: OfferId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .negotiation
        .select_funding_type(principal.actor(), offer_id, body.funding_type, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn authorize_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AuthorizePaymentRequest>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::PAYMENT_AUTHORIZE) {
        return r;
    }
    let offer_id: OfferId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .negotiation
        .authorize_payment(principal.actor(), offer_id, body.bank_account_id, Utc::now())
        .await;
    common::respond(StatusCode::CREATED, result)
}

pub async fn cancel_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OFFER_CREATE) {
        return r;
    }
    let offer_id: OfferId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .negotiation
        .cancel_offer(principal.actor(), offer_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}
