use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use chrono::Utc;

use scf_auth::Permission;
use scf_financing::{BidId, BidTerms, InvoiceId};

use crate::app::dto;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id", put(update_bid))
        .route("/:id/withdraw", post(withdraw_bid))
        .route("/:id/accept", post(accept_bid))
        .route("/:id/disburse", post(super::disbursements::disburse_bid))
}

/// Invoices open for bidding whose sellers passed KYC.
pub async fn marketplace(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::MARKETPLACE_READ) {
        return r;
    }
    let result = services
        .workflow
        .auction
        .marketplace(principal.actor())
        .await
        .map(dto::Items::from);
    common::respond(StatusCode::OK, result)
}

pub async fn place_bid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(terms): Json<BidTerms>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::BID_PLACE) {
        return r;
    }
    let invoice_id: InvoiceId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .auction
        .place_bid(principal.actor(), invoice_id, terms, Utc::now())
        .await;
    common::respond(StatusCode::CREATED, result)
}

pub async fn list_bids(
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
        .auction
        .list_bids(principal.actor(), invoice_id)
        .await
        .map(dto::Items::from);
    common::respond(StatusCode::OK, result)
}

pub async fn update_bid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(terms): Json<BidTerms>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::BID_PLACE) {
        return r;
    }
    let bid_id: BidId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .auction
        .update_bid(principal.actor(), bid_id, terms, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn withdraw_bid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::BID_PLACE) {
        return r;
    }
    let bid_id: BidId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .auction
        .withdraw_bid(principal.actor(), bid_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}

pub async fn accept_bid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::BID_ACCEPT) {
        return r;
    }
    let bid_id: BidId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .auction
        .accept_bid(principal.actor(), bid_id, Utc::now())
        .await;
    common::respond(StatusCode::OK, result)
}
