//! Operator endpoints: manual sweeps and the contract dead-letter queue.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use uuid::Uuid;

use scf_auth::Permission;
use scf_infra::jobs::JobId;

use crate::app::dto;
use crate::app::errors;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

const DEFAULT_DEAD_LETTER_LIMIT: usize = 100;

pub fn router() -> Router {
    Router::new()
        .route("/sweeps/offers", post(sweep_offers))
        .route("/sweeps/bids", post(sweep_bids))
        .route("/sweeps/repayments", post(sweep_repayments))
        .route("/contract-jobs/dead-letters", get(list_dead_letters))
        .route("/contract-jobs/:id/retry", post(retry_dead_letter))
}

pub async fn sweep_offers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OPERATIONS) {
        return r;
    }
    let result = services.workflow.negotiation.sweep_expired_offers(Utc::now()).await;
    common::respond(StatusCode::OK, result)
}

pub async fn sweep_bids(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OPERATIONS) {
        return r;
    }
    let result = services.workflow.auction.sweep_expired_bids(Utc::now()).await;
    common::respond(StatusCode::OK, result)
}

pub async fn sweep_repayments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OPERATIONS) {
        return r;
    }
    let result = services.workflow.ledger.sweep_overdue(Utc::now()).await;
    common::respond(StatusCode::OK, result)
}

pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::DeadLetterQuery>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OPERATIONS) {
        return r;
    }
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT);
    let result = services
        .workflow
        .outbox
        .list_dead_letters(limit)
        .map(dto::Items::from);
    common::respond(StatusCode::OK, result)
}

pub async fn retry_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::OPERATIONS) {
        return r;
    }
    let job_id = match id.parse::<Uuid>() {
        Ok(uuid) => JobId::from_uuid(uuid),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", format!("invalid job id '{id}'"));
        }
    };
    let result = services.workflow.outbox.retry_dead_letter(job_id, Utc::now());
    common::respond(StatusCode::ACCEPTED, result)
}
