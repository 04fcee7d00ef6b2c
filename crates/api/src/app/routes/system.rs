use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use scf_auth::Permission;

use crate::app::dto;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    let p = principal.principal();
    Json(dto::WhoAmI {
        user_id: p.user_id,
        role: p.role,
        entity_id: p.entity_id,
    })
}

/// Trading relationships of the caller's entity.
pub async fn relationships(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = crate::authz::require(&principal, &Permission::INVOICE_READ) {
        return r;
    }
    let Some(entity_id) = principal.principal().entity_id else {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "caller acts for no entity");
    };
    let items = match services.relationships.read() {
        Ok(tracker) => tracker.relationships_of(entity_id),
        Err(_) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "relationship tracker unavailable",
            );
        }
    };
    (StatusCode::OK, Json(dto::Items::from(items))).into_response()
}
