use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};

use scf_auth::Permission;
use scf_financing::ContractId;

use crate::app::errors;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_contract))
        .route("/:id/document", get(contract_document))
}

pub async fn get_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::CONTRACT_READ) {
        return r;
    }
    let contract_id: ContractId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let result = services
        .workflow
        .contracts
        .get_contract(principal.actor(), contract_id)
        .await;
    common::respond(StatusCode::OK, result)
}

/// The rendered contract as a download.
pub async fn contract_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(r) = authz::require(&principal, &Permission::CONTRACT_READ) {
        return r;
    }
    let contract_id: ContractId = match common::parse_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let document = match services
        .workflow
        .contracts
        .render_document(principal.actor(), contract_id)
        .await
    {
        Ok(d) => d,
        Err(e) => return errors::workflow_error_to_response(e),
    };

    let content_type = HeaderValue::from_str(&document.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", document.file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document.bytes,
    )
        .into_response()
}
