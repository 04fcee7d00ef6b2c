//! API-side authorization guard.
//!
//! Coarse role permissions are enforced here, before the workflow is called.
//! Whether the caller is the buyer, seller or financier *of this record* is
//! decided inside the workflow.

use axum::http::StatusCode;
use axum::response::Response;

use scf_auth::{Permission, authorize};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Check one permission for the current caller, or produce the 403 response.
pub fn require(principal: &PrincipalContext, permission: &Permission) -> Result<(), Response> {
    authorize(principal.principal(), permission).map_err(|e| {
        tracing::debug!(error = %e, "request denied by role policy");
        errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    })
}
