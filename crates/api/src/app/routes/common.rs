use core::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use scf_core::DomainError;
use scf_infra::WorkflowResult;

use crate::app::errors;

/// Parse a path identifier, or produce the 400 response.
pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse().map_err(errors::invalid_input)
}

/// Serialize a workflow result with `status`, or map its error.
pub fn respond<T: Serialize>(status: StatusCode, result: WorkflowResult<T>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}
