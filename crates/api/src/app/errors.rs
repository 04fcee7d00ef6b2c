use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use scf_core::DomainError;
use scf_infra::WorkflowError;

pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    let status = match &err {
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
        WorkflowError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Conflict(_) => StatusCode::CONFLICT,
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    json_error(status, err.code(), err.to_string())
}

/// Malformed path ids and similar client input errors.
pub fn invalid_input(err: DomainError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scf_infra::store::StoreError;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (WorkflowError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (WorkflowError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (WorkflowError::InvalidState("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (WorkflowError::Conflict("x".into()), StatusCode::CONFLICT),
            (WorkflowError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (WorkflowError::Unavailable("kyc".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                WorkflowError::Store(StoreError::Backend("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(workflow_error_to_response(err).status(), status);
        }
    }
}
