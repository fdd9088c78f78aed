use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use iotforge_core::DomainError;
use iotforge_infra::tenants::{NotifyError, TenantStoreError};

pub fn notify_error_to_response(err: NotifyError) -> axum::response::Response {
    match err {
        NotifyError::Store(e) => store_error_to_response(e),
        e @ NotifyError::Publish { .. } => {
            json_error(StatusCode::BAD_GATEWAY, "publish_error", e.to_string())
        }
    }
}

pub fn store_error_to_response(err: TenantStoreError) -> axum::response::Response {
    match err {
        e @ TenantStoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
        e @ TenantStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        e @ TenantStoreError::Unavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        e @ DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    }
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
