use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use sweepd_infra::StoreError;
use sweepd_infra::jobs::JobError;

pub fn job_error_to_response(err: JobError) -> axum::response::Response {
    match err {
        JobError::NotLeader => json_error(StatusCode::SERVICE_UNAVAILABLE, "not_leader", err.to_string()),
        JobError::ManagerClosed => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "manager_closed", err.to_string())
        }
        JobError::PhysicalTableNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        JobError::TableIdMismatch { .. } => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        JobError::JobDisabled | JobError::TableTtlDisabled(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "ttl_disabled", err.to_string())
        }
        JobError::CouldNotLock(_) | JobError::CouldNotTakeOver(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        JobError::Store(e) => store_error_to_response(e),
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string()),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::LockNotAvailable | StoreError::Conflict(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        StoreError::Timeout => json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string()),
        StoreError::Storage(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
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

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}
