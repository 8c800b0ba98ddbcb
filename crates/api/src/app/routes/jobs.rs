use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use sweepd_core::{JobId, TableId};

use crate::app::{dto, errors, services::AppServices};

pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<dto::SubmitJobRequest>,
) -> axum::response::Response {
    let request_id = match dto::parse_request_id(req.request_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .adapter
        .submit_job(
            TableId::new(req.table_id),
            TableId::new(req.physical_id),
            request_id.clone(),
        )
        .await
    {
        Ok(()) => (
            StatusCode::CREATED,
            Json(dto::SubmitJobResponse { request_id }),
        )
            .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path((table_id, physical_id, request_id)): Path<(i64, i64, String)>,
) -> axum::response::Response {
    let request_id: JobId = match request_id.parse() {
        Ok(id) => id,
        Err(e) => return errors::bad_request(format!("{e}")),
    };

    match services
        .adapter
        .get_job(TableId::new(table_id), TableId::new(physical_id), &request_id)
        .await
    {
        Ok(Some(trace)) => Json(trace).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::job_error_to_response(e),
    }
}
