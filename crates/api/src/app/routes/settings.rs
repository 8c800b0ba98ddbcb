use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use crate::app::{dto, services::AppServices};

pub async fn get_settings(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.settings.borrow().clone())
}

pub async fn update_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<dto::UpdateSettingsRequest>,
) -> axum::response::Response {
    let current = services.settings.borrow().clone();
    let next = match req.apply(&current) {
        Ok(next) => next,
        Err(resp) => return resp,
    };

    tracing::info!(
        enable_job = next.enable_job,
        time_zone = %next.time_zone,
        scan_workers = next.scan_workers,
        delete_workers = next.delete_workers,
        "ttl settings updated"
    );
    services.settings.send_replace(next.clone());
    Json(next).into_response()
}
