use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use sweepd_core::TableId;

use crate::app::{dto, errors, services::AppServices};

/// Insert or replace a catalog entry.
pub async fn put_table(
    Extension(services): Extension<Arc<AppServices>>,
    Path(physical_id): Path<i64>,
    Json(req): Json<dto::PutTableRequest>,
) -> axum::response::Response {
    let table = match req.into_table(physical_id) {
        Ok(table) => table,
        Err(resp) => return resp,
    };

    match services.catalog.put_table(&table).await {
        Ok(()) => {
            tracing::info!(table_id = %table.id, name = %table.full_name(), "ttl table registered");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "physical_id": table.id,
                    "table_id": table.table_id,
                    "name": table.full_name(),
                })),
            )
                .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn drop_table(
    Extension(services): Extension<Arc<AppServices>>,
    Path(physical_id): Path<i64>,
) -> axum::response::Response {
    match services.catalog.drop_table(TableId::new(physical_id)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("physical table {physical_id} not found"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}
