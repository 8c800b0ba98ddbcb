use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use sweepd_core::JobId;
use sweepd_events::TriggerCommand;

use crate::app::{dto, errors, services::AppServices};

/// Issue a trigger command and wait for the node that claims it.
pub async fn trigger_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<dto::TriggerRequest>,
) -> axum::response::Response {
    let command = TriggerCommand {
        request_id: JobId::generate().into_inner(),
        database: req.database,
        table: req.table,
    };
    let request_id = command.request_id.clone();

    let reply = match services.commands.send(command) {
        Ok(reply) => reply,
        Err(e) => return errors::json_error(StatusCode::BAD_GATEWAY, "command_error", e.to_string()),
    };

    match tokio::time::timeout(services.trigger_timeout, reply).await {
        Ok(Ok(Ok(response))) => Json(response).into_response(),
        Ok(Ok(Err(message))) => {
            errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "trigger_failed", message)
        }
        Ok(Err(_)) => errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "manager_closed",
            "command was dropped without a response",
        ),
        Err(_) => {
            tracing::warn!(request_id, "trigger command timed out");
            errors::json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", "no response to trigger command")
        }
    }
}
