use axum::{
    Router,
    routing::{get, post, put},
};

pub mod jobs;
pub mod settings;
pub mod system;
pub mod tables;
pub mod trigger;

/// Router for the `/v1` endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs/:table_id/:physical_id/:request_id", get(jobs::get_job))
        .route("/trigger", post(trigger::trigger_job))
        .route("/settings", get(settings::get_settings).put(settings::update_settings))
        .route("/tables/:physical_id", put(tables::put_table).delete(tables::drop_table))
}
