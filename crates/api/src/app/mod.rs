//! HTTP application wiring (axum router + scheduler services).
//!
//! - `services.rs`: store selection and job manager wiring
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response DTOs and their mapping onto scheduler types
//! - `errors.rs`: consistent `{"error", "message"}` responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router.
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/v1", routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use sweepd_core::{JobId, NodeId, SystemClock, TableId};
    use sweepd_infra::TtlConfig;
    use sweepd_infra::jobs::LocalTimerService;

    use super::services::{Stores, wire};

    struct Harness {
        app: Router,
        cancel: CancellationToken,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn harness(leader: bool) -> Harness {
        let config = TtlConfig {
            timer_sync_tick_interval: Duration::from_secs(3600),
            ..TtlConfig::default()
        }
        .with_manual_trigger(Duration::from_millis(10), Duration::from_secs(5));
        let (services, manager) = wire(NodeId::generate(), Stores::in_memory(), config, leader);
        let timer = LocalTimerService::spawn(
            services.adapter.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(1),
        );
        let cancel = CancellationToken::new();
        let adapter = services.adapter.clone();
        tokio::spawn(manager.run(timer, cancel.clone()));
        // Any reply proves the loop is up and watching for commands.
        let _ = adapter
            .submit_job(TableId::new(0), TableId::new(0), JobId::generate())
            .await;
        Harness {
            app: build_app(services),
            cancel,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn orders_table() -> Value {
        json!({
            "schema": "shop",
            "name": "orders",
            "ttl_column": "created_at",
            "ttl_interval_secs": 86400,
            "job_interval_secs": 3600,
            "split_points": [[100], [200]],
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = harness(true).await;
        let (status, _) = call(&h.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_and_read_back_job() {
        let h = harness(true).await;
        let (status, body) = call(&h.app, "PUT", "/v1/tables/7", Some(orders_table())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "shop.orders");

        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/jobs",
            Some(json!({"table_id": 7, "physical_id": 7, "request_id": "req-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["request_id"], "req-1");

        let (status, body) = call(&h.app, "GET", "/v1/jobs/7/7/req-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["finished"], false);

        // The table is busy with req-1.
        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/jobs",
            Some(json!({"table_id": 7, "physical_id": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        let (status, _) = call(&h.app, "GET", "/v1/jobs/7/7/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_errors_map_to_status_codes() {
        let h = harness(true).await;
        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/jobs",
            Some(json!({"table_id": 1, "physical_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "physical id 1 not exists");

        call(&h.app, "PUT", "/v1/tables/7", Some(orders_table())).await;
        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/jobs",
            Some(json!({"table_id": 8, "physical_id": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let mut stopped = orders_table();
        stopped["enabled"] = json!(false);
        call(&h.app, "PUT", "/v1/tables/9", Some(stopped)).await;
        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/jobs",
            Some(json!({"table_id": 9, "physical_id": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "ttl_disabled");

        let follower = harness(false).await;
        call(&follower.app, "PUT", "/v1/tables/7", Some(orders_table())).await;
        let (status, body) = call(
            &follower.app,
            "POST",
            "/v1/jobs",
            Some(json!({"table_id": 7, "physical_id": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "not_leader");
    }

    #[tokio::test]
    async fn trigger_resolves_tables_by_name() {
        let h = harness(true).await;
        call(&h.app, "PUT", "/v1/tables/7", Some(orders_table())).await;

        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/trigger",
            Some(json!({"database": "SHOP", "table": "Orders"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result = &body["table_results"][0];
        assert_eq!(result["table_id"], 7);
        assert!(result["job_id"].is_string());

        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/trigger",
            Some(json!({"database": "shop", "table": "missing"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "table shop.missing not exists");
    }

    #[tokio::test]
    async fn settings_are_validated_and_published() {
        let h = harness(true).await;
        let (status, body) = call(
            &h.app,
            "PUT",
            "/v1/settings",
            Some(json!({"enable_job": false, "window_start": "01:00", "time_zone": "Asia/Tokyo"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enable_job"], false);
        assert_eq!(body["time_zone"], "Asia/Tokyo");

        let (status, body) = call(&h.app, "GET", "/v1/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enable_job"], false);

        let (status, _) = call(
            &h.app,
            "PUT",
            "/v1/settings",
            Some(json!({"time_zone": "Mars/Olympus"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Jobs are refused by the trigger path while disabled.
        call(&h.app, "PUT", "/v1/tables/7", Some(orders_table())).await;
        let (status, body) = call(
            &h.app,
            "POST",
            "/v1/trigger",
            Some(json!({"database": "shop", "table": "orders"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "ttl job is disabled");
    }

    #[tokio::test]
    async fn tables_can_be_dropped_once() {
        let h = harness(true).await;
        call(&h.app, "PUT", "/v1/tables/7", Some(orders_table())).await;

        let (status, _) = call(&h.app, "DELETE", "/v1/tables/7", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&h.app, "DELETE", "/v1/tables/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let mut bad = orders_table();
        bad["ttl_interval_secs"] = json!(0);
        let (status, _) = call(&h.app, "PUT", "/v1/tables/7", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
