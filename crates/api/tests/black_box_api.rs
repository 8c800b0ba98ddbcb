use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sweepd_api::app::{build_app, services};
use sweepd_core::{NodeId, SystemClock};
use sweepd_infra::TtlConfig;
use sweepd_infra::jobs::LocalTimerService;

struct TestServer {
    base_url: String,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Timers stay idle so that only explicit requests create jobs.
        let config = TtlConfig {
            timer_sync_tick_interval: Duration::from_secs(3600),
            ..TtlConfig::default()
        }
        .with_manual_trigger(Duration::from_millis(20), Duration::from_secs(5));
        let (services, manager) = services::wire(
            NodeId::generate(),
            services::Stores::in_memory(),
            config,
            true,
        );
        let timer = LocalTimerService::spawn(
            services.adapter.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(1),
        );
        let cancel = CancellationToken::new();
        tokio::spawn(manager.run(timer, cancel.clone()));

        // Same router as prod, bound to an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);
        let app = build_app(services);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            cancel,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn job_eventually(client: &reqwest::Client, base_url: &str, path: &str) -> serde_json::Value {
    for _ in 0..50 {
        let res = client
            .get(format!("{}{}", base_url, path))
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            return res.json().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job did not become visible within timeout");
}

#[tokio::test]
async fn register_table_submit_job_and_trigger_over_http() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    for (physical_id, partition) in [(11, "p0"), (12, "p1")] {
        let res = client
            .put(format!("{}/v1/tables/{}", server.base_url, physical_id))
            .json(&json!({
                "table_id": 10,
                "schema": "shop",
                "name": "events",
                "partition": partition,
                "ttl_column": "created_at",
                "ttl_interval_secs": 3600,
                "job_interval_secs": 600,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = client
        .post(format!("{}/v1/jobs", server.base_url))
        .json(&json!({"table_id": 10, "physical_id": 11, "request_id": "job-p0"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let trace = job_eventually(&client, &server.base_url, "/v1/jobs/10/11/job-p0").await;
    assert_eq!(trace["request_id"], "job-p0");
    assert_eq!(trace["finished"], false);

    // p0 is busy, p1 is free: one table result each, not an overall error.
    let res = client
        .post(format!("{}/v1/trigger", server.base_url))
        .json(&json!({"database": "shop", "table": "events"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let results = body["table_results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["partition"], "p0");
    assert!(results[0]["error_message"].is_string());
    assert_eq!(results[1]["partition"], "p1");
    assert!(results[1]["job_id"].is_string());
}
