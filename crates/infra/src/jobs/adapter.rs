//! Submission interface to the job loop.
//!
//! Submissions never touch the loop's state: a [`SubmitJobRequest`] goes over
//! an mpsc channel and the verdict comes back over a oneshot. Reads go straight
//! to the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

use sweepd_core::{Clock, JobId, TableId};

use crate::config::TtlSettings;
use crate::schema::SchemaSource;
use crate::store::TtlStore;

use super::lock::bounded;
use super::types::{JobError, JobTrace, SubmitJobRequest, TtlSummary};

/// Cloneable handle used by timers and the HTTP layer to submit jobs.
#[derive(Clone)]
pub struct ManagerJobAdapter {
    requests: mpsc::Sender<SubmitJobRequest>,
    store: Arc<dyn TtlStore>,
    schema: Arc<dyn SchemaSource>,
    clock: Arc<dyn Clock>,
    settings: watch::Receiver<TtlSettings>,
    running_task_limit: usize,
    sql_timeout: Duration,
}

impl std::fmt::Debug for ManagerJobAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerJobAdapter")
            .field("running_task_limit", &self.running_task_limit)
            .field("sql_timeout", &self.sql_timeout)
            .finish_non_exhaustive()
    }
}

impl ManagerJobAdapter {
    pub fn new(
        requests: mpsc::Sender<SubmitJobRequest>,
        store: Arc<dyn TtlStore>,
        schema: Arc<dyn SchemaSource>,
        clock: Arc<dyn Clock>,
        settings: watch::Receiver<TtlSettings>,
        running_task_limit: usize,
        sql_timeout: Duration,
    ) -> Self {
        Self {
            requests,
            store,
            schema,
            clock,
            settings,
            running_task_limit,
            sql_timeout,
        }
    }

    /// Whether a job for `physical_id` would currently be accepted.
    pub async fn can_submit_job(&self, table_id: TableId, physical_id: TableId) -> bool {
        let enabled = self.settings.borrow().enable_job;
        if !enabled {
            return false;
        }

        let snapshot = match bounded(self.sql_timeout, self.schema.load()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(table_id = %table_id, error = %e, "fail to load schema for submit check");
                return false;
            }
        };
        let Some(table) = snapshot.tables.iter().find(|t| t.id == physical_id) else {
            return false;
        };
        if table.table_id != table_id || !table.enabled {
            return false;
        }

        match bounded(self.sql_timeout, self.store.count_active_tasks()).await {
            Ok(count) => count < self.running_task_limit as u64,
            Err(e) => {
                warn!(error = %e, "fail to count running tasks");
                false
            }
        }
    }

    /// Ask the job loop to create a job with id `request_id`.
    pub async fn submit_job(
        &self,
        table_id: TableId,
        physical_id: TableId,
        request_id: JobId,
    ) -> Result<(), JobError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SubmitJobRequest {
                table_id,
                physical_id,
                request_id,
                reply,
            })
            .await
            .map_err(|_| JobError::ManagerClosed)?;
        response.await.map_err(|_| JobError::ManagerClosed)?
    }

    /// Read back a submitted job from its history row.
    pub async fn get_job(
        &self,
        table_id: TableId,
        physical_id: TableId,
        request_id: &JobId,
    ) -> Result<Option<JobTrace>, JobError> {
        let history = bounded(
            self.sql_timeout,
            self.store.job_history(table_id, physical_id, request_id),
        )
        .await?;
        let Some(history) = history else {
            return Ok(None);
        };

        let summary = match history.summary_text.as_deref().filter(|s| !s.is_empty()) {
            Some(text) => {
                let mut summary: TtlSummary = serde_json::from_str(text)?;
                summary.summary_text = text.to_string();
                Some(summary)
            }
            None => None,
        };

        Ok(Some(JobTrace {
            request_id: history.job_id,
            finished: history.status.is_terminal(),
            summary,
        }))
    }

    /// Current time in the configured zone.
    pub fn now(&self) -> DateTime<Tz> {
        let tz = self.settings.borrow().time_zone;
        self.clock.now().with_timezone(&tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaCatalog, test_table};
    use crate::store::{InMemoryTtlStore, JobHistory, JobStatus, TaskStatus, TtlTask};
    use chrono::{TimeZone, Utc};
    use sweepd_core::ManualClock;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn adapter(
        store: &InMemoryTtlStore,
        settings: TtlSettings,
        limit: usize,
    ) -> (ManagerJobAdapter, mpsc::Receiver<SubmitJobRequest>) {
        let (tx, rx) = mpsc::channel(8);
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let adapter = ManagerJobAdapter::new(
            tx,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(now())),
            settings_rx,
            limit,
            Duration::from_secs(5),
        );
        (adapter, rx)
    }

    #[tokio::test]
    async fn can_submit_checks_table_and_capacity() {
        let store = InMemoryTtlStore::new();
        let mut partition = test_table(11, "orders");
        partition.table_id = TableId::new(10);
        store.put_table(&partition).await.unwrap();
        let mut disabled = test_table(20, "logs");
        disabled.enabled = false;
        store.put_table(&disabled).await.unwrap();

        let (adapter, _rx) = adapter(&store, TtlSettings::default(), 1);
        assert!(adapter.can_submit_job(TableId::new(10), TableId::new(11)).await);
        assert!(!adapter.can_submit_job(TableId::new(11), TableId::new(11)).await);
        assert!(!adapter.can_submit_job(TableId::new(20), TableId::new(20)).await);
        assert!(!adapter.can_submit_job(TableId::new(30), TableId::new(30)).await);

        store.put_task(TtlTask {
            job_id: "busy".parse().unwrap(),
            table_id: TableId::new(99),
            scan_id: 0,
            scan_range_start: None,
            scan_range_end: None,
            expire_time: now(),
            owner_id: None,
            owner_hb_time: None,
            status: TaskStatus::Running,
            status_update_time: None,
            state: None,
            created_time: now(),
        });
        assert!(!adapter.can_submit_job(TableId::new(10), TableId::new(11)).await);
    }

    #[tokio::test]
    async fn can_submit_respects_global_switch() {
        let store = InMemoryTtlStore::new();
        store.put_table(&test_table(1, "t1")).await.unwrap();
        let settings = TtlSettings {
            enable_job: false,
            ..TtlSettings::default()
        };
        let (adapter, _rx) = adapter(&store, settings, 10);
        assert!(!adapter.can_submit_job(TableId::new(1), TableId::new(1)).await);
    }

    #[tokio::test]
    async fn submit_round_trips_through_channel() {
        let store = InMemoryTtlStore::new();
        let (adapter, mut rx) = adapter(&store, TtlSettings::default(), 10);

        let loop_side = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.physical_id, TableId::new(2));
            request.reply.send(Err(JobError::NotLeader)).unwrap();
            // Dropping the receiver closes the manager side.
        });
        let err = adapter
            .submit_job(TableId::new(1), TableId::new(2), "req-1".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotLeader));
        loop_side.await.unwrap();

        let err = adapter
            .submit_job(TableId::new(1), TableId::new(2), "req-2".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ManagerClosed));
    }

    #[tokio::test]
    async fn get_job_reads_history() {
        let store = InMemoryTtlStore::new();
        let (adapter, _rx) = adapter(&store, TtlSettings::default(), 10);
        let job_id: JobId = "req-1".parse().unwrap();

        assert!(adapter
            .get_job(TableId::new(1), TableId::new(2), &job_id)
            .await
            .unwrap()
            .is_none());

        store.put_history(JobHistory {
            job_id: job_id.clone(),
            table_id: TableId::new(2),
            parent_table_id: TableId::new(1),
            table_schema: "test".into(),
            table_name: "t".into(),
            partition_name: Some("p0".into()),
            create_time: now(),
            finish_time: Some(now()),
            ttl_expire: now(),
            summary_text: Some(r#"{"total_rows":4,"success_rows":4,"error_rows":0,"total_scan_task":1,"scheduled_scan_task":1,"finished_scan_task":1}"#.into()),
            expired_rows: Some(4),
            deleted_rows: Some(4),
            error_delete_rows: Some(0),
            status: JobStatus::Finished,
        });

        let trace = adapter
            .get_job(TableId::new(1), TableId::new(2), &job_id)
            .await
            .unwrap()
            .unwrap();
        assert!(trace.finished);
        let summary = trace.summary.unwrap();
        assert_eq!(summary.total_rows, 4);
        assert!(summary.summary_text.starts_with('{'));

        // Wrong parent id does not match.
        assert!(adapter
            .get_job(TableId::new(2), TableId::new(2), &job_id)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn now_uses_configured_zone() {
        let store = InMemoryTtlStore::new();
        let settings = TtlSettings {
            time_zone: chrono_tz::Asia::Tokyo,
            ..TtlSettings::default()
        };
        let (adapter, _rx) = adapter(&store, settings, 10);
        assert_eq!(adapter.now().to_rfc3339(), "2024-05-01T21:00:00+09:00");
    }
}
