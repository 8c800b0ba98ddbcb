//! Contract between the job loop and the scan/delete worker pools.
//!
//! The job loop owns its task manager and calls it from the same task, so
//! every method takes `&mut self`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use sweepd_events::Subscription;

use crate::config::TtlSettings;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum TaskManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("resize {pool} workers to {count}: {message}")]
    Resize {
        pool: &'static str,
        count: usize,
        message: String,
    },
}

#[async_trait]
pub trait TaskManager: Send + Sync {
    async fn resize_scan_workers(&mut self, count: usize) -> Result<(), TaskManagerError>;

    async fn resize_delete_workers(&mut self, count: usize) -> Result<(), TaskManagerError>;

    /// Hand waiting tasks to idle scan workers.
    async fn reschedule_tasks(&mut self, now: DateTime<Utc>) -> Result<(), TaskManagerError>;

    /// Drop local tasks whose job is gone or owned elsewhere.
    async fn check_invalid_task(&mut self) -> Result<(), TaskManagerError>;

    /// Persist the results of local tasks that have finished.
    async fn check_finished_task(&mut self, now: DateTime<Utc>) -> Result<(), TaskManagerError>;

    async fn update_heartbeat(&mut self, now: DateTime<Utc>) -> Result<(), TaskManagerError>;

    /// Collect scan workers that finished. Returns whether any did, in which
    /// case the caller reschedules.
    fn handle_scan_finished_task(&mut self) -> bool;

    /// Signals that a scan finished and the manager should be polled.
    fn subscribe_state(&mut self) -> Subscription<()>;

    async fn resize_workers_with_settings(
        &mut self,
        settings: &TtlSettings,
    ) -> Result<(), TaskManagerError> {
        self.resize_scan_workers(settings.scan_workers).await?;
        self.resize_delete_workers(settings.delete_workers).await
    }
}

/// A task manager for nodes that only schedule jobs; scanning happens
/// elsewhere. It records the requested pool sizes and nothing else.
#[derive(Debug, Default)]
pub struct NoopTaskManager {
    scan_workers: usize,
    delete_workers: usize,
    state_tx: Option<mpsc::UnboundedSender<()>>,
}

impl NoopTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_workers(&self) -> usize {
        self.scan_workers
    }

    pub fn delete_workers(&self) -> usize {
        self.delete_workers
    }
}

#[async_trait]
impl TaskManager for NoopTaskManager {
    async fn resize_scan_workers(&mut self, count: usize) -> Result<(), TaskManagerError> {
        debug!(count, "resize scan workers");
        self.scan_workers = count;
        Ok(())
    }

    async fn resize_delete_workers(&mut self, count: usize) -> Result<(), TaskManagerError> {
        debug!(count, "resize delete workers");
        self.delete_workers = count;
        Ok(())
    }

    async fn reschedule_tasks(&mut self, _now: DateTime<Utc>) -> Result<(), TaskManagerError> {
        Ok(())
    }

    async fn check_invalid_task(&mut self) -> Result<(), TaskManagerError> {
        Ok(())
    }

    async fn check_finished_task(&mut self, _now: DateTime<Utc>) -> Result<(), TaskManagerError> {
        Ok(())
    }

    async fn update_heartbeat(&mut self, _now: DateTime<Utc>) -> Result<(), TaskManagerError> {
        Ok(())
    }

    fn handle_scan_finished_task(&mut self) -> bool {
        false
    }

    fn subscribe_state(&mut self) -> Subscription<()> {
        // Keep the sender so the subscription stays open and simply never
        // yields.
        let (tx, rx) = mpsc::unbounded_channel();
        self.state_tx = Some(tx);
        Subscription::new(rx)
    }
}
