//! Persisted scheduler state.
//!
//! Three row sets make up the shared state of the cluster:
//!
//! - `table_status`: one row per physical table, the source of truth for job
//!   ownership;
//! - `task`: one row per scan range of a running job;
//! - `job_history`: one row per job, kept after the job finishes.
//!
//! Writes that change ownership go through a [`StatusTxn`] so the status row,
//! the task rows and the history row commit or roll back together.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sweepd_core::{JobId, NodeId, TableId};

pub use in_memory::InMemoryTtlStore;
pub use postgres::PostgresTtlStore;

/// Storage error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A row lock requested with NOWAIT is held by another transaction.
    #[error("lock not available")]
    LockNotAvailable,
    /// A unique constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("store call timed out")]
    Timeout,
}

/// Persisted job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Cancelling,
    Finished,
    Timeout,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Finished => "finished",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "running" => Ok(Self::Running),
            "cancelling" => Ok(Self::Cancelling),
            "finished" => Ok(Self::Finished),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::Storage(format!("unknown job status {other:?}"))),
        }
    }

    /// Statuses after which a job never runs again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Timeout | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            other => Err(StoreError::Storage(format!("unknown task status {other:?}"))),
        }
    }
}

/// Progress counters of one scan task, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub success_rows: u64,
    #[serde(default)]
    pub error_rows: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scan_task_err: String,
}

/// Status row of one physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub table_id: TableId,
    pub parent_table_id: TableId,

    pub last_job_id: Option<JobId>,
    pub last_job_start_time: Option<DateTime<Utc>>,
    pub last_job_finish_time: Option<DateTime<Utc>>,
    pub last_job_ttl_expire: Option<DateTime<Utc>>,
    pub last_job_summary: Option<String>,

    pub current_job_id: Option<JobId>,
    pub current_job_owner_id: Option<NodeId>,
    pub current_job_owner_hb_time: Option<DateTime<Utc>>,
    pub current_job_start_time: Option<DateTime<Utc>>,
    pub current_job_ttl_expire: Option<DateTime<Utc>>,
    pub current_job_status: Option<JobStatus>,
    pub current_job_status_update_time: Option<DateTime<Utc>>,
}

impl TableStatus {
    /// The zero-state row inserted before a table's first lock attempt.
    pub fn new(table_id: TableId, parent_table_id: TableId) -> Self {
        Self {
            table_id,
            parent_table_id,
            last_job_id: None,
            last_job_start_time: None,
            last_job_finish_time: None,
            last_job_ttl_expire: None,
            last_job_summary: None,
            current_job_id: None,
            current_job_owner_id: None,
            current_job_owner_hb_time: None,
            current_job_start_time: None,
            current_job_ttl_expire: None,
            current_job_status: None,
            current_job_status_update_time: None,
        }
    }

    pub fn is_owned_by(&self, node: &NodeId) -> bool {
        self.current_job_owner_id.as_ref() == Some(node)
    }

    pub(crate) fn apply_owner(&mut self, update: &OwnerUpdate) {
        self.current_job_id = Some(update.job_id.clone());
        self.current_job_owner_id = Some(update.owner_id.clone());
        self.current_job_start_time = Some(update.start_time);
        self.current_job_status = Some(JobStatus::Running);
        self.current_job_status_update_time = Some(update.now);
        self.current_job_ttl_expire = Some(update.ttl_expire);
        self.current_job_owner_hb_time = Some(update.now);
    }

    /// Move the current job to the `last_job_*` columns and clear ownership.
    pub(crate) fn apply_finish(&mut self, finish: &FinishJob) {
        self.last_job_id = self.current_job_id.take();
        self.last_job_start_time = self.current_job_start_time.take();
        self.last_job_finish_time = Some(finish.finish_time);
        self.last_job_ttl_expire = self.current_job_ttl_expire.take();
        self.last_job_summary = Some(finish.summary_text.clone());
        self.current_job_owner_id = None;
        self.current_job_owner_hb_time = None;
        self.current_job_status = None;
        self.current_job_status_update_time = None;
    }
}

/// One scan range of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlTask {
    pub job_id: JobId,
    pub table_id: TableId,
    pub scan_id: i64,
    /// Key-mode encoded lower bound, inclusive. `None` is unbounded.
    pub scan_range_start: Option<Vec<u8>>,
    /// Key-mode encoded upper bound, exclusive. `None` is unbounded.
    pub scan_range_end: Option<Vec<u8>>,
    pub expire_time: DateTime<Utc>,
    pub owner_id: Option<NodeId>,
    pub owner_hb_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub status_update_time: Option<DateTime<Utc>>,
    pub state: Option<TaskState>,
    pub created_time: DateTime<Utc>,
}

/// History row of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHistory {
    pub job_id: JobId,
    pub table_id: TableId,
    pub parent_table_id: TableId,
    pub table_schema: String,
    pub table_name: String,
    pub partition_name: Option<String>,
    pub create_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
    pub ttl_expire: DateTime<Utc>,
    pub summary_text: Option<String>,
    pub expired_rows: Option<u64>,
    pub deleted_rows: Option<u64>,
    pub error_delete_rows: Option<u64>,
    pub status: JobStatus,
}

/// New ownership written to a status row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerUpdate {
    pub job_id: JobId,
    pub owner_id: NodeId,
    pub start_time: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub ttl_expire: DateTime<Utc>,
}

/// Everything the finish transaction writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishJob {
    pub table_id: TableId,
    pub job_id: JobId,
    pub finish_time: DateTime<Utc>,
    pub summary_text: String,
    pub expired_rows: u64,
    pub deleted_rows: u64,
    pub error_delete_rows: u64,
}

/// A pessimistic transaction over the scheduler rows.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StatusTxn: Send {
    /// Read a status row and lock it without waiting.
    ///
    /// Fails with [`StoreError::LockNotAvailable`] if another transaction
    /// holds the lock.
    async fn status_for_update_nowait(
        &mut self,
        table_id: TableId,
    ) -> Result<Option<TableStatus>, StoreError>;

    async fn insert_status(
        &mut self,
        table_id: TableId,
        parent_table_id: TableId,
    ) -> Result<(), StoreError>;

    async fn set_owner(&mut self, table_id: TableId, update: &OwnerUpdate) -> Result<(), StoreError>;

    async fn insert_history(&mut self, history: &JobHistory) -> Result<(), StoreError>;

    async fn insert_task(&mut self, task: &TtlTask) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Scheduler row storage.
#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StatusTxn>, StoreError>;

    async fn load_table_status(&self) -> Result<Vec<TableStatus>, StoreError>;

    async fn tasks_for_job(&self, job_id: &JobId) -> Result<Vec<TtlTask>, StoreError>;

    /// Refresh the heartbeat of a job owned by `owner`. Returns the number of
    /// rows updated, which is 0 once another node owns the job.
    async fn update_heartbeat(
        &self,
        table_id: TableId,
        owner: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Release a finished job in one transaction: move current to last on
    /// the status row, delete the tasks, and complete the history row.
    async fn finish_job(&self, finish: &FinishJob) -> Result<(), StoreError>;

    async fn job_history(
        &self,
        parent_table_id: TableId,
        table_id: TableId,
        job_id: &JobId,
    ) -> Result<Option<JobHistory>, StoreError>;

    /// Tasks that are waiting or running, cluster-wide.
    async fn count_active_tasks(&self) -> Result<u64, StoreError>;

    /// Delete unowned status rows of tables not in `existing`.
    async fn gc_table_status(&self, existing: &[TableId]) -> Result<u64, StoreError>;

    /// Delete tasks whose job is no longer current on any status row.
    async fn gc_tasks(&self) -> Result<u64, StoreError>;

    /// Delete history rows created before `before`.
    async fn gc_job_history(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T> TtlStore for Arc<T>
where
    T: TtlStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StatusTxn>, StoreError> {
        (**self).begin().await
    }

    async fn load_table_status(&self) -> Result<Vec<TableStatus>, StoreError> {
        (**self).load_table_status().await
    }

    async fn tasks_for_job(&self, job_id: &JobId) -> Result<Vec<TtlTask>, StoreError> {
        (**self).tasks_for_job(job_id).await
    }

    async fn update_heartbeat(
        &self,
        table_id: TableId,
        owner: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        (**self).update_heartbeat(table_id, owner, now).await
    }

    async fn finish_job(&self, finish: &FinishJob) -> Result<(), StoreError> {
        (**self).finish_job(finish).await
    }

    async fn job_history(
        &self,
        parent_table_id: TableId,
        table_id: TableId,
        job_id: &JobId,
    ) -> Result<Option<JobHistory>, StoreError> {
        (**self).job_history(parent_table_id, table_id, job_id).await
    }

    async fn count_active_tasks(&self) -> Result<u64, StoreError> {
        (**self).count_active_tasks().await
    }

    async fn gc_table_status(&self, existing: &[TableId]) -> Result<u64, StoreError> {
        (**self).gc_table_status(existing).await
    }

    async fn gc_tasks(&self) -> Result<u64, StoreError> {
        (**self).gc_tasks().await
    }

    async fn gc_job_history(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).gc_job_history(before).await
    }
}
