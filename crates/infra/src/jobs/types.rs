//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use sweepd_codec::CodecError;
use sweepd_core::{JobId, NodeId, TableId};

use crate::store::{FinishJob, JobStatus, StoreError};

use super::task_manager::TaskManagerError;

/// A job this node owns and drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlJob {
    pub id: JobId,
    /// Physical table the job expires rows of.
    pub table_id: TableId,
    pub owner_id: NodeId,
    pub create_time: DateTime<Utc>,
    /// When this node took ownership.
    pub assign_time: DateTime<Utc>,
    /// Rows older than this are expired. Fixed for the job's lifetime.
    pub ttl_expire_time: DateTime<Utc>,
    /// `Running` or `Cancelling`.
    pub status: JobStatus,
}

impl TtlJob {
    pub fn is_timed_out(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        (now - self.create_time)
            .to_std()
            .map(|age| age > timeout)
            .unwrap_or(false)
    }

    /// Build the finish record from a summary.
    pub fn finish_record(&self, summary: &TtlSummary, now: DateTime<Utc>) -> FinishJob {
        FinishJob {
            table_id: self.table_id,
            job_id: self.id.clone(),
            finish_time: now,
            summary_text: summary.summary_text.clone(),
            expired_rows: summary.total_rows,
            deleted_rows: summary.success_rows,
            error_delete_rows: summary.error_rows,
        }
    }
}

/// Aggregated outcome of a job, persisted as JSON in the history row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlSummary {
    pub total_rows: u64,
    pub success_rows: u64,
    pub error_rows: u64,

    pub total_scan_task: usize,
    pub scheduled_scan_task: usize,
    pub finished_scan_task: usize,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scan_task_err: String,

    /// The JSON form of this summary.
    #[serde(skip)]
    pub summary_text: String,
}

/// A submission waiting for the job loop.
#[derive(Debug)]
pub struct SubmitJobRequest {
    pub table_id: TableId,
    pub physical_id: TableId,
    pub request_id: JobId,
    pub reply: oneshot::Sender<Result<(), JobError>>,
}

/// State of a submitted job, read from its history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTrace {
    pub request_id: JobId,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TtlSummary>,
}

/// Job lock and lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("split scan ranges: {0}")]
    Codec(#[from] CodecError),

    #[error("summary json: {0}")]
    Summary(#[from] serde_json::Error),

    #[error(transparent)]
    TaskManager(#[from] TaskManagerError),

    #[error("couldn't schedule ttl job for table {0}")]
    CouldNotLock(TableId),

    #[error("couldn't take over ttl job for table {0}")]
    CouldNotTakeOver(TableId),

    #[error("status row for table {0} is missing after bootstrap")]
    MissingStatusRow(TableId),

    #[error("current ttl manager is not the leader")]
    NotLeader,

    #[error("physical id {0} not exists")]
    PhysicalTableNotFound(TableId),

    #[error("table id mismatch: requested {requested}, physical table {physical} belongs to {actual}")]
    TableIdMismatch {
        requested: TableId,
        actual: TableId,
        physical: TableId,
    },

    #[error("ttl job is disabled")]
    JobDisabled,

    #[error("ttl is not enabled on table {0}")]
    TableTtlDisabled(TableId),

    #[error("heartbeat of job on table {table_id} lost ownership ({affected} rows updated)")]
    HeartbeatLost { table_id: TableId, affected: u64 },

    #[error("job manager is closed")]
    ManagerClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_json_omits_empty_error() {
        let summary = TtlSummary {
            total_rows: 10,
            success_rows: 9,
            error_rows: 1,
            total_scan_task: 2,
            scheduled_scan_task: 2,
            finished_scan_task: 2,
            ..TtlSummary::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("scan_task_err").is_none());
        assert!(json.get("summary_text").is_none());
        assert_eq!(json["finished_scan_task"], 2);
    }

    #[test]
    fn job_times_out_after_limit() {
        let now = Utc::now();
        let job = TtlJob {
            id: "j1".parse().unwrap(),
            table_id: TableId::new(1),
            owner_id: "n1".parse().unwrap(),
            create_time: now,
            assign_time: now,
            ttl_expire_time: now,
            status: JobStatus::Running,
        };
        let limit = std::time::Duration::from_secs(60);
        assert!(!job.is_timed_out(now + chrono::Duration::seconds(60), limit));
        assert!(job.is_timed_out(now + chrono::Duration::seconds(61), limit));
    }
}
