//! Job lock and lease protocol.
//!
//! Ownership of a table's job lives on its status row. Every ownership change
//! runs in one [`StatusTxn`]: the row is read with NOWAIT, checked, rewritten,
//! and for new jobs the history row and one task row per scan range are
//! inserted. Either all of it commits or none of it does.
//!
//! A node keeps its jobs by refreshing the heartbeat column. Once the
//! heartbeat is older than [`TtlConfig::heartbeat_timeout`] any node may take
//! the job over; the job keeps its id, start time and expire time.
//!
//! [`TtlConfig::heartbeat_timeout`]: crate::config::TtlConfig::heartbeat_timeout

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use sweepd_core::{JobId, NodeId, TableId};

use crate::SCAN_TASK_TOPIC;
use crate::schema::PhysicalTable;
use crate::store::{
    JobHistory, JobStatus, OwnerUpdate, StatusTxn, StoreError, TableStatus, TaskStatus, TtlStore,
    TtlTask,
};

use super::manager::JobManager;
use super::types::{JobError, TtlJob};

/// Whether a new job may be created over `status`.
///
/// A missing row can always be locked (it is bootstrapped first). With
/// `check_interval`, the previous job must have started more than
/// `job_interval` ago.
pub fn could_lock_for_create(
    status: Option<&TableStatus>,
    job_interval: chrono::Duration,
    now: DateTime<Utc>,
    check_interval: bool,
) -> bool {
    let Some(status) = status else {
        return true;
    };
    if status.current_job_id.is_some() {
        return false;
    }
    if !check_interval {
        return true;
    }
    match status.last_job_start_time {
        None => true,
        Some(start) => start
            .checked_add_signed(job_interval)
            .is_some_and(|next| next < now),
    }
}

/// Whether the existing job on `status` may be taken over.
pub fn could_lock_for_exist(
    status: Option<&TableStatus>,
    now: DateTime<Utc>,
    heartbeat_timeout: Duration,
) -> bool {
    let Some(status) = status else {
        return false;
    };
    if status.current_job_id.is_none() {
        return false;
    }
    // A job without an owner is up for grabs.
    if status.current_job_owner_id.is_none() {
        return true;
    }
    let Ok(timeout) = chrono::Duration::from_std(heartbeat_timeout) else {
        return false;
    };
    match status.current_job_owner_hb_time {
        None => true,
        Some(hb) => hb.checked_add_signed(timeout).is_some_and(|deadline| deadline < now),
    }
}

/// Run a store future under the internal SQL timeout.
pub(crate) async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, E>>,
    JobError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(JobError::from),
        Err(_) => Err(StoreError::Timeout.into()),
    }
}

struct NewJob<'a> {
    owner: &'a NodeId,
    table: &'a PhysicalTable,
    job_id: &'a JobId,
    now: DateTime<Utc>,
    check_interval: bool,
    split_count: usize,
    tz: Tz,
}

/// Ownership read back from a taken-over status row.
struct TakenOver {
    job_id: JobId,
    start_time: DateTime<Utc>,
    ttl_expire: DateTime<Utc>,
}

async fn close_txn<T>(txn: Box<dyn StatusTxn>, result: Result<T, JobError>) -> Result<T, JobError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn lock_new_txn(store: &dyn TtlStore, job: &NewJob<'_>) -> Result<DateTime<Utc>, JobError> {
    let mut txn = store.begin().await?;
    let result = lock_new_in(txn.as_mut(), job).await;
    close_txn(txn, result).await
}

async fn lock_new_in(txn: &mut dyn StatusTxn, job: &NewJob<'_>) -> Result<DateTime<Utc>, JobError> {
    let table = job.table;
    let status = match txn.status_for_update_nowait(table.id).await? {
        Some(status) => status,
        None => {
            txn.insert_status(table.id, table.table_id).await?;
            txn.status_for_update_nowait(table.id)
                .await?
                .ok_or(JobError::MissingStatusRow(table.id))?
        }
    };

    if !could_lock_for_create(Some(&status), table.job_interval, job.now, job.check_interval) {
        return Err(JobError::CouldNotLock(table.id));
    }

    let expire = table.eval_expire_time(job.now);
    txn.set_owner(
        table.id,
        &OwnerUpdate {
            job_id: job.job_id.clone(),
            owner_id: job.owner.clone(),
            start_time: job.now,
            now: job.now,
            ttl_expire: expire,
        },
    )
    .await?;

    txn.insert_history(&JobHistory {
        job_id: job.job_id.clone(),
        table_id: table.id,
        parent_table_id: table.table_id,
        table_schema: table.schema.clone(),
        table_name: table.name.clone(),
        partition_name: table.partition.clone(),
        create_time: job.now,
        finish_time: None,
        ttl_expire: expire,
        summary_text: None,
        expired_rows: None,
        deleted_rows: None,
        error_delete_rows: None,
        status: JobStatus::Running,
    })
    .await?;

    let ranges = table.split_scan_ranges(job.split_count, &job.tz)?;
    for (scan_id, range) in (0_i64..).zip(ranges) {
        txn.insert_task(&TtlTask {
            job_id: job.job_id.clone(),
            table_id: table.id,
            scan_id,
            scan_range_start: range.start,
            scan_range_end: range.end,
            expire_time: expire,
            owner_id: None,
            owner_hb_time: None,
            status: TaskStatus::Waiting,
            status_update_time: None,
            state: None,
            created_time: job.now,
        })
        .await?;
    }

    Ok(expire)
}

async fn take_over_txn(
    store: &dyn TtlStore,
    owner: &NodeId,
    table_id: TableId,
    now: DateTime<Utc>,
    heartbeat_timeout: Duration,
) -> Result<TakenOver, JobError> {
    let mut txn = store.begin().await?;
    let result = take_over_in(txn.as_mut(), owner, table_id, now, heartbeat_timeout).await;
    close_txn(txn, result).await
}

async fn take_over_in(
    txn: &mut dyn StatusTxn,
    owner: &NodeId,
    table_id: TableId,
    now: DateTime<Utc>,
    heartbeat_timeout: Duration,
) -> Result<TakenOver, JobError> {
    let status = txn.status_for_update_nowait(table_id).await?;
    if !could_lock_for_exist(status.as_ref(), now, heartbeat_timeout) {
        return Err(JobError::CouldNotTakeOver(table_id));
    }
    let Some(TableStatus {
        current_job_id: Some(job_id),
        current_job_start_time,
        current_job_ttl_expire,
        ..
    }) = status
    else {
        return Err(JobError::CouldNotTakeOver(table_id));
    };

    let taken = TakenOver {
        job_id,
        start_time: current_job_start_time.unwrap_or(now),
        ttl_expire: current_job_ttl_expire.unwrap_or(now),
    };
    txn.set_owner(
        table_id,
        &OwnerUpdate {
            job_id: taken.job_id.clone(),
            owner_id: owner.clone(),
            start_time: taken.start_time,
            now,
            ttl_expire: taken.ttl_expire,
        },
    )
    .await?;
    Ok(taken)
}

impl JobManager {
    /// Create a job on `table` and take ownership of it.
    pub(crate) async fn lock_new_job(
        &mut self,
        table: &PhysicalTable,
        now: DateTime<Utc>,
        job_id: JobId,
        check_interval: bool,
    ) -> Result<TtlJob, JobError> {
        let job = NewJob {
            owner: &self.id,
            table,
            job_id: &job_id,
            now,
            check_interval,
            split_count: self.config.scan_split_count,
            tz: self.settings.borrow().time_zone,
        };
        let expire = bounded(
            self.config.internal_sql_timeout,
            lock_new_txn(self.store.as_ref(), &job),
        )
        .await?;

        Ok(self.append_locked_job(job_id, now, expire, table.id).await)
    }

    /// Take over a job whose owner stopped heartbeating.
    pub(crate) async fn lock_hb_timeout_job(
        &mut self,
        table_id: TableId,
        parent_table_id: TableId,
        now: DateTime<Utc>,
    ) -> Result<TtlJob, JobError> {
        let taken = bounded(
            self.config.internal_sql_timeout,
            take_over_txn(
                self.store.as_ref(),
                &self.id,
                table_id,
                now,
                self.config.heartbeat_timeout(),
            ),
        )
        .await?;

        info!(
            job_id = %taken.job_id,
            table_id = %table_id,
            parent_table_id = %parent_table_id,
            "took over ttl job"
        );
        Ok(self
            .append_locked_job(taken.job_id, taken.start_time, taken.ttl_expire, table_id)
            .await)
    }

    async fn append_locked_job(
        &mut self,
        id: JobId,
        create_time: DateTime<Utc>,
        ttl_expire_time: DateTime<Utc>,
        table_id: TableId,
    ) -> TtlJob {
        let now = self.clock.now();
        // The status row changed; a stale cache would make the next pass
        // think the table is still free.
        if let Err(e) = self.refresh_caches().await {
            warn!(job_id = %id, table_id = %table_id, error = %e, "fail to refresh caches after lock");
        }

        if let Err(e) = self.notifications.notify(SCAN_TASK_TOPIC, id.as_str()) {
            warn!(job_id = %id, table_id = %table_id, error = %e, "fail to trigger scan tasks");
        }

        let job = TtlJob {
            id,
            table_id,
            owner_id: self.id.clone(),
            create_time,
            assign_time: now,
            ttl_expire_time,
            status: JobStatus::Running,
        };
        info!(job_id = %job.id, table_id = %job.table_id, "append new running job");
        self.running_jobs.push(job.clone());
        job
    }

    /// Refresh the heartbeat of every job the status cache says we own,
    /// finishing the ones that ran past the job timeout.
    pub(crate) async fn update_heartbeat(&mut self, now: DateTime<Utc>) {
        let limit = self.config.internal_sql_timeout;
        let (timed_out, alive): (Vec<TtlJob>, Vec<TtlJob>) = self
            .running_jobs
            .iter()
            .filter(|job| {
                self.status_cache
                    .get(job.table_id)
                    .is_some_and(|status| status.is_owned_by(&self.id))
            })
            .cloned()
            .partition(|job| job.is_timed_out(now, self.config.job_timeout));

        for job in timed_out {
            info!(job_id = %job.id, table_id = %job.table_id, "job is timeout");
            match self.finish_local_job(&job, now, Some(super::manager::JOB_TIMEOUT)).await {
                Ok(()) => self.remove_job(&job.id),
                Err(e) => warn!(job_id = %job.id, error = %e, "fail to finish timeout job"),
            }
        }

        for job in alive {
            let result = bounded(limit, self.store.update_heartbeat(job.table_id, &self.id, now))
                .await
                .and_then(|affected| match affected {
                    1 => Ok(()),
                    affected => Err(JobError::HeartbeatLost {
                        table_id: job.table_id,
                        affected,
                    }),
                });
            if let Err(e) = result {
                warn!(job_id = %job.id, table_id = %job.table_id, error = %e, "fail to update heartbeat for job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn owned_status(hb_age_secs: i64) -> TableStatus {
        let mut status = TableStatus::new(TableId::new(1), TableId::new(1));
        status.current_job_id = Some("job-1".parse().unwrap());
        status.current_job_owner_id = Some("node-a".parse().unwrap());
        status.current_job_owner_hb_time = Some(now() - chrono::Duration::seconds(hb_age_secs));
        status
    }

    #[test]
    fn create_needs_free_row_and_elapsed_interval() {
        let hour = chrono::Duration::hours(1);
        assert!(could_lock_for_create(None, hour, now(), true));

        let mut status = TableStatus::new(TableId::new(1), TableId::new(1));
        assert!(could_lock_for_create(Some(&status), hour, now(), true));

        status.last_job_start_time = Some(now() - chrono::Duration::minutes(30));
        assert!(!could_lock_for_create(Some(&status), hour, now(), true));
        assert!(could_lock_for_create(Some(&status), hour, now(), false));

        status.last_job_start_time = Some(now() - chrono::Duration::minutes(61));
        assert!(could_lock_for_create(Some(&status), hour, now(), true));

        let busy = owned_status(0);
        assert!(!could_lock_for_create(Some(&busy), hour, now(), false));
    }

    #[test]
    fn takeover_needs_stale_heartbeat() {
        let timeout = Duration::from_secs(120);
        assert!(!could_lock_for_exist(None, now(), timeout));
        assert!(!could_lock_for_exist(
            Some(&TableStatus::new(TableId::new(1), TableId::new(1))),
            now(),
            timeout
        ));
        assert!(!could_lock_for_exist(Some(&owned_status(60)), now(), timeout));
        assert!(!could_lock_for_exist(Some(&owned_status(120)), now(), timeout));
        assert!(could_lock_for_exist(Some(&owned_status(180)), now(), timeout));

        let mut orphan = owned_status(0);
        orphan.current_job_owner_id = None;
        assert!(could_lock_for_exist(Some(&orphan), now(), timeout));
    }

    #[tokio::test]
    async fn bounded_maps_elapsed_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        };
        let err = bounded(Duration::from_millis(5), slow).await.unwrap_err();
        assert!(matches!(err, JobError::Store(StoreError::Timeout)));
    }
}
