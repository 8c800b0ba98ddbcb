//! The job loop.
//!
//! One task owns the running jobs, both caches and the task manager. Timers,
//! submissions, commands and notifications are merged into a single
//! `select!`; each event is handled to completion before the next one is
//! taken. Nothing outside the loop mutates its state: submissions arrive over
//! a channel and are answered over a oneshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sweepd_core::{Clock, JobId, NodeId, SystemClock, TableId};
use sweepd_events::{
    CommandClient, InMemoryCommandBus, InMemoryNotificationBus, Notification, NotificationBus,
    TriggerCommand,
};

use crate::SCAN_TASK_TOPIC;
use crate::cache::{InfoSchemaCache, TableStatusCache};
use crate::config::{TtlConfig, TtlSettings};
use crate::schema::SchemaSource;
use crate::store::{JobStatus, TtlStore};

use super::adapter::ManagerJobAdapter;
use super::lock::{bounded, could_lock_for_exist};
use super::summary::{all_finished, summarize_tasks};
use super::task_manager::{NoopTaskManager, TaskManager};
use super::timer::{TimerService, TimerSpec};
use super::types::{JobError, SubmitJobRequest, TtlJob};

pub(crate) const JOB_TIMEOUT: &str = "job is timeout";
pub(crate) const JOB_DISABLED: &str = "ttl job is disabled";
pub(crate) const OUT_OF_WINDOW: &str = "out of ttl job schedule window";
pub(crate) const TABLE_REMOVED: &str =
    "ttl table has been removed or the ttl on this table has been stopped";

const SUBMIT_QUEUE_SIZE: usize = 64;

fn timer_sync_min_gap() -> chrono::Duration {
    chrono::Duration::seconds(5)
}

fn timer_sync_max_gap() -> chrono::Duration {
    chrono::Duration::minutes(2)
}

/// Decides whether this node is the leader. Polled on every loop iteration.
pub type LeaderFn = Arc<dyn Fn() -> bool + Send + Sync>;

enum LoopEvent {
    Cancelled,
    TimerTick,
    Submit(SubmitJobRequest),
    InfoSchemaCache,
    TableStatusCache,
    Gc,
    Heartbeat,
    CheckJobs,
    RescheduleJobs,
    Command(Option<TriggerCommand>),
    RescheduleTasks,
    ScanNotification(Option<Notification>),
    CheckTasks,
    ResizeWorkers,
    TaskHeartbeat,
    ScanFinished,
}

/// Schedules expiry jobs for the tables of one cluster.
pub struct JobManager {
    pub(super) id: NodeId,
    pub(super) store: Arc<dyn TtlStore>,
    pub(super) schema: Arc<dyn SchemaSource>,
    pub(super) config: TtlConfig,
    pub(super) settings: watch::Receiver<TtlSettings>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) notifications: Arc<dyn NotificationBus>,
    pub(super) commands: Arc<dyn CommandClient>,
    pub(super) task_manager: Box<dyn TaskManager>,
    leader: LeaderFn,

    pub(super) info_cache: InfoSchemaCache,
    pub(super) status_cache: TableStatusCache,
    pub(super) running_jobs: Vec<TtlJob>,

    requests_tx: mpsc::Sender<SubmitJobRequest>,
    requests_rx: mpsc::Receiver<SubmitJobRequest>,
}

impl JobManager {
    pub fn new(
        id: NodeId,
        store: Arc<dyn TtlStore>,
        schema: Arc<dyn SchemaSource>,
        config: TtlConfig,
        settings: watch::Receiver<TtlSettings>,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(SUBMIT_QUEUE_SIZE);
        Self {
            id,
            store,
            schema,
            info_cache: InfoSchemaCache::default(),
            status_cache: TableStatusCache::default(),
            config,
            settings,
            clock: Arc::new(SystemClock),
            notifications: Arc::new(InMemoryNotificationBus::new()),
            commands: Arc::new(InMemoryCommandBus::new()),
            task_manager: Box::new(NoopTaskManager::new()),
            leader: Arc::new(|| false),
            running_jobs: Vec::new(),
            requests_tx,
            requests_rx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_leader(mut self, leader: LeaderFn) -> Self {
        self.leader = leader;
        self
    }

    pub fn with_command_client(mut self, commands: Arc<dyn CommandClient>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_notification_bus(mut self, notifications: Arc<dyn NotificationBus>) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_task_manager(mut self, task_manager: Box<dyn TaskManager>) -> Self {
        self.task_manager = task_manager;
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn running_jobs(&self) -> &[TtlJob] {
        &self.running_jobs
    }

    /// A handle for submitting jobs to this manager's loop.
    pub fn adapter(&self) -> ManagerJobAdapter {
        ManagerJobAdapter::new(
            self.requests_tx.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.schema),
            Arc::clone(&self.clock),
            self.settings.clone(),
            self.config.running_task_limit,
            self.config.internal_sql_timeout,
        )
    }

    pub(super) fn is_leader(&self) -> bool {
        (self.leader)()
    }

    /// Run the loop until `cancel` fires.
    ///
    /// On exit the timer runtime is paused and closed and both worker pools
    /// are resized to zero.
    pub async fn run(
        mut self,
        timer: Arc<dyn TimerService>,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        info!(node_id = %self.id, "ttl job manager started");

        if let Err(e) = self.refresh_caches().await {
            warn!(error = %e, "fail to load caches on start");
        }
        let settings = self.settings.borrow().clone();
        if let Err(e) = self.task_manager.resize_workers_with_settings(&settings).await {
            warn!(error = %e, "fail to resize workers on start");
        }

        let config = self.config.clone();
        let mut info_cache_ticker = ticker(config.info_schema_cache_interval);
        let mut status_cache_ticker = ticker(config.table_status_cache_interval);
        let mut gc_ticker = ticker(config.gc_interval);
        let mut heartbeat_ticker = ticker(config.heartbeat_interval);
        let mut check_job_ticker = ticker(config.check_job_interval);
        let mut reschedule_ticker = ticker(config.reschedule_job_interval);
        let mut timer_ticker = ticker(config.timer_sync_tick_interval);
        let mut task_reschedule_ticker = ticker(config.task_manager_loop_interval);
        let mut task_heartbeat_ticker = ticker(config.task_heartbeat_interval);
        let mut task_check_ticker = ticker(config.check_task_interval);
        let mut scan_finished_ticker = ticker(config.check_scan_finished_interval);
        let mut resize_ticker = ticker(config.resize_workers_interval);

        let mut commands = self.commands.watch_commands();
        let mut scan_notifications = self.notifications.watch(SCAN_TASK_TOPIC);
        let mut task_state = self.task_manager.subscribe_state();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => LoopEvent::Cancelled,
                _ = timer_ticker.tick() => LoopEvent::TimerTick,
                Some(request) = self.requests_rx.recv() => LoopEvent::Submit(request),
                _ = info_cache_ticker.tick() => LoopEvent::InfoSchemaCache,
                _ = status_cache_ticker.tick() => LoopEvent::TableStatusCache,
                _ = gc_ticker.tick() => LoopEvent::Gc,
                _ = heartbeat_ticker.tick() => LoopEvent::Heartbeat,
                _ = check_job_ticker.tick() => LoopEvent::CheckJobs,
                _ = reschedule_ticker.tick() => LoopEvent::RescheduleJobs,
                command = commands.recv() => LoopEvent::Command(command),
                _ = task_reschedule_ticker.tick() => LoopEvent::RescheduleTasks,
                notification = scan_notifications.recv() => LoopEvent::ScanNotification(notification),
                _ = task_check_ticker.tick() => LoopEvent::CheckTasks,
                _ = resize_ticker.tick() => LoopEvent::ResizeWorkers,
                _ = task_heartbeat_ticker.tick() => LoopEvent::TaskHeartbeat,
                _ = scan_finished_ticker.tick() => LoopEvent::ScanFinished,
                Some(()) = task_state.recv() => LoopEvent::ScanFinished,
            };

            let now = self.clock.now();
            match event {
                LoopEvent::Cancelled => break,
                LoopEvent::TimerTick => self.on_timer_tick(timer.as_ref(), now).await,
                LoopEvent::Submit(request) => self.handle_submit_job_request(request, now).await,
                LoopEvent::InfoSchemaCache => {
                    let limit = self.config.internal_sql_timeout;
                    if let Err(e) =
                        bounded(limit, self.info_cache.update(self.schema.as_ref())).await
                    {
                        warn!(error = %e, "fail to update info schema cache");
                    }
                }
                LoopEvent::TableStatusCache => {
                    let limit = self.config.internal_sql_timeout;
                    if let Err(e) =
                        bounded(limit, self.status_cache.update(self.store.as_ref())).await
                    {
                        warn!(error = %e, "fail to update table status cache");
                    }
                }
                LoopEvent::Gc => {
                    self.do_gc(now).await;
                }
                LoopEvent::Heartbeat => self.update_heartbeat(now).await,
                LoopEvent::CheckJobs => {
                    self.check_finished_jobs(now).await;
                    self.check_not_own_jobs();
                }
                LoopEvent::RescheduleJobs => self.reschedule_jobs(now).await,
                LoopEvent::Command(Some(command)) => {
                    self.trigger_ttl_job(command, timer.as_ref(), now).await;
                }
                LoopEvent::Command(None) => {
                    warn!("ttl command watcher closed unexpectedly, watching again");
                    commands = self.commands.watch_commands();
                }
                LoopEvent::RescheduleTasks | LoopEvent::ScanNotification(Some(_)) => {
                    self.reschedule_tasks(now).await;
                }
                LoopEvent::ScanNotification(None) => {
                    warn!("scan task notification watcher closed unexpectedly, watching again");
                    scan_notifications = self.notifications.watch(SCAN_TASK_TOPIC);
                }
                LoopEvent::CheckTasks => {
                    if let Err(e) = self.task_manager.check_invalid_task().await {
                        warn!(error = %e, "fail to check invalid tasks");
                    }
                    if let Err(e) = self.task_manager.check_finished_task(now).await {
                        warn!(error = %e, "fail to check finished tasks");
                    }
                }
                LoopEvent::ResizeWorkers => {
                    let settings = self.settings.borrow().clone();
                    if let Err(e) = self.task_manager.resize_workers_with_settings(&settings).await {
                        warn!(error = %e, "fail to resize workers");
                    }
                }
                LoopEvent::TaskHeartbeat => {
                    let limit = self.config.internal_sql_timeout;
                    if let Err(e) = bounded(limit, self.task_manager.update_heartbeat(now)).await {
                        warn!(error = %e, "fail to update task heartbeat");
                    }
                }
                LoopEvent::ScanFinished => {
                    if self.task_manager.handle_scan_finished_task() {
                        self.reschedule_tasks(now).await;
                    }
                }
            }
        }

        timer.pause();
        timer.close().await;
        let scan = self.task_manager.resize_scan_workers(0).await;
        let delete = self.task_manager.resize_delete_workers(0).await;
        info!(node_id = %self.id, "ttl job manager loop exited");
        scan?;
        delete?;
        Ok(())
    }

    pub(super) async fn refresh_caches(&mut self) -> Result<(), JobError> {
        let limit = self.config.internal_sql_timeout;
        bounded(limit, self.info_cache.update(self.schema.as_ref())).await?;
        bounded(limit, self.status_cache.update(self.store.as_ref())).await?;
        Ok(())
    }

    async fn reschedule_tasks(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.task_manager.reschedule_tasks(now).await {
            warn!(error = %e, "fail to reschedule tasks");
        }
    }

    pub(super) async fn on_timer_tick(&mut self, timer: &dyn TimerService, now: DateTime<Utc>) {
        if !self.is_leader() {
            timer.pause();
            timer.reset_sync();
            return;
        }

        timer.resume();
        let (last_sync, last_version) = timer.last_sync();
        let since_last_sync = last_sync.map(|at| now - at);
        if since_last_sync.is_some_and(|since| since < timer_sync_min_gap()) {
            return;
        }

        let version = self.info_cache.version();
        let overdue = since_last_sync.is_none_or(|since| since > timer_sync_max_gap());
        if version > last_version || overdue {
            let specs = self.timer_specs();
            if let Err(e) = timer.sync_timers(&specs, version, now).await {
                warn!(error = %e, "fail to sync ttl timers");
            }
        }
    }

    fn timer_specs(&self) -> Vec<TimerSpec> {
        self.info_cache
            .tables()
            .map(|table| {
                let last_job_start = self
                    .status_cache
                    .get(table.id)
                    .and_then(|s| s.current_job_start_time.or(s.last_job_start_time));
                TimerSpec::for_table(table, last_job_start)
            })
            .collect()
    }

    async fn handle_submit_job_request(&mut self, request: SubmitJobRequest, now: DateTime<Utc>) {
        let SubmitJobRequest {
            table_id,
            physical_id,
            request_id,
            reply,
        } = request;
        let result = self.submit_job(table_id, physical_id, request_id, now).await;
        if reply.send(result).is_err() {
            debug!(table_id = %physical_id, "submitter went away before the reply");
        }
    }

    pub(super) async fn submit_job(
        &mut self,
        table_id: TableId,
        physical_id: TableId,
        request_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<(), JobError> {
        if !self.is_leader() {
            return Err(JobError::NotLeader);
        }
        if !self.settings.borrow().enable_job {
            return Err(JobError::JobDisabled);
        }

        let limit = self.config.internal_sql_timeout;
        if let Err(e) = bounded(limit, self.info_cache.update(self.schema.as_ref())).await {
            warn!(error = %e, "failed to update info schema cache");
        }

        let table = self
            .info_cache
            .get(physical_id)
            .cloned()
            .ok_or(JobError::PhysicalTableNotFound(physical_id))?;
        if table.table_id != table_id {
            return Err(JobError::TableIdMismatch {
                requested: table_id,
                actual: table.table_id,
                physical: physical_id,
            });
        }
        if !table.enabled {
            return Err(JobError::TableTtlDisabled(physical_id));
        }

        self.lock_new_job(&table, now, request_id, false).await?;
        Ok(())
    }

    /// Take over stale jobs, then cancel local jobs that may no longer run.
    pub(super) async fn reschedule_jobs(&mut self, now: DateTime<Utc>) {
        // Stale jobs are taken over even when jobs are disabled, so that they
        // get cancelled below instead of lingering.
        let heartbeat_timeout = self.config.heartbeat_timeout();
        let stale: Vec<(TableId, TableId)> = self
            .status_cache
            .rows()
            .filter(|s| !self.running_jobs.iter().any(|job| job.table_id == s.table_id))
            .filter(|s| could_lock_for_exist(Some(s), now, heartbeat_timeout))
            .map(|s| (s.table_id, s.parent_table_id))
            .collect();
        for (table_id, parent_table_id) in stale {
            info!(table_id = %table_id, "try lock heartbeat timeout job");
            if let Err(e) = self.lock_hb_timeout_job(table_id, parent_table_id, now).await {
                warn!(table_id = %table_id, error = %e, "failed to lock heartbeat timeout job");
            }
        }

        let reason = {
            let settings = self.settings.borrow();
            if !settings.enable_job {
                Some(JOB_DISABLED)
            } else if !settings.in_window(now) {
                Some(OUT_OF_WINDOW)
            } else {
                None
            }
        };

        let doomed: Vec<(TtlJob, &'static str)> = match reason {
            Some(reason) => self
                .running_jobs
                .iter()
                .rev()
                .map(|job| (job.clone(), reason))
                .collect(),
            None => self
                .running_jobs
                .iter()
                .rev()
                .filter(|job| !self.info_cache.get(job.table_id).is_some_and(|t| t.enabled))
                .map(|job| (job.clone(), TABLE_REMOVED))
                .collect(),
        };
        for (job, reason) in doomed {
            self.cancel_job(&job, now, reason).await;
        }
    }

    async fn cancel_job(&mut self, job: &TtlJob, now: DateTime<Utc>, reason: &str) {
        info!(job_id = %job.id, table_id = %job.table_id, reason, "cancel job");
        if let Some(local) = self.running_jobs.iter_mut().find(|j| j.id == job.id) {
            local.status = JobStatus::Cancelling;
        }
        match self.finish_local_job(job, now, Some(reason)).await {
            Ok(()) => self.remove_job(&job.id),
            Err(e) => warn!(job_id = %job.id, error = %e, "fail to finish job"),
        }
    }

    /// Summarize the tasks of `job` and release it.
    pub(super) async fn finish_local_job(
        &self,
        job: &TtlJob,
        now: DateTime<Utc>,
        cause: Option<&str>,
    ) -> Result<(), JobError> {
        let limit = self.config.internal_sql_timeout;
        let tasks = match bounded(limit, self.store.tasks_for_job(&job.id)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "fail to find all tasks for job, summarize nothing");
                Vec::new()
            }
        };
        let summary = summarize_tasks(&tasks, cause)?;
        bounded(limit, self.store.finish_job(&job.finish_record(&summary, now))).await
    }

    /// Finish jobs whose tasks are all done.
    pub(super) async fn check_finished_jobs(&mut self, now: DateTime<Utc>) {
        let limit = self.config.internal_sql_timeout;
        let jobs: Vec<TtlJob> = self.running_jobs.iter().rev().cloned().collect();
        for job in jobs {
            let tasks = match bounded(limit, self.store.tasks_for_job(&job.id)).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "fail to find all tasks for job, skip check finished");
                    continue;
                }
            };
            if !all_finished(&tasks) {
                continue;
            }

            let summary = match summarize_tasks(&tasks, None) {
                Ok(summary) => summary,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "fail to summarize job");
                    continue;
                }
            };
            info!(
                job_id = %job.id,
                table_id = %job.table_id,
                total_rows = summary.total_rows,
                success_rows = summary.success_rows,
                error_rows = summary.error_rows,
                scan_task_err = %summary.scan_task_err,
                "job has finished"
            );
            match bounded(limit, self.store.finish_job(&job.finish_record(&summary, now))).await {
                Ok(()) => self.remove_job(&job.id),
                Err(e) => warn!(job_id = %job.id, error = %e, "fail to finish job"),
            }
        }
    }

    /// Drop local jobs the status cache says belong to someone else.
    pub(super) fn check_not_own_jobs(&mut self) {
        let id = &self.id;
        let cache = &self.status_cache;
        self.running_jobs.retain(|job| match cache.get(job.table_id) {
            Some(status) if status.is_owned_by(id) => true,
            status => {
                info!(
                    job_id = %job.id,
                    new_owner = ?status.and_then(|s| s.current_job_owner_id.as_ref()),
                    "job has been taken over by another node"
                );
                false
            }
        });
    }

    pub(super) fn remove_job(&mut self, job_id: &JobId) {
        self.running_jobs.retain(|job| &job.id != job_id);
    }
}

fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
