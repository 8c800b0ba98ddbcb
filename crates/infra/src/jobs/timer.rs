//! Periodic job triggering.
//!
//! The job loop drives a [`TimerService`]: on the leader it keeps the timers
//! in sync with the schema and resumes the runtime; elsewhere it pauses it.
//! Firing a timer means submitting a job through the [`ManagerJobAdapter`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sweepd_core::{Clock, JobId, TableId};

use crate::schema::PhysicalTable;

use super::adapter::ManagerJobAdapter;
use super::types::JobError;

/// Delay before a timer whose submission was refused fires again.
fn retry_delay() -> chrono::Duration {
    chrono::Duration::minutes(1)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("timer service is closed")]
    Closed,
    #[error("timer store: {0}")]
    Store(String),
}

/// Desired timer for one physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSpec {
    pub table_id: TableId,
    pub physical_id: TableId,
    pub job_interval: chrono::Duration,
    /// Start of the latest job, running or finished.
    pub last_job_start: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl TimerSpec {
    pub fn for_table(table: &PhysicalTable, last_job_start: Option<DateTime<Utc>>) -> Self {
        Self {
            table_id: table.table_id,
            physical_id: table.id,
            job_interval: table.job_interval,
            last_job_start,
            enabled: table.enabled,
        }
    }
}

/// Resolves the job created by a manual trigger.
pub trait JobLookup: Send {
    /// `Ok(Some(job_id))` once the job exists, `Ok(None)` while pending, and
    /// `Err(message)` if the trigger failed.
    fn poll(&mut self) -> Result<Option<JobId>, String>;
}

#[async_trait]
pub trait TimerService: Send + Sync {
    fn pause(&self);

    fn resume(&self);

    /// Time and schema version of the latest sync.
    fn last_sync(&self) -> (Option<DateTime<Utc>>, i64);

    /// Forget the latest sync so the next one runs unconditionally.
    fn reset_sync(&self);

    async fn sync_timers(
        &self,
        specs: &[TimerSpec],
        version: i64,
        now: DateTime<Utc>,
    ) -> Result<(), TimerError>;

    /// Fire the timer of `table` now.
    async fn manual_trigger(&self, table: &PhysicalTable) -> Result<Box<dyn JobLookup>, TimerError>;

    async fn close(&self);
}

#[async_trait]
impl<T> TimerService for Arc<T>
where
    T: TimerService + ?Sized,
{
    fn pause(&self) {
        (**self).pause()
    }

    fn resume(&self) {
        (**self).resume()
    }

    fn last_sync(&self) -> (Option<DateTime<Utc>>, i64) {
        (**self).last_sync()
    }

    fn reset_sync(&self) {
        (**self).reset_sync()
    }

    async fn sync_timers(
        &self,
        specs: &[TimerSpec],
        version: i64,
        now: DateTime<Utc>,
    ) -> Result<(), TimerError> {
        (**self).sync_timers(specs, version, now).await
    }

    async fn manual_trigger(&self, table: &PhysicalTable) -> Result<Box<dyn JobLookup>, TimerError> {
        (**self).manual_trigger(table).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[derive(Debug, Clone)]
struct TimerEntry {
    spec: TimerSpec,
    next_due: DateTime<Utc>,
}

#[derive(Debug)]
struct TimerState {
    paused: bool,
    timers: HashMap<TableId, TimerEntry>,
    last_sync: Option<DateTime<Utc>>,
    last_version: i64,
}

/// Single-node timer service.
///
/// Timers live in memory; a background task checks them every tick while the
/// service is resumed.
pub struct LocalTimerService {
    adapter: ManagerJobAdapter,
    clock: Arc<dyn Clock>,
    state: Mutex<TimerState>,
    cancel: CancellationToken,
}

impl LocalTimerService {
    /// Create the service and start its runtime task. The service starts
    /// paused.
    pub fn spawn(adapter: ManagerJobAdapter, clock: Arc<dyn Clock>, tick: Duration) -> Arc<Self> {
        let service = Arc::new(Self {
            adapter,
            clock,
            state: Mutex::new(TimerState {
                paused: true,
                timers: HashMap::new(),
                last_sync: None,
                last_version: 0,
            }),
            cancel: CancellationToken::new(),
        });
        tokio::spawn(Arc::clone(&service).run(tick));
        service
    }

    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Next fire time of a table's timer.
    #[cfg(test)]
    fn next_due(&self, physical_id: TableId) -> Option<DateTime<Utc>> {
        self.state().timers.get(&physical_id).map(|e| e.next_due)
    }

    async fn run(self: Arc<Self>, tick: Duration) {
        let tick = tick.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.fire_due_timers().await,
            }
        }
        debug!("timer runtime stopped");
    }

    async fn fire_due_timers(&self) {
        let now = self.clock.now();
        let due: Vec<TimerSpec> = {
            let state = self.state();
            if state.paused {
                return;
            }
            state
                .timers
                .values()
                .filter(|e| e.spec.enabled && e.next_due <= now)
                .map(|e| e.spec.clone())
                .collect()
        };

        for spec in due {
            let next_due = if self.fire(&spec).await {
                now + spec.job_interval
            } else {
                now + retry_delay()
            };
            if let Some(entry) = self.state().timers.get_mut(&spec.physical_id) {
                entry.next_due = next_due;
            }
        }
    }

    async fn fire(&self, spec: &TimerSpec) -> bool {
        if !self.adapter.can_submit_job(spec.table_id, spec.physical_id).await {
            debug!(table_id = %spec.physical_id, "ttl job cannot be submitted now");
            return false;
        }

        let request_id = JobId::generate();
        match self
            .adapter
            .submit_job(spec.table_id, spec.physical_id, request_id.clone())
            .await
        {
            Ok(()) => {
                info!(job_id = %request_id, table_id = %spec.physical_id, "timer submitted ttl job");
                true
            }
            Err(e) => {
                warn!(table_id = %spec.physical_id, error = %e, "timer failed to submit ttl job");
                false
            }
        }
    }
}

#[async_trait]
impl TimerService for LocalTimerService {
    fn pause(&self) {
        self.state().paused = true;
    }

    fn resume(&self) {
        self.state().paused = false;
    }

    fn last_sync(&self) -> (Option<DateTime<Utc>>, i64) {
        let state = self.state();
        (state.last_sync, state.last_version)
    }

    fn reset_sync(&self) {
        let mut state = self.state();
        state.last_sync = None;
        state.last_version = 0;
    }

    async fn sync_timers(
        &self,
        specs: &[TimerSpec],
        version: i64,
        now: DateTime<Utc>,
    ) -> Result<(), TimerError> {
        if self.cancel.is_cancelled() {
            return Err(TimerError::Closed);
        }

        let mut state = self.state();
        let mut timers = HashMap::with_capacity(specs.len());
        for spec in specs {
            let from_history = spec
                .last_job_start
                .and_then(|start| start.checked_add_signed(spec.job_interval));
            let next_due = match (state.timers.remove(&spec.physical_id), from_history) {
                (Some(entry), Some(at)) => entry.next_due.max(at),
                (Some(entry), None) => entry.next_due,
                (None, Some(at)) => at,
                (None, None) => now,
            };
            timers.insert(
                spec.physical_id,
                TimerEntry {
                    spec: spec.clone(),
                    next_due,
                },
            );
        }
        state.timers = timers;
        state.last_sync = Some(now);
        state.last_version = version;
        debug!(timers = state.timers.len(), version, "ttl timers synced");
        Ok(())
    }

    async fn manual_trigger(&self, table: &PhysicalTable) -> Result<Box<dyn JobLookup>, TimerError> {
        if self.cancel.is_cancelled() {
            return Err(TimerError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let adapter = self.adapter.clone();
        let job_id = JobId::generate();
        let (table_id, physical_id, request_id) = (table.table_id, table.id, job_id.clone());
        tokio::spawn(async move {
            let result = adapter.submit_job(table_id, physical_id, request_id).await;
            let _ = tx.send(result);
        });

        Ok(Box::new(SubmissionLookup { job_id, reply: rx }))
    }

    async fn close(&self) {
        self.pause();
        self.cancel.cancel();
    }
}

struct SubmissionLookup {
    job_id: JobId,
    reply: oneshot::Receiver<Result<(), JobError>>,
}

impl JobLookup for SubmissionLookup {
    fn poll(&mut self) -> Result<Option<JobId>, String> {
        match self.reply.try_recv() {
            Ok(Ok(())) => Ok(Some(self.job_id.clone())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err("manual trigger was dropped".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtlSettings;
    use crate::schema::{SchemaCatalog, test_table};
    use crate::store::InMemoryTtlStore;
    use chrono::TimeZone;
    use sweepd_core::ManualClock;
    use tokio::sync::{mpsc, watch};

    use crate::jobs::types::SubmitJobRequest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn service() -> (Arc<LocalTimerService>, mpsc::Receiver<SubmitJobRequest>) {
        let store = InMemoryTtlStore::new();
        store.put_table(&test_table(1, "t1")).await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (_settings_tx, settings) = watch::channel(TtlSettings::default());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
        let adapter = ManagerJobAdapter::new(
            tx,
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::clone(&clock),
            settings,
            16,
            Duration::from_secs(5),
        );
        (
            LocalTimerService::spawn(adapter, clock, Duration::from_millis(10)),
            rx,
        )
    }

    #[tokio::test]
    async fn sync_schedules_from_last_job_start() {
        let (timer, _rx) = service().await;
        let table = test_table(1, "t1");
        let started = now() - chrono::Duration::minutes(10);

        timer
            .sync_timers(&[TimerSpec::for_table(&table, Some(started))], 3, now())
            .await
            .unwrap();
        assert_eq!(timer.last_sync(), (Some(now()), 3));
        assert_eq!(timer.next_due(table.id), Some(started + table.job_interval));

        timer.reset_sync();
        assert_eq!(timer.last_sync(), (None, 0));

        timer.sync_timers(&[], 4, now()).await.unwrap();
        assert_eq!(timer.next_due(table.id), None);
        timer.close().await;
    }

    #[tokio::test]
    async fn resumed_runtime_submits_due_tables() {
        let (timer, mut rx) = service().await;
        let table = test_table(1, "t1");
        timer
            .sync_timers(&[TimerSpec::for_table(&table, None)], 1, now())
            .await
            .unwrap();
        assert!(timer.is_paused());
        timer.resume();

        let request = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.physical_id, table.id);
        request.reply.send(Ok(())).unwrap();

        // Wait for the runtime to record the success.
        for _ in 0..100 {
            if timer.next_due(table.id) == Some(now() + table.job_interval) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(timer.next_due(table.id), Some(now() + table.job_interval));
        timer.close().await;
    }

    #[tokio::test]
    async fn manual_trigger_lookup_resolves_with_reply() {
        let (timer, mut rx) = service().await;
        let mut lookup = timer.manual_trigger(&test_table(1, "t1")).await.unwrap();

        let request = rx.recv().await.unwrap();
        assert_eq!(lookup.poll(), Ok(None));
        let job_id = request.request_id.clone();
        request.reply.send(Ok(())).unwrap();

        let mut resolved = None;
        for _ in 0..100 {
            if let Some(id) = lookup.poll().unwrap() {
                resolved = Some(id);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(resolved, Some(job_id));

        timer.close().await;
        assert!(timer.manual_trigger(&test_table(1, "t1")).await.is_err());
    }
}
