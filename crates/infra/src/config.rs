//! Scheduler configuration.
//!
//! [`TtlConfig`] holds the intervals fixed at startup. [`TtlSettings`] holds
//! the knobs an operator may flip at runtime; they travel over a
//! `tokio::sync::watch` channel and the job loop reads the latest value on
//! every tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use sweepd_core::DayWindow;

/// Static scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlConfig {
    /// How often owned jobs refresh their heartbeat.
    pub heartbeat_interval: Duration,
    pub info_schema_cache_interval: Duration,
    pub table_status_cache_interval: Duration,
    pub gc_interval: Duration,
    /// Period of both the finished/not-owned check and job rescheduling.
    pub check_job_interval: Duration,
    pub reschedule_job_interval: Duration,
    pub resize_workers_interval: Duration,
    pub task_manager_loop_interval: Duration,
    pub task_heartbeat_interval: Duration,
    pub check_task_interval: Duration,
    pub check_scan_finished_interval: Duration,
    pub timer_sync_tick_interval: Duration,
    /// Jobs older than this are force-finished.
    pub job_timeout: Duration,
    /// Upper bound for every store call made from the job loop.
    pub internal_sql_timeout: Duration,
    pub manual_trigger_deadline: Duration,
    pub manual_trigger_poll_interval: Duration,
    pub history_retention_days: u32,
    /// Maximum number of scan ranges per job.
    pub scan_split_count: usize,
    /// New jobs are refused while this many tasks are waiting or running.
    pub running_task_limit: usize,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            info_schema_cache_interval: Duration::from_secs(120),
            table_status_cache_interval: Duration::from_secs(120),
            gc_interval: Duration::from_secs(60 * 60),
            check_job_interval: Duration::from_secs(10),
            reschedule_job_interval: Duration::from_secs(60),
            resize_workers_interval: Duration::from_secs(30),
            task_manager_loop_interval: Duration::from_secs(60),
            task_heartbeat_interval: Duration::from_secs(60),
            check_task_interval: Duration::from_secs(5),
            check_scan_finished_interval: Duration::from_secs(5),
            timer_sync_tick_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(6 * 60 * 60),
            internal_sql_timeout: Duration::from_secs(30),
            manual_trigger_deadline: Duration::from_secs(5 * 60),
            manual_trigger_poll_interval: Duration::from_secs(2),
            history_retention_days: 90,
            scan_split_count: 64,
            running_task_limit: 256,
        }
    }
}

impl TtlConfig {
    /// Load from `SWEEPD_*` environment variables.
    ///
    /// Durations are whole seconds. Unset variables keep the default; values
    /// that do not parse (or are zero) keep the default and log a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let secs = |key: &str, current: &mut Duration| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u64>() {
                    Ok(v) if v > 0 => *current = Duration::from_secs(v),
                    _ => warn!(key, value = %raw, "invalid duration, keeping default"),
                }
            }
        };
        secs("SWEEPD_HEARTBEAT_INTERVAL_SECS", &mut config.heartbeat_interval);
        secs("SWEEPD_INFO_SCHEMA_CACHE_INTERVAL_SECS", &mut config.info_schema_cache_interval);
        secs("SWEEPD_TABLE_STATUS_CACHE_INTERVAL_SECS", &mut config.table_status_cache_interval);
        secs("SWEEPD_GC_INTERVAL_SECS", &mut config.gc_interval);
        secs("SWEEPD_CHECK_JOB_INTERVAL_SECS", &mut config.check_job_interval);
        secs("SWEEPD_RESCHEDULE_JOB_INTERVAL_SECS", &mut config.reschedule_job_interval);
        secs("SWEEPD_RESIZE_WORKERS_INTERVAL_SECS", &mut config.resize_workers_interval);
        secs("SWEEPD_TASK_MANAGER_LOOP_INTERVAL_SECS", &mut config.task_manager_loop_interval);
        secs("SWEEPD_TASK_HEARTBEAT_INTERVAL_SECS", &mut config.task_heartbeat_interval);
        secs("SWEEPD_CHECK_TASK_INTERVAL_SECS", &mut config.check_task_interval);
        secs("SWEEPD_CHECK_SCAN_FINISHED_INTERVAL_SECS", &mut config.check_scan_finished_interval);
        secs("SWEEPD_TIMER_SYNC_TICK_INTERVAL_SECS", &mut config.timer_sync_tick_interval);
        secs("SWEEPD_JOB_TIMEOUT_SECS", &mut config.job_timeout);
        secs("SWEEPD_INTERNAL_SQL_TIMEOUT_SECS", &mut config.internal_sql_timeout);
        secs("SWEEPD_MANUAL_TRIGGER_DEADLINE_SECS", &mut config.manual_trigger_deadline);
        secs("SWEEPD_MANUAL_TRIGGER_POLL_INTERVAL_SECS", &mut config.manual_trigger_poll_interval);

        let count = |key: &str, current: &mut usize| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<usize>() {
                    Ok(v) if v > 0 => *current = v,
                    _ => warn!(key, value = %raw, "invalid count, keeping default"),
                }
            }
        };
        count("SWEEPD_SCAN_SPLIT_COUNT", &mut config.scan_split_count);
        count("SWEEPD_RUNNING_TASK_LIMIT", &mut config.running_task_limit);

        if let Some(raw) = lookup("SWEEPD_HISTORY_RETENTION_DAYS") {
            match raw.trim().parse::<u32>() {
                Ok(v) if v > 0 => config.history_retention_days = v,
                _ => warn!(value = %raw, "invalid SWEEPD_HISTORY_RETENTION_DAYS, keeping default"),
            }
        }

        config
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_table_status_cache_interval(mut self, interval: Duration) -> Self {
        self.table_status_cache_interval = interval;
        self
    }

    pub fn with_info_schema_cache_interval(mut self, interval: Duration) -> Self {
        self.info_schema_cache_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_internal_sql_timeout(mut self, timeout: Duration) -> Self {
        self.internal_sql_timeout = timeout;
        self
    }

    pub fn with_manual_trigger(mut self, poll_interval: Duration, deadline: Duration) -> Self {
        self.manual_trigger_poll_interval = poll_interval;
        self.manual_trigger_deadline = deadline;
        self
    }

    pub fn with_scan_split_count(mut self, count: usize) -> Self {
        self.scan_split_count = count;
        self
    }

    pub fn with_running_task_limit(mut self, limit: usize) -> Self {
        self.running_task_limit = limit;
        self
    }

    /// Heartbeat age after which another node may take a job over.
    ///
    /// Status rows are read through a cache, so a heartbeat can look older
    /// than it is by up to one cache interval; the larger of the two bounds
    /// wins.
    pub fn heartbeat_timeout(&self) -> Duration {
        (self.heartbeat_interval * 2).max(self.table_status_cache_interval * 2)
    }
}

/// Runtime-adjustable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlSettings {
    pub enable_job: bool,
    pub window: DayWindow,
    pub time_zone: Tz,
    pub scan_workers: usize,
    pub delete_workers: usize,
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            enable_job: true,
            window: DayWindow::default(),
            time_zone: Tz::UTC,
            scan_workers: 4,
            delete_workers: 4,
        }
    }
}

impl TtlSettings {
    /// Whether `now` falls inside the schedule window, in the configured zone.
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.window.contains(now.with_timezone(&self.time_zone).time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use std::collections::HashMap;

    #[test]
    fn heartbeat_timeout_takes_larger_bound() {
        let config = TtlConfig::default()
            .with_heartbeat_interval(Duration::from_secs(60))
            .with_table_status_cache_interval(Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(120));

        let config = config.with_table_status_cache_interval(Duration::from_secs(300));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn env_overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = [
            ("SWEEPD_HEARTBEAT_INTERVAL_SECS", "15"),
            ("SWEEPD_GC_INTERVAL_SECS", "soon"),
            ("SWEEPD_JOB_TIMEOUT_SECS", "0"),
            ("SWEEPD_SCAN_SPLIT_COUNT", "8"),
        ]
        .into_iter()
        .collect();
        let config = TtlConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.gc_interval, TtlConfig::default().gc_interval);
        assert_eq!(config.job_timeout, TtlConfig::default().job_timeout);
        assert_eq!(config.scan_split_count, 8);
    }

    #[test]
    fn window_is_evaluated_in_configured_zone() {
        let settings = TtlSettings {
            window: DayWindow::new(
                NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
            ),
            time_zone: chrono_tz::Asia::Tokyo,
            ..TtlSettings::default()
        };
        // 18:30 UTC is 03:30 in Tokyo.
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 18, 30, 0).unwrap();
        assert!(settings.in_window(now));
        assert!(!settings.in_window(now + chrono::Duration::hours(6)));
    }
}
