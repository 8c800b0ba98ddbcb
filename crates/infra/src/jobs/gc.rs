//! Garbage collection of scheduler rows.

use chrono::{DateTime, Days, Utc};
use tracing::{debug, info, instrument, warn};

use super::lock::bounded;
use super::manager::JobManager;

/// Rows removed by one GC pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub status_rows: u64,
    pub task_rows: u64,
    pub history_rows: u64,
}

/// Start of the current UTC day minus `retention_days`.
pub fn history_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    let today = now.date_naive();
    let day = today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(today);
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

impl JobManager {
    /// Remove status rows of dropped tables, orphan tasks and old history.
    ///
    /// Leader only. Every step runs even when an earlier one failed.
    #[instrument(skip(self), fields(node_id = %self.id))]
    pub(super) async fn do_gc(&mut self, now: DateTime<Utc>) -> GcReport {
        let mut report = GcReport::default();
        if !self.is_leader() {
            return report;
        }

        let limit = self.config.internal_sql_timeout;
        // Status rows are only collected against a fresh schema; a stale one
        // could miss newly created tables.
        match bounded(limit, self.info_cache.update(self.schema.as_ref())).await {
            Ok(()) => {
                let existing = self.info_cache.ids();
                match bounded(limit, self.store.gc_table_status(&existing)).await {
                    Ok(n) => report.status_rows = n,
                    Err(e) => warn!(error = %e, "fail to gc ttl table status"),
                }
            }
            Err(e) => warn!(error = %e, "fail to update info schema cache before gc"),
        }

        match bounded(limit, self.store.gc_tasks()).await {
            Ok(n) => report.task_rows = n,
            Err(e) => warn!(error = %e, "fail to gc ttl tasks"),
        }

        let cutoff = history_cutoff(now, self.config.history_retention_days);
        match bounded(limit, self.store.gc_job_history(cutoff)).await {
            Ok(n) => report.history_rows = n,
            Err(e) => warn!(error = %e, "fail to gc ttl job history"),
        }

        if report == GcReport::default() {
            debug!("ttl gc found nothing to remove");
        } else {
            info!(
                status_rows = report.status_rows,
                task_rows = report.task_rows,
                history_rows = report.history_rows,
                "ttl gc done"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_is_start_of_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 17, 45, 3).unwrap();
        assert_eq!(
            history_cutoff(now, 90),
            Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(
            history_cutoff(now, 1),
            Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap()
        );
    }
}
