//! Manual trigger commands.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use sweepd_events::{CommandClient, CommandResult, TableTriggerResult, TriggerCommand, TriggerResponse};

use super::lock::bounded;
use super::manager::JobManager;
use super::timer::{JobLookup, TimerService};

pub(crate) const NOT_IN_WINDOW: &str = "not in ttl job window";
const TRIGGER_DISABLED: &str = "ttl job is disabled";
const TIMEOUT: &str = "timeout";

/// Poll every lookup until each has resolved or `deadline` passes, then
/// fold the per-table results into one response.
///
/// `lookups[i]` belongs to `results[i]`; a `None` lookup means the table
/// already failed.
pub async fn collect_trigger_results(
    mut results: Vec<TableTriggerResult>,
    mut lookups: Vec<Option<Box<dyn JobLookup>>>,
    poll: Duration,
    deadline: Duration,
) -> CommandResult {
    let poll = poll.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let expired = tokio::time::sleep(deadline);
    tokio::pin!(expired);

    while lookups.iter().any(Option::is_some) {
        tokio::select! {
            _ = &mut expired => break,
            _ = ticker.tick() => {}
        }

        for (result, slot) in results.iter_mut().zip(lookups.iter_mut()) {
            let Some(lookup) = slot else {
                continue;
            };
            match lookup.poll() {
                Ok(Some(job_id)) => {
                    result.job_id = Some(job_id);
                    *slot = None;
                }
                Ok(None) => {}
                Err(message) => {
                    result.error_message = Some(message);
                    *slot = None;
                }
            }
        }
    }

    for result in &mut results {
        if result.job_id.is_none() && result.error_message.is_none() {
            result.error_message = Some(TIMEOUT.to_string());
        }
    }

    if results.iter().all(|r| r.error_message.is_some()) {
        let first = results
            .first()
            .and_then(|r| r.error_message.clone())
            .unwrap_or_else(|| TIMEOUT.to_string());
        return Err(first);
    }
    Ok(TriggerResponse {
        table_results: results,
    })
}

fn respond(commands: &dyn CommandClient, request_id: &str, result: CommandResult) {
    if let Err(e) = commands.respond(request_id, result) {
        warn!(request_id, error = %e, "fail to respond ttl trigger command");
    }
}

impl JobManager {
    /// Claim `command` and, if this node wins it, trigger a job on every
    /// physical table matching the requested name.
    ///
    /// The response is sent from a spawned task once every table has an
    /// outcome.
    pub(super) async fn trigger_ttl_job(
        &mut self,
        command: TriggerCommand,
        timer: &dyn TimerService,
        now: DateTime<Utc>,
    ) {
        let request_id = command.request_id.clone();
        match self.commands.take_command(&request_id) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(
                    request_id,
                    database = %command.database,
                    table = %command.table,
                    error = %e,
                    "failed to take ttl trigger job command"
                );
                return;
            }
        }
        info!(
            request_id,
            database = %command.database,
            table = %command.table,
            "get a command to trigger a new ttl job"
        );

        let commands = self.commands.as_ref();
        let refusal = {
            let settings = self.settings.borrow();
            if !settings.enable_job {
                Some(TRIGGER_DISABLED)
            } else if !settings.in_window(now) {
                Some(NOT_IN_WINDOW)
            } else {
                None
            }
        };
        if let Some(reason) = refusal {
            respond(commands, &request_id, Err(reason.to_string()));
            return;
        }

        let limit = self.config.internal_sql_timeout;
        if let Err(e) = bounded(limit, self.info_cache.update(self.schema.as_ref())).await {
            respond(self.commands.as_ref(), &request_id, Err(e.to_string()));
            return;
        }
        if let Err(e) = bounded(limit, self.status_cache.update(self.store.as_ref())).await {
            respond(self.commands.as_ref(), &request_id, Err(e.to_string()));
            return;
        }

        let mut tables: Vec<_> = self
            .info_cache
            .tables()
            .filter(|t| t.matches_name(&command.database, &command.table))
            .cloned()
            .collect();
        if tables.is_empty() {
            let message = format!("table {}.{} not exists", command.database, command.table);
            respond(self.commands.as_ref(), &request_id, Err(message));
            return;
        }
        tables.sort_by_key(|t| t.id);

        let mut results = Vec::with_capacity(tables.len());
        let mut lookups = Vec::with_capacity(tables.len());
        for table in &tables {
            let mut result = TableTriggerResult {
                table_id: table.id,
                database: command.database.clone(),
                table: command.table.clone(),
                partition: table.partition.clone(),
                job_id: None,
                error_message: None,
            };
            match timer.manual_trigger(table).await {
                Ok(lookup) => lookups.push(Some(lookup)),
                Err(e) => {
                    result.error_message = Some(e.to_string());
                    lookups.push(None);
                }
            }
            results.push(result);
        }

        let commands = std::sync::Arc::clone(&self.commands);
        let poll = self.config.manual_trigger_poll_interval;
        let deadline = self.config.manual_trigger_deadline;
        tokio::spawn(async move {
            let outcome = collect_trigger_results(results, lookups, poll, deadline).await;
            match &outcome {
                Ok(response) => info!(
                    request_id,
                    database = %command.database,
                    table = %command.table,
                    table_results = %serde_json::to_string(&response.table_results).unwrap_or_default(),
                    "done to trigger a new ttl job"
                ),
                Err(message) => warn!(request_id, error = %message, "ttl trigger failed"),
            }
            respond(commands.as_ref(), &request_id, outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweepd_core::{JobId, TableId};

    struct Scripted {
        answers: Vec<Result<Option<JobId>, String>>,
    }

    impl JobLookup for Scripted {
        fn poll(&mut self) -> Result<Option<JobId>, String> {
            if self.answers.len() > 1 {
                self.answers.remove(0)
            } else {
                self.answers[0].clone()
            }
        }
    }

    fn result(id: i64) -> TableTriggerResult {
        TableTriggerResult {
            table_id: TableId::new(id),
            database: "test".into(),
            table: "t".into(),
            partition: None,
            job_id: None,
            error_message: None,
        }
    }

    fn lookup(answers: Vec<Result<Option<JobId>, String>>) -> Option<Box<dyn JobLookup>> {
        Some(Box::new(Scripted { answers }))
    }

    #[tokio::test(start_paused = true)]
    async fn collects_job_ids_and_errors() {
        let job: JobId = "job-1".parse().unwrap();
        let response = collect_trigger_results(
            vec![result(1), result(2), result(3)],
            vec![
                lookup(vec![Ok(None), Ok(Some(job.clone()))]),
                lookup(vec![Err("locked".into())]),
                None,
            ],
            Duration::from_secs(2),
            Duration::from_secs(300),
        )
        .await
        .unwrap();

        let rows = response.table_results;
        assert_eq!(rows[0].job_id, Some(job));
        assert_eq!(rows[1].error_message.as_deref(), Some("locked"));
        // No lookup and no error yet: reported as a timeout.
        assert_eq!(rows[2].error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_tables_time_out() {
        let outcome = collect_trigger_results(
            vec![result(1)],
            vec![lookup(vec![Ok(None)])],
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
        .await;
        assert_eq!(outcome, Err("timeout".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn all_errors_return_first() {
        let mut failed = result(2);
        failed.error_message = Some("second".into());
        let outcome = collect_trigger_results(
            vec![result(1), failed],
            vec![lookup(vec![Err("first".into())]), None],
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
        .await;
        assert_eq!(outcome, Err("first".to_string()));
    }
}
