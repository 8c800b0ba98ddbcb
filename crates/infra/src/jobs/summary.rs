//! Job summary aggregation.

use crate::store::{TaskStatus, TtlTask};

use super::types::{JobError, TtlSummary};

/// Fold the tasks of a job into its summary.
///
/// `cause` is the reason a job ended early (cancel or timeout); it is listed
/// before any scan task error.
pub fn summarize_tasks(tasks: &[TtlTask], cause: Option<&str>) -> Result<TtlSummary, JobError> {
    let mut summary = TtlSummary {
        total_scan_task: tasks.len(),
        ..TtlSummary::default()
    };

    let mut errors: Vec<&str> = Vec::new();
    if let Some(cause) = cause.filter(|c| !c.is_empty()) {
        errors.push(cause);
    }

    for task in tasks {
        if let Some(state) = &task.state {
            summary.total_rows += state.total_rows;
            summary.success_rows += state.success_rows;
            summary.error_rows += state.error_rows;
            if !state.scan_task_err.is_empty() {
                errors.push(&state.scan_task_err);
            }
        }
        if task.status != TaskStatus::Waiting {
            summary.scheduled_scan_task += 1;
        }
        if task.status == TaskStatus::Finished {
            summary.finished_scan_task += 1;
        }
    }

    summary.scan_task_err = errors.join("; ");
    summary.summary_text = serde_json::to_string(&summary)?;
    Ok(summary)
}

/// Whether every task of a job is done. A job without tasks is done.
pub fn all_finished(tasks: &[TtlTask]) -> bool {
    tasks.iter().all(|t| t.status == TaskStatus::Finished)
}
