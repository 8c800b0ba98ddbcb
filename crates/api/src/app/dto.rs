use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use sweepd_codec::Datum;
use sweepd_core::{DayWindow, JobId, TableId};
use sweepd_infra::{PhysicalTable, TtlSettings};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub table_id: i64,
    pub physical_id: i64,
    /// Generated when absent.
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub database: String,
    pub table: String,
}

/// Partial update of the runtime settings; absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateSettingsRequest {
    pub enable_job: Option<bool>,
    /// `HH:MM`
    pub window_start: Option<String>,
    /// `HH:MM`
    pub window_end: Option<String>,
    /// IANA zone name, e.g. `Asia/Tokyo`.
    pub time_zone: Option<String>,
    pub scan_workers: Option<usize>,
    pub delete_workers: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PutTableRequest {
    /// Logical table id; defaults to the physical id.
    pub table_id: Option<i64>,
    pub schema: String,
    pub name: String,
    pub partition: Option<String>,
    pub ttl_column: String,
    pub ttl_interval_secs: i64,
    pub job_interval_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub split_points: Vec<Vec<i64>>,
}

fn default_enabled() -> bool {
    true
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub request_id: JobId,
}

// -------------------------
// Mapping helpers
// -------------------------

pub fn parse_request_id(raw: Option<String>) -> Result<JobId, axum::response::Response> {
    match raw {
        None => Ok(JobId::generate()),
        Some(raw) => raw
            .parse()
            .map_err(|e: sweepd_core::DomainError| errors::bad_request(e.to_string())),
    }
}

fn format_bound(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

impl UpdateSettingsRequest {
    /// Apply onto `current`, validating every field before anything changes.
    pub fn apply(self, current: &TtlSettings) -> Result<TtlSettings, axum::response::Response> {
        let mut next = current.clone();

        if self.window_start.is_some() || self.window_end.is_some() {
            let start = self
                .window_start
                .unwrap_or_else(|| format_bound(current.window.start));
            let end = self
                .window_end
                .unwrap_or_else(|| format_bound(current.window.end));
            next.window =
                DayWindow::parse(&start, &end).map_err(|e| errors::bad_request(e.to_string()))?;
        }
        if let Some(zone) = self.time_zone {
            next.time_zone = zone
                .parse::<Tz>()
                .map_err(|e| errors::bad_request(format!("invalid time zone {zone:?}: {e}")))?;
        }
        if let Some(enable) = self.enable_job {
            next.enable_job = enable;
        }
        if let Some(count) = self.scan_workers {
            next.scan_workers = count;
        }
        if let Some(count) = self.delete_workers {
            next.delete_workers = count;
        }
        Ok(next)
    }
}

impl PutTableRequest {
    pub fn into_table(self, physical_id: i64) -> Result<PhysicalTable, axum::response::Response> {
        if self.ttl_interval_secs <= 0 || self.job_interval_secs <= 0 {
            return Err(errors::bad_request("ttl_interval_secs and job_interval_secs must be positive"));
        }
        if self.split_points.iter().any(Vec::is_empty) {
            return Err(errors::bad_request("split points must not be empty tuples"));
        }
        let seconds = |secs: i64| {
            chrono::Duration::try_seconds(secs)
                .ok_or_else(|| errors::bad_request(format!("interval of {secs}s is out of range")))
        };
        let ttl_interval = seconds(self.ttl_interval_secs)?;
        let job_interval = seconds(self.job_interval_secs)?;
        Ok(PhysicalTable {
            id: TableId::new(physical_id),
            table_id: TableId::new(self.table_id.unwrap_or(physical_id)),
            schema: self.schema,
            name: self.name,
            partition: self.partition,
            ttl_column: self.ttl_column,
            ttl_interval,
            job_interval,
            enabled: self.enabled,
            split_points: self
                .split_points
                .into_iter()
                .map(|point| point.into_iter().map(Datum::Int64).collect())
                .collect(),
        })
    }
}
