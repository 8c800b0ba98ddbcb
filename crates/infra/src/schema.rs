//! Tables with row expiry, as seen by the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use sweepd_codec::{CodecResult, Datum, encode_key};
use sweepd_core::TableId;

use crate::store::StoreError;

/// A physical table (a table, or one partition of it) with expiry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalTable {
    /// Physical id. Equals `table_id` for unpartitioned tables.
    pub id: TableId,
    /// Logical table id.
    pub table_id: TableId,
    pub schema: String,
    pub name: String,
    pub partition: Option<String>,
    pub ttl_column: String,
    /// Rows whose `ttl_column` is older than `now - ttl_interval` expire.
    pub ttl_interval: chrono::Duration,
    /// Minimum time between two job starts.
    pub job_interval: chrono::Duration,
    pub enabled: bool,
    /// Primary-key tuples at which the key space may be split.
    pub split_points: Vec<Vec<Datum>>,
}

/// A half-open key range `[start, end)`. `None` bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
}

impl PhysicalTable {
    pub fn full_name(&self) -> String {
        match &self.partition {
            Some(p) => format!("{}.{}.{}", self.schema, self.name, p),
            None => format!("{}.{}", self.schema, self.name),
        }
    }

    /// Case-insensitive match on schema and table name.
    pub fn matches_name(&self, schema: &str, name: &str) -> bool {
        self.schema.eq_ignore_ascii_case(schema) && self.name.eq_ignore_ascii_case(name)
    }

    pub fn eval_expire_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.ttl_interval
    }

    /// Split the key space into at most `n` contiguous ranges.
    ///
    /// Split points are key-encoded, sorted and deduplicated. When there are
    /// more than `n - 1`, an evenly spaced subset is used.
    pub fn split_scan_ranges(&self, n: usize, tz: &Tz) -> CodecResult<Vec<ScanRange>> {
        let mut keys = self
            .split_points
            .iter()
            .map(|point| encode_key(tz, point))
            .collect::<CodecResult<Vec<_>>>()?;
        keys.sort();
        keys.dedup();

        let wanted = n.saturating_sub(1);
        if keys.len() > wanted {
            keys = sample_evenly(&keys, wanted);
        }

        let mut ranges = Vec::with_capacity(keys.len() + 1);
        let mut start = None;
        for key in keys {
            ranges.push(ScanRange {
                start: start.take(),
                end: Some(key.clone()),
            });
            start = Some(key);
        }
        ranges.push(ScanRange { start, end: None });
        Ok(ranges)
    }
}

fn sample_evenly(keys: &[Vec<u8>], k: usize) -> Vec<Vec<u8>> {
    let len = keys.len();
    (1..=k).map(|i| keys[i * len / (k + 1)].clone()).collect()
}

/// A versioned view of every table with expiry settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSnapshot {
    /// Increases whenever the set of tables or their settings change.
    pub version: i64,
    pub tables: Vec<PhysicalTable>,
}

#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load(&self) -> Result<SchemaSnapshot, StoreError>;
}

/// A schema source that can also be edited.
#[async_trait]
pub trait SchemaCatalog: SchemaSource {
    /// Insert or replace a table entry and bump the version.
    async fn put_table(&self, table: &PhysicalTable) -> Result<(), StoreError>;

    /// Remove a table entry. Returns whether it existed.
    async fn drop_table(&self, physical_id: TableId) -> Result<bool, StoreError>;
}

#[async_trait]
impl<T> SchemaSource for Arc<T>
where
    T: SchemaSource + ?Sized,
{
    async fn load(&self) -> Result<SchemaSnapshot, StoreError> {
        (**self).load().await
    }
}

#[async_trait]
impl<T> SchemaCatalog for Arc<T>
where
    T: SchemaCatalog + ?Sized,
{
    async fn put_table(&self, table: &PhysicalTable) -> Result<(), StoreError> {
        (**self).put_table(table).await
    }

    async fn drop_table(&self, physical_id: TableId) -> Result<bool, StoreError> {
        (**self).drop_table(physical_id).await
    }
}

#[cfg(test)]
pub(crate) fn test_table(id: i64, name: &str) -> PhysicalTable {
    PhysicalTable {
        id: TableId::new(id),
        table_id: TableId::new(id),
        schema: "test".to_string(),
        name: name.to_string(),
        partition: None,
        ttl_column: "created_at".to_string(),
        ttl_interval: chrono::Duration::days(1),
        job_interval: chrono::Duration::hours(1),
        enabled: true,
        split_points: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(points: &[i64]) -> Vec<Vec<Datum>> {
        points.iter().map(|p| vec![Datum::Int64(*p)]).collect()
    }

    fn assert_contiguous(ranges: &[ScanRange]) {
        assert!(ranges.first().unwrap().start.is_none());
        assert!(ranges.last().unwrap().end.is_none());
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].end.is_some());
        }
    }

    #[test]
    fn no_split_points_scan_whole_table() {
        let table = test_table(1, "t1");
        let ranges = table.split_scan_ranges(64, &Tz::UTC).unwrap();
        assert_eq!(ranges, vec![ScanRange { start: None, end: None }]);
    }

    #[test]
    fn split_points_are_sorted_and_deduplicated() {
        let mut table = test_table(1, "t1");
        table.split_points = ints(&[100, -5, 20, 20]);
        let ranges = table.split_scan_ranges(64, &Tz::UTC).unwrap();
        assert_eq!(ranges.len(), 4);
        assert_contiguous(&ranges);
        assert_eq!(
            ranges[0].end.as_deref(),
            Some(encode_key(&Tz::UTC, &[Datum::Int64(-5)]).unwrap().as_slice())
        );
    }

    #[test]
    fn many_split_points_are_sampled() {
        let mut table = test_table(1, "t1");
        table.split_points = ints(&(0..100).collect::<Vec<_>>());
        let ranges = table.split_scan_ranges(4, &Tz::UTC).unwrap();
        assert_eq!(ranges.len(), 4);
        assert_contiguous(&ranges);

        let single = table.split_scan_ranges(1, &Tz::UTC).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn names_match_case_insensitively() {
        let mut table = test_table(7, "Orders");
        assert!(table.matches_name("TEST", "orders"));
        assert!(!table.matches_name("test", "order"));
        table.partition = Some("p0".into());
        assert_eq!(table.full_name(), "test.Orders.p0");
    }
}
