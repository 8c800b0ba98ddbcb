//! Postgres-backed scheduler store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (lock not available) | `55P03` | `LockNotAvailable` | `FOR UPDATE NOWAIT` hit a row locked by another node |
//! | Database (unique violation) | `23505` | `Conflict` | Two nodes bootstrapped the same status row |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / Io / other | N/A | `Storage` | Connection failures |
//!
//! ## Locking
//!
//! Ownership changes read the status row with `FOR UPDATE NOWAIT`: a node
//! that loses the race fails immediately instead of queueing behind the
//! winner and then computing scan ranges for nothing.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use sweepd_codec::{decode, encode_value};
use sweepd_core::{DomainError, JobId, NodeId, TableId};

use crate::schema::{PhysicalTable, SchemaCatalog, SchemaSnapshot, SchemaSource};

use super::{
    FinishJob, JobHistory, JobStatus, OwnerUpdate, StatusTxn, StoreError, TableStatus, TaskState,
    TaskStatus, TtlStore, TtlTask,
};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_ttl_scheduler.sql");

const SELECT_TABLE_STATUS: &str = r#"
    SELECT
        table_id,
        parent_table_id,
        last_job_id,
        last_job_start_time,
        last_job_finish_time,
        last_job_ttl_expire,
        last_job_summary,
        current_job_id,
        current_job_owner_id,
        current_job_owner_hb_time,
        current_job_start_time,
        current_job_ttl_expire,
        current_job_status,
        current_job_status_update_time
    FROM ttl_table_status
"#;

const SELECT_TASK: &str = r#"
    SELECT
        job_id,
        table_id,
        scan_id,
        scan_range_start,
        scan_range_end,
        expire_time,
        owner_id,
        owner_hb_time,
        status,
        status_update_time,
        state,
        created_time
    FROM ttl_task
"#;

/// Postgres-backed scheduler store.
///
/// `Send + Sync`; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresTtlStore {
    pool: PgPool,
}

impl PostgresTtlStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the scheduler tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

struct PgStatusTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StatusTxn for PgStatusTxn {
    #[instrument(skip(self), fields(table_id = %table_id), err)]
    async fn status_for_update_nowait(
        &mut self,
        table_id: TableId,
    ) -> Result<Option<TableStatus>, StoreError> {
        let sql = format!("{SELECT_TABLE_STATUS} WHERE table_id = $1 FOR UPDATE NOWAIT");
        let row = sqlx::query(&sql)
            .bind(table_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("select_status_for_update", e))?;

        row.map(|r| TableStatusRow::from_pg(&r)?.try_into())
            .transpose()
    }

    async fn insert_status(
        &mut self,
        table_id: TableId,
        parent_table_id: TableId,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO ttl_table_status (table_id, parent_table_id) VALUES ($1, $2)")
            .bind(table_id.get())
            .bind(parent_table_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_status", e))?;
        Ok(())
    }

    #[instrument(skip(self, update), fields(table_id = %table_id, job_id = %update.job_id), err)]
    async fn set_owner(&mut self, table_id: TableId, update: &OwnerUpdate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE ttl_table_status
            SET current_job_id = $1,
                current_job_owner_id = $2,
                current_job_start_time = $3,
                current_job_status = 'running',
                current_job_status_update_time = $4,
                current_job_ttl_expire = $5,
                current_job_owner_hb_time = $4
            WHERE table_id = $6
            "#,
        )
        .bind(update.job_id.as_str())
        .bind(update.owner_id.as_str())
        .bind(update.start_time)
        .bind(update.now)
        .bind(update.ttl_expire)
        .bind(table_id.get())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_owner", e))?;
        Ok(())
    }

    async fn insert_history(&mut self, history: &JobHistory) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ttl_job_history (
                job_id,
                table_id,
                parent_table_id,
                table_schema,
                table_name,
                partition_name,
                create_time,
                ttl_expire,
                status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(history.job_id.as_str())
        .bind(history.table_id.get())
        .bind(history.parent_table_id.get())
        .bind(&history.table_schema)
        .bind(&history.table_name)
        .bind(history.partition_name.as_deref())
        .bind(history.create_time)
        .bind(history.ttl_expire)
        .bind(history.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_history", e))?;
        Ok(())
    }

    async fn insert_task(&mut self, task: &TtlTask) -> Result<(), StoreError> {
        let state = task
            .state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Storage(format!("encode task state: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO ttl_task (
                job_id,
                table_id,
                scan_id,
                scan_range_start,
                scan_range_end,
                expire_time,
                status,
                state,
                created_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(task.job_id.as_str())
        .bind(task.table_id.get())
        .bind(task.scan_id)
        .bind(task.scan_range_start.as_deref())
        .bind(task.scan_range_end.as_deref())
        .bind(task.expire_time)
        .bind(task.status.as_str())
        .bind(state)
        .bind(task.created_time)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_task", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl TtlStore for PostgresTtlStore {
    async fn begin(&self) -> Result<Box<dyn StatusTxn>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgStatusTxn { tx }))
    }

    #[instrument(skip(self), fields(rows = tracing::field::Empty), err)]
    async fn load_table_status(&self) -> Result<Vec<TableStatus>, StoreError> {
        let rows = sqlx::query(SELECT_TABLE_STATUS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_table_status", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TableStatusRow::from_pg(&row)?.try_into()?);
        }
        Span::current().record("rows", out.len());
        Ok(out)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn tasks_for_job(&self, job_id: &JobId) -> Result<Vec<TtlTask>, StoreError> {
        let sql = format!("{SELECT_TASK} WHERE job_id = $1 ORDER BY scan_id");
        let rows = sqlx::query(&sql)
            .bind(job_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("tasks_for_job", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TaskRow::from_pg(&row)?.try_into()?);
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(table_id = %table_id, owner = %owner), err)]
    async fn update_heartbeat(
        &self,
        table_id: TableId,
        owner: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE ttl_table_status SET current_job_owner_hb_time = $1 WHERE table_id = $2 AND current_job_owner_id = $3",
        )
        .bind(now)
        .bind(table_id.get())
        .bind(owner.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_heartbeat", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, finish), fields(table_id = %finish.table_id, job_id = %finish.job_id), err)]
    async fn finish_job(&self, finish: &FinishJob) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            UPDATE ttl_table_status
            SET last_job_id = current_job_id,
                last_job_start_time = current_job_start_time,
                last_job_finish_time = $1,
                last_job_ttl_expire = current_job_ttl_expire,
                last_job_summary = $2,
                current_job_id = NULL,
                current_job_owner_id = NULL,
                current_job_owner_hb_time = NULL,
                current_job_start_time = NULL,
                current_job_ttl_expire = NULL,
                current_job_status = NULL,
                current_job_status_update_time = NULL
            WHERE table_id = $3 AND current_job_id = $4
            "#,
        )
        .bind(finish.finish_time)
        .bind(&finish.summary_text)
        .bind(finish.table_id.get())
        .bind(finish.job_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("finish_status", e))?;

        sqlx::query("DELETE FROM ttl_task WHERE job_id = $1")
            .bind(finish.job_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("finish_tasks", e))?;

        sqlx::query(
            r#"
            UPDATE ttl_job_history
            SET finish_time = $1,
                summary_text = $2,
                expired_rows = $3,
                deleted_rows = $4,
                error_delete_rows = $5,
                status = 'finished'
            WHERE job_id = $6
            "#,
        )
        .bind(finish.finish_time)
        .bind(&finish.summary_text)
        .bind(to_i64(finish.expired_rows))
        .bind(to_i64(finish.deleted_rows))
        .bind(to_i64(finish.error_delete_rows))
        .bind(finish.job_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("finish_history", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn job_history(
        &self,
        parent_table_id: TableId,
        table_id: TableId,
        job_id: &JobId,
    ) -> Result<Option<JobHistory>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                job_id,
                table_id,
                parent_table_id,
                table_schema,
                table_name,
                partition_name,
                create_time,
                finish_time,
                ttl_expire,
                summary_text,
                expired_rows,
                deleted_rows,
                error_delete_rows,
                status
            FROM ttl_job_history
            WHERE table_id = $1 AND parent_table_id = $2 AND job_id = $3
            "#,
        )
        .bind(table_id.get())
        .bind(parent_table_id.get())
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_history", e))?;

        row.map(|r| HistoryRow::from_pg(&r)?.try_into()).transpose()
    }

    async fn count_active_tasks(&self) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(1) AS total FROM ttl_task WHERE status IN ('waiting', 'running')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_active_tasks", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_active_tasks", e))?;
        Ok(to_u64(total))
    }

    #[instrument(skip(self, existing), fields(existing = existing.len()), err)]
    async fn gc_table_status(&self, existing: &[TableId]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = existing.iter().map(TableId::get).collect();
        let result = sqlx::query(
            "DELETE FROM ttl_table_status WHERE current_job_status IS NULL AND NOT (table_id = ANY($1))",
        )
        .bind(&ids)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("gc_table_status", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn gc_tasks(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM ttl_task task
            WHERE NOT EXISTS (
                SELECT 1 FROM ttl_table_status job WHERE job.current_job_id = task.job_id
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("gc_tasks", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn gc_job_history(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM ttl_job_history WHERE create_time < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("gc_job_history", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SchemaSource for PostgresTtlStore {
    #[instrument(skip(self), fields(tables = tracing::field::Empty), err)]
    async fn load(&self) -> Result<SchemaSnapshot, StoreError> {
        let version = sqlx::query("SELECT version FROM ttl_catalog_version WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_catalog_version", e))?
            .map(|row| row.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| map_sqlx_error("load_catalog_version", e))?
            .unwrap_or(0);

        let rows = sqlx::query(
            r#"
            SELECT
                physical_id,
                table_id,
                table_schema,
                table_name,
                partition_name,
                ttl_column,
                ttl_interval_secs,
                job_interval_secs,
                enabled,
                split_points
            FROM ttl_table_catalog
            ORDER BY physical_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_catalog", e))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            tables.push(CatalogRow::from_pg(&row)?.try_into()?);
        }
        Span::current().record("tables", tables.len());
        Ok(SchemaSnapshot { version, tables })
    }
}

#[async_trait]
impl SchemaCatalog for PostgresTtlStore {
    #[instrument(skip(self, table), fields(physical_id = %table.id), err)]
    async fn put_table(&self, table: &PhysicalTable) -> Result<(), StoreError> {
        let split_points = table
            .split_points
            .iter()
            .map(|point| encode_value(&Tz::UTC, point))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("encode split points: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO ttl_table_catalog (
                physical_id,
                table_id,
                table_schema,
                table_name,
                partition_name,
                ttl_column,
                ttl_interval_secs,
                job_interval_secs,
                enabled,
                split_points
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (physical_id) DO UPDATE SET
                table_id = EXCLUDED.table_id,
                table_schema = EXCLUDED.table_schema,
                table_name = EXCLUDED.table_name,
                partition_name = EXCLUDED.partition_name,
                ttl_column = EXCLUDED.ttl_column,
                ttl_interval_secs = EXCLUDED.ttl_interval_secs,
                job_interval_secs = EXCLUDED.job_interval_secs,
                enabled = EXCLUDED.enabled,
                split_points = EXCLUDED.split_points
            "#,
        )
        .bind(table.id.get())
        .bind(table.table_id.get())
        .bind(&table.schema)
        .bind(&table.name)
        .bind(table.partition.as_deref())
        .bind(&table.ttl_column)
        .bind(table.ttl_interval.num_seconds())
        .bind(table.job_interval.num_seconds())
        .bind(table.enabled)
        .bind(&split_points)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("put_table", e))?;

        bump_catalog_version(&mut tx).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(physical_id = %physical_id), err)]
    async fn drop_table(&self, physical_id: TableId) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let result = sqlx::query("DELETE FROM ttl_table_catalog WHERE physical_id = $1")
            .bind(physical_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("drop_table", e))?;

        let existed = result.rows_affected() > 0;
        if existed {
            bump_catalog_version(&mut tx).await?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(existed)
    }
}

async fn bump_catalog_version(tx: &mut Transaction<'static, Postgres>) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ttl_catalog_version (id, version) VALUES (1, 1)
        ON CONFLICT (id) DO UPDATE SET version = ttl_catalog_version.version + 1
        "#,
    )
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("bump_catalog_version", e))?;
    Ok(())
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("55P03") => StoreError::LockNotAvailable,
            Some("23505") => StoreError::Conflict(format!("{operation}: {}", db_err.message())),
            _ => StoreError::Storage(format!("database error in {operation}: {}", db_err.message())),
        },
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn parse_id<T>(column: &str, raw: String) -> Result<T, StoreError>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse()
        .map_err(|e| StoreError::Storage(format!("invalid {column}: {e}")))
}

fn parse_opt_id<T>(column: &str, raw: Option<String>) -> Result<Option<T>, StoreError>
where
    T: FromStr<Err = DomainError>,
{
    raw.map(|r| parse_id(column, r)).transpose()
}

// SQLx row types

#[derive(Debug)]
struct TableStatusRow {
    table_id: i64,
    parent_table_id: i64,
    last_job_id: Option<String>,
    last_job_start_time: Option<DateTime<Utc>>,
    last_job_finish_time: Option<DateTime<Utc>>,
    last_job_ttl_expire: Option<DateTime<Utc>>,
    last_job_summary: Option<String>,
    current_job_id: Option<String>,
    current_job_owner_id: Option<String>,
    current_job_owner_hb_time: Option<DateTime<Utc>>,
    current_job_start_time: Option<DateTime<Utc>>,
    current_job_ttl_expire: Option<DateTime<Utc>>,
    current_job_status: Option<String>,
    current_job_status_update_time: Option<DateTime<Utc>>,
}

impl TableStatusRow {
    fn from_pg(row: &PgRow) -> Result<Self, StoreError> {
        let read = || -> Result<Self, sqlx::Error> {
            Ok(Self {
                table_id: row.try_get("table_id")?,
                parent_table_id: row.try_get("parent_table_id")?,
                last_job_id: row.try_get("last_job_id")?,
                last_job_start_time: row.try_get("last_job_start_time")?,
                last_job_finish_time: row.try_get("last_job_finish_time")?,
                last_job_ttl_expire: row.try_get("last_job_ttl_expire")?,
                last_job_summary: row.try_get("last_job_summary")?,
                current_job_id: row.try_get("current_job_id")?,
                current_job_owner_id: row.try_get("current_job_owner_id")?,
                current_job_owner_hb_time: row.try_get("current_job_owner_hb_time")?,
                current_job_start_time: row.try_get("current_job_start_time")?,
                current_job_ttl_expire: row.try_get("current_job_ttl_expire")?,
                current_job_status: row.try_get("current_job_status")?,
                current_job_status_update_time: row.try_get("current_job_status_update_time")?,
            })
        };
        read().map_err(|e| map_sqlx_error("read_table_status", e))
    }
}

impl TryFrom<TableStatusRow> for TableStatus {
    type Error = StoreError;

    fn try_from(row: TableStatusRow) -> Result<Self, Self::Error> {
        Ok(TableStatus {
            table_id: TableId::new(row.table_id),
            parent_table_id: TableId::new(row.parent_table_id),
            last_job_id: parse_opt_id("last_job_id", row.last_job_id)?,
            last_job_start_time: row.last_job_start_time,
            last_job_finish_time: row.last_job_finish_time,
            last_job_ttl_expire: row.last_job_ttl_expire,
            last_job_summary: row.last_job_summary,
            current_job_id: parse_opt_id("current_job_id", row.current_job_id)?,
            current_job_owner_id: parse_opt_id("current_job_owner_id", row.current_job_owner_id)?,
            current_job_owner_hb_time: row.current_job_owner_hb_time,
            current_job_start_time: row.current_job_start_time,
            current_job_ttl_expire: row.current_job_ttl_expire,
            current_job_status: row
                .current_job_status
                .as_deref()
                .map(JobStatus::parse)
                .transpose()?,
            current_job_status_update_time: row.current_job_status_update_time,
        })
    }
}

#[derive(Debug)]
struct TaskRow {
    job_id: String,
    table_id: i64,
    scan_id: i64,
    scan_range_start: Option<Vec<u8>>,
    scan_range_end: Option<Vec<u8>>,
    expire_time: DateTime<Utc>,
    owner_id: Option<String>,
    owner_hb_time: Option<DateTime<Utc>>,
    status: String,
    status_update_time: Option<DateTime<Utc>>,
    state: Option<String>,
    created_time: DateTime<Utc>,
}

impl TaskRow {
    fn from_pg(row: &PgRow) -> Result<Self, StoreError> {
        let read = || -> Result<Self, sqlx::Error> {
            Ok(Self {
                job_id: row.try_get("job_id")?,
                table_id: row.try_get("table_id")?,
                scan_id: row.try_get("scan_id")?,
                scan_range_start: row.try_get("scan_range_start")?,
                scan_range_end: row.try_get("scan_range_end")?,
                expire_time: row.try_get("expire_time")?,
                owner_id: row.try_get("owner_id")?,
                owner_hb_time: row.try_get("owner_hb_time")?,
                status: row.try_get("status")?,
                status_update_time: row.try_get("status_update_time")?,
                state: row.try_get("state")?,
                created_time: row.try_get("created_time")?,
            })
        };
        read().map_err(|e| map_sqlx_error("read_task", e))
    }
}

impl TryFrom<TaskRow> for TtlTask {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let state = match row.state.as_deref() {
            Some(raw) if !raw.is_empty() => Some(
                serde_json::from_str::<TaskState>(raw)
                    .map_err(|e| StoreError::Storage(format!("invalid task state: {e}")))?,
            ),
            _ => None,
        };
        Ok(TtlTask {
            job_id: parse_id("job_id", row.job_id)?,
            table_id: TableId::new(row.table_id),
            scan_id: row.scan_id,
            scan_range_start: row.scan_range_start,
            scan_range_end: row.scan_range_end,
            expire_time: row.expire_time,
            owner_id: parse_opt_id("owner_id", row.owner_id)?,
            owner_hb_time: row.owner_hb_time,
            status: TaskStatus::parse(&row.status)?,
            status_update_time: row.status_update_time,
            state,
            created_time: row.created_time,
        })
    }
}

#[derive(Debug)]
struct HistoryRow {
    job_id: String,
    table_id: i64,
    parent_table_id: i64,
    table_schema: String,
    table_name: String,
    partition_name: Option<String>,
    create_time: DateTime<Utc>,
    finish_time: Option<DateTime<Utc>>,
    ttl_expire: DateTime<Utc>,
    summary_text: Option<String>,
    expired_rows: Option<i64>,
    deleted_rows: Option<i64>,
    error_delete_rows: Option<i64>,
    status: String,
}

impl HistoryRow {
    fn from_pg(row: &PgRow) -> Result<Self, StoreError> {
        let read = || -> Result<Self, sqlx::Error> {
            Ok(Self {
                job_id: row.try_get("job_id")?,
                table_id: row.try_get("table_id")?,
                parent_table_id: row.try_get("parent_table_id")?,
                table_schema: row.try_get("table_schema")?,
                table_name: row.try_get("table_name")?,
                partition_name: row.try_get("partition_name")?,
                create_time: row.try_get("create_time")?,
                finish_time: row.try_get("finish_time")?,
                ttl_expire: row.try_get("ttl_expire")?,
                summary_text: row.try_get("summary_text")?,
                expired_rows: row.try_get("expired_rows")?,
                deleted_rows: row.try_get("deleted_rows")?,
                error_delete_rows: row.try_get("error_delete_rows")?,
                status: row.try_get("status")?,
            })
        };
        read().map_err(|e| map_sqlx_error("read_job_history", e))
    }
}

impl TryFrom<HistoryRow> for JobHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(JobHistory {
            job_id: parse_id("job_id", row.job_id)?,
            table_id: TableId::new(row.table_id),
            parent_table_id: TableId::new(row.parent_table_id),
            table_schema: row.table_schema,
            table_name: row.table_name,
            partition_name: row.partition_name,
            create_time: row.create_time,
            finish_time: row.finish_time,
            ttl_expire: row.ttl_expire,
            summary_text: row.summary_text,
            expired_rows: row.expired_rows.map(to_u64),
            deleted_rows: row.deleted_rows.map(to_u64),
            error_delete_rows: row.error_delete_rows.map(to_u64),
            status: JobStatus::parse(&row.status)?,
        })
    }
}

#[derive(Debug)]
struct CatalogRow {
    physical_id: i64,
    table_id: i64,
    table_schema: String,
    table_name: String,
    partition_name: Option<String>,
    ttl_column: String,
    ttl_interval_secs: i64,
    job_interval_secs: i64,
    enabled: bool,
    split_points: Vec<Vec<u8>>,
}

impl CatalogRow {
    fn from_pg(row: &PgRow) -> Result<Self, StoreError> {
        let read = || -> Result<Self, sqlx::Error> {
            Ok(Self {
                physical_id: row.try_get("physical_id")?,
                table_id: row.try_get("table_id")?,
                table_schema: row.try_get("table_schema")?,
                table_name: row.try_get("table_name")?,
                partition_name: row.try_get("partition_name")?,
                ttl_column: row.try_get("ttl_column")?,
                ttl_interval_secs: row.try_get("ttl_interval_secs")?,
                job_interval_secs: row.try_get("job_interval_secs")?,
                enabled: row.try_get("enabled")?,
                split_points: row.try_get("split_points")?,
            })
        };
        read().map_err(|e| map_sqlx_error("read_catalog", e))
    }
}

impl TryFrom<CatalogRow> for PhysicalTable {
    type Error = StoreError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        let split_points = row
            .split_points
            .iter()
            .map(|raw| decode(raw, 1))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                StoreError::Storage(format!("invalid split point for table {}: {e}", row.physical_id))
            })?;
        Ok(PhysicalTable {
            id: TableId::new(row.physical_id),
            table_id: TableId::new(row.table_id),
            schema: row.table_schema,
            name: row.table_name,
            partition: row.partition_name,
            ttl_column: row.ttl_column,
            ttl_interval: chrono::Duration::seconds(row.ttl_interval_secs),
            job_interval: chrono::Duration::seconds(row.job_interval_secs),
            enabled: row.enabled,
            split_points,
        })
    }
}
