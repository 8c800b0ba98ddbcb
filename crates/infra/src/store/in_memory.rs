//! In-memory scheduler store for tests/dev and single-node deployments.
//!
//! Transactions stage their writes and apply them on commit. Row locks are
//! tracked per table id; a lock is also taken for a table whose status row
//! does not exist yet, so two transactions racing to bootstrap the same row
//! behave like NOWAIT lockers instead of both inserting.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sweepd_core::{JobId, NodeId, TableId};

use crate::schema::{PhysicalTable, SchemaCatalog, SchemaSnapshot, SchemaSource};

use super::{
    FinishJob, JobHistory, JobStatus, OwnerUpdate, StatusTxn, StoreError, TableStatus, TaskState,
    TaskStatus, TtlStore, TtlTask,
};

#[derive(Debug, Default)]
struct MemState {
    status: BTreeMap<TableId, TableStatus>,
    tasks: BTreeMap<(JobId, i64), TtlTask>,
    history: BTreeMap<JobId, JobHistory>,
    catalog: BTreeMap<TableId, PhysicalTable>,
    catalog_version: i64,
    locks: HashMap<TableId, u64>,
    next_txn: u64,
}

impl MemState {
    fn release(&mut self, txn: u64) {
        self.locks.retain(|_, owner| *owner != txn);
    }
}

/// In-memory scheduler store.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTtlStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn table_status(&self, table_id: TableId) -> Option<TableStatus> {
        self.state().status.get(&table_id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<TtlTask> {
        self.state().tasks.values().cloned().collect()
    }

    pub fn all_history(&self) -> Vec<JobHistory> {
        self.state().history.values().cloned().collect()
    }

    /// Record scan progress, as a scan worker would.
    pub fn update_task(
        &self,
        job_id: &JobId,
        scan_id: i64,
        status: TaskStatus,
        state: Option<TaskState>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.state();
        let task = guard
            .tasks
            .get_mut(&(job_id.clone(), scan_id))
            .ok_or_else(|| StoreError::NotFound(format!("task {job_id}/{scan_id}")))?;
        task.status = status;
        task.state = state;
        task.status_update_time = Some(now);
        Ok(())
    }

    /// Overwrite a status row as-is.
    #[cfg(test)]
    pub(crate) fn put_status(&self, status: TableStatus) {
        self.state().status.insert(status.table_id, status);
    }

    /// Insert a history row as-is.
    #[cfg(test)]
    pub(crate) fn put_history(&self, history: JobHistory) {
        self.state().history.insert(history.job_id.clone(), history);
    }

    /// Insert a task row as-is.
    #[cfg(test)]
    pub(crate) fn put_task(&self, task: TtlTask) {
        self.state()
            .tasks
            .insert((task.job_id.clone(), task.scan_id), task);
    }
}

#[derive(Debug)]
enum TxnOp {
    InsertStatus(TableStatus),
    SetOwner(TableId, OwnerUpdate),
    InsertHistory(JobHistory),
    InsertTask(TtlTask),
}

struct InMemoryTxn {
    state: Arc<Mutex<MemState>>,
    id: u64,
    ops: Vec<TxnOp>,
    done: bool,
}

impl InMemoryTxn {
    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_row(&self, state: &mut MemState, table_id: TableId) -> Result<(), StoreError> {
        match state.locks.get(&table_id) {
            Some(owner) if *owner != self.id => Err(StoreError::LockNotAvailable),
            _ => {
                state.locks.insert(table_id, self.id);
                Ok(())
            }
        }
    }

    /// The row as this transaction sees it: committed state plus staged writes.
    fn view(&self, state: &MemState, table_id: TableId) -> Option<TableStatus> {
        let mut row = state.status.get(&table_id).cloned();
        for op in &self.ops {
            match op {
                TxnOp::InsertStatus(s) if s.table_id == table_id => row = Some(s.clone()),
                TxnOp::SetOwner(id, update) if *id == table_id => {
                    if let Some(row) = row.as_mut() {
                        row.apply_owner(update);
                    }
                }
                _ => {}
            }
        }
        row
    }
}

impl Drop for InMemoryTxn {
    fn drop(&mut self) {
        if !self.done {
            let id = self.id;
            self.state().release(id);
        }
    }
}

#[async_trait]
impl StatusTxn for InMemoryTxn {
    async fn status_for_update_nowait(
        &mut self,
        table_id: TableId,
    ) -> Result<Option<TableStatus>, StoreError> {
        let mut state = self.state();
        self.lock_row(&mut state, table_id)?;
        Ok(self.view(&state, table_id))
    }

    async fn insert_status(
        &mut self,
        table_id: TableId,
        parent_table_id: TableId,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.state();
            self.lock_row(&mut state, table_id)?;
            if self.view(&state, table_id).is_some() {
                return Err(StoreError::Conflict(format!(
                    "status row for table {table_id} already exists"
                )));
            }
        }
        self.ops
            .push(TxnOp::InsertStatus(TableStatus::new(table_id, parent_table_id)));
        Ok(())
    }

    async fn set_owner(&mut self, table_id: TableId, update: &OwnerUpdate) -> Result<(), StoreError> {
        {
            let mut state = self.state();
            self.lock_row(&mut state, table_id)?;
            if self.view(&state, table_id).is_none() {
                return Err(StoreError::NotFound(format!("status row for table {table_id}")));
            }
        }
        self.ops.push(TxnOp::SetOwner(table_id, update.clone()));
        Ok(())
    }

    async fn insert_history(&mut self, history: &JobHistory) -> Result<(), StoreError> {
        let exists = self.state().history.contains_key(&history.job_id)
            || self
                .ops
                .iter()
                .any(|op| matches!(op, TxnOp::InsertHistory(h) if h.job_id == history.job_id));
        if exists {
            return Err(StoreError::Conflict(format!(
                "history for job {} already exists",
                history.job_id
            )));
        }
        self.ops.push(TxnOp::InsertHistory(history.clone()));
        Ok(())
    }

    async fn insert_task(&mut self, task: &TtlTask) -> Result<(), StoreError> {
        let key = (task.job_id.clone(), task.scan_id);
        let exists = self.state().tasks.contains_key(&key)
            || self.ops.iter().any(
                |op| matches!(op, TxnOp::InsertTask(t) if t.job_id == task.job_id && t.scan_id == task.scan_id),
            );
        if exists {
            return Err(StoreError::Conflict(format!(
                "task {}/{} already exists",
                task.job_id, task.scan_id
            )));
        }
        self.ops.push(TxnOp::InsertTask(task.clone()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let ops = std::mem::take(&mut self.ops);
        let id = self.id;
        {
            let mut state = self.state();
            for op in ops {
                match op {
                    TxnOp::InsertStatus(s) => {
                        state.status.insert(s.table_id, s);
                    }
                    TxnOp::SetOwner(table_id, update) => {
                        if let Some(row) = state.status.get_mut(&table_id) {
                            row.apply_owner(&update);
                        }
                    }
                    TxnOp::InsertHistory(h) => {
                        state.history.insert(h.job_id.clone(), h);
                    }
                    TxnOp::InsertTask(t) => {
                        state.tasks.insert((t.job_id.clone(), t.scan_id), t);
                    }
                }
            }
            state.release(id);
        }
        self.done = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let id = self.id;
        self.state().release(id);
        self.done = true;
        Ok(())
    }
}

#[async_trait]
impl TtlStore for InMemoryTtlStore {
    async fn begin(&self) -> Result<Box<dyn StatusTxn>, StoreError> {
        let id = {
            let mut state = self.state();
            state.next_txn += 1;
            state.next_txn
        };
        Ok(Box::new(InMemoryTxn {
            state: Arc::clone(&self.state),
            id,
            ops: Vec::new(),
            done: false,
        }))
    }

    async fn load_table_status(&self) -> Result<Vec<TableStatus>, StoreError> {
        Ok(self.state().status.values().cloned().collect())
    }

    async fn tasks_for_job(&self, job_id: &JobId) -> Result<Vec<TtlTask>, StoreError> {
        Ok(self
            .state()
            .tasks
            .values()
            .filter(|t| &t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn update_heartbeat(
        &self,
        table_id: TableId,
        owner: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        match state.status.get_mut(&table_id) {
            Some(row) if row.is_owned_by(owner) => {
                row.current_job_owner_hb_time = Some(now);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn finish_job(&self, finish: &FinishJob) -> Result<(), StoreError> {
        let mut state = self.state();
        if let Some(row) = state.status.get_mut(&finish.table_id) {
            if row.current_job_id.as_ref() == Some(&finish.job_id) {
                row.apply_finish(finish);
            }
        }
        state.tasks.retain(|(job_id, _), _| job_id != &finish.job_id);
        if let Some(history) = state.history.get_mut(&finish.job_id) {
            history.finish_time = Some(finish.finish_time);
            history.summary_text = Some(finish.summary_text.clone());
            history.expired_rows = Some(finish.expired_rows);
            history.deleted_rows = Some(finish.deleted_rows);
            history.error_delete_rows = Some(finish.error_delete_rows);
            history.status = JobStatus::Finished;
        }
        Ok(())
    }

    async fn job_history(
        &self,
        parent_table_id: TableId,
        table_id: TableId,
        job_id: &JobId,
    ) -> Result<Option<JobHistory>, StoreError> {
        Ok(self
            .state()
            .history
            .get(job_id)
            .filter(|h| h.table_id == table_id && h.parent_table_id == parent_table_id)
            .cloned())
    }

    async fn count_active_tasks(&self) -> Result<u64, StoreError> {
        Ok(self
            .state()
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Waiting | TaskStatus::Running))
            .count() as u64)
    }

    async fn gc_table_status(&self, existing: &[TableId]) -> Result<u64, StoreError> {
        let mut state = self.state();
        let before = state.status.len();
        state
            .status
            .retain(|id, row| row.current_job_status.is_some() || existing.contains(id));
        Ok((before - state.status.len()) as u64)
    }

    async fn gc_tasks(&self) -> Result<u64, StoreError> {
        let mut state = self.state();
        let current: Vec<JobId> = state
            .status
            .values()
            .filter_map(|s| s.current_job_id.clone())
            .collect();
        let before = state.tasks.len();
        state.tasks.retain(|(job_id, _), _| current.contains(job_id));
        Ok((before - state.tasks.len()) as u64)
    }

    async fn gc_job_history(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state();
        let count = state.history.len();
        state.history.retain(|_, h| h.create_time >= before);
        Ok((count - state.history.len()) as u64)
    }
}

#[async_trait]
impl SchemaSource for InMemoryTtlStore {
    async fn load(&self) -> Result<SchemaSnapshot, StoreError> {
        let state = self.state();
        Ok(SchemaSnapshot {
            version: state.catalog_version,
            tables: state.catalog.values().cloned().collect(),
        })
    }
}

#[async_trait]
impl SchemaCatalog for InMemoryTtlStore {
    async fn put_table(&self, table: &PhysicalTable) -> Result<(), StoreError> {
        let mut state = self.state();
        state.catalog.insert(table.id, table.clone());
        state.catalog_version += 1;
        Ok(())
    }

    async fn drop_table(&self, physical_id: TableId) -> Result<bool, StoreError> {
        let mut state = self.state();
        let existed = state.catalog.remove(&physical_id).is_some();
        if existed {
            state.catalog_version += 1;
        }
        Ok(existed)
    }
}
