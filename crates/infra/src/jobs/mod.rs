//! TTL job scheduling.
//!
//! A [`JobManager`] runs one event loop per node. Jobs are created by timers
//! (through a [`ManagerJobAdapter`]) or by manual trigger commands, locked on
//! their table's status row, split into scan tasks, and finished once every
//! task is done. Scanning itself belongs to a [`TaskManager`].
//!
//! ## Components
//!
//! - [`lock`]: the lock/lease protocol on status rows
//! - [`manager`]: the event loop and its handlers
//! - [`timer`]: the timer contract and a single-node implementation
//! - [`trigger`]: manual trigger commands
//! - [`gc`]: removal of stale rows

pub mod adapter;
pub mod gc;
pub mod lock;
pub mod manager;
pub mod summary;
pub mod task_manager;
pub mod timer;
pub mod trigger;
pub mod types;

pub use adapter::ManagerJobAdapter;
pub use gc::GcReport;
pub use lock::{could_lock_for_create, could_lock_for_exist};
pub use manager::{JobManager, LeaderFn};
pub use summary::{all_finished, summarize_tasks};
pub use task_manager::{NoopTaskManager, TaskManager, TaskManagerError};
pub use timer::{JobLookup, LocalTimerService, TimerError, TimerService, TimerSpec};
pub use trigger::collect_trigger_results;
pub use types::{JobError, JobTrace, SubmitJobRequest, TtlJob, TtlSummary};
