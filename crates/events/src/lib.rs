//! `sweepd-events` — command and notification transport contracts.
//!
//! Scheduler nodes never share memory; everything they tell each other goes
//! through these traits. In-memory implementations back tests and
//! single-node deployments.

pub mod bus;
pub mod command;
pub mod in_memory_bus;

pub use bus::{BusError, Notification, NotificationBus, Subscription};
pub use command::{CommandClient, CommandResult, TableTriggerResult, TriggerCommand, TriggerResponse};
pub use in_memory_bus::{InMemoryCommandBus, InMemoryNotificationBus};
