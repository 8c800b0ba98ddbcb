//! Command transport: requests that exactly one scheduler node must serve.
//!
//! A command is broadcast to every watcher. A node claims it with
//! [`CommandClient::take_command`] (only the first claim succeeds), does the
//! work, and publishes the outcome with [`CommandClient::respond`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use sweepd_core::{JobId, TableId};

use crate::bus::{BusError, Subscription};

/// Force an expiry run for every physical table matching `database.table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCommand {
    pub request_id: String,
    pub database: String,
    pub table: String,
}

/// Outcome for one physical table of a trigger command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTriggerResult {
    pub table_id: TableId,
    pub database: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TriggerResponse {
    pub table_results: Vec<TableTriggerResult>,
}

/// Either the per-table results or a single error message.
pub type CommandResult = Result<TriggerResponse, String>;

pub trait CommandClient: Send + Sync {
    /// Stream of commands issued after this call.
    fn watch_commands(&self) -> Subscription<TriggerCommand>;

    /// Claim a command. Returns `false` if another node already did, or if
    /// the command is unknown.
    fn take_command(&self, request_id: &str) -> Result<bool, BusError>;

    /// Publish the outcome of a claimed command.
    fn respond(&self, request_id: &str, result: CommandResult) -> Result<(), BusError>;

    /// Issue a command and get a handle to its eventual response.
    fn send(&self, command: TriggerCommand) -> Result<oneshot::Receiver<CommandResult>, BusError>;
}

impl<C> CommandClient for Arc<C>
where
    C: CommandClient + ?Sized,
{
    fn watch_commands(&self) -> Subscription<TriggerCommand> {
        (**self).watch_commands()
    }

    fn take_command(&self, request_id: &str) -> Result<bool, BusError> {
        (**self).take_command(request_id)
    }

    fn respond(&self, request_id: &str, result: CommandResult) -> Result<(), BusError> {
        (**self).respond(request_id, result)
    }

    fn send(&self, command: TriggerCommand) -> Result<oneshot::Receiver<CommandResult>, BusError> {
        (**self).send(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_omitted_from_json() {
        let result = TableTriggerResult {
            table_id: TableId::new(7),
            database: "test".into(),
            table: "t".into(),
            partition: None,
            job_id: None,
            error_message: Some("timeout".into()),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error_message"], "timeout");
        assert!(json.get("job_id").is_none());
        assert!(json.get("partition").is_none());
    }
}
