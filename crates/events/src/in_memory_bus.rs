//! In-memory buses for tests and single-node deployments.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::bus::{BusError, Notification, NotificationBus, Subscription};
use crate::command::{CommandClient, CommandResult, TriggerCommand};

/// In-memory pub/sub per topic.
///
/// - No IO
/// - Best-effort fan-out; dead subscribers are dropped while publishing
#[derive(Debug, Default)]
pub struct InMemoryNotificationBus {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>>,
}

impl InMemoryNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationBus for InMemoryNotificationBus {
    fn notify(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = topics.get_mut(topic) {
            let message = Notification {
                topic: topic.to_string(),
                payload: payload.to_string(),
            };
            subs.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    fn watch(&self, topic: &str) -> Subscription<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Subscription::new(rx)
    }
}

#[derive(Debug, Default)]
struct CommandState {
    watchers: Vec<mpsc::UnboundedSender<TriggerCommand>>,
    /// Commands not yet claimed, with the channel their issuer waits on.
    pending: HashMap<String, oneshot::Sender<CommandResult>>,
    /// Claimed commands awaiting a response.
    taken: HashMap<String, oneshot::Sender<CommandResult>>,
}

/// In-memory command transport.
#[derive(Debug, Default)]
pub struct InMemoryCommandBus {
    state: Mutex<CommandState>,
}

impl InMemoryCommandBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandClient for InMemoryCommandBus {
    fn watch_commands(&self) -> Subscription<TriggerCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watchers
            .push(tx);
        Subscription::new(rx)
    }

    fn take_command(&self, request_id: &str) -> Result<bool, BusError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.pending.remove(request_id) {
            Some(reply) => {
                state.taken.insert(request_id.to_string(), reply);
                tracing::debug!(request_id, "command claimed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn respond(&self, request_id: &str, result: CommandResult) -> Result<(), BusError> {
        let reply = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .taken
            .remove(request_id);
        match reply {
            // The issuer may have given up waiting; that is not an error here.
            Some(reply) => {
                let _ = reply.send(result);
                Ok(())
            }
            None => Err(BusError::Transport(format!("command {request_id} was not taken"))),
        }
    }

    fn send(&self, command: TriggerCommand) -> Result<oneshot::Receiver<CommandResult>, BusError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.pending.contains_key(&command.request_id) || state.taken.contains_key(&command.request_id) {
            return Err(BusError::Transport(format!(
                "duplicate command {}",
                command.request_id
            )));
        }
        state.pending.insert(command.request_id.clone(), tx);
        state.watchers.retain(|w| w.send(command.clone()).is_ok());
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TriggerResponse;

    fn command(id: &str) -> TriggerCommand {
        TriggerCommand {
            request_id: id.to_string(),
            database: "test".to_string(),
            table: "t1".to_string(),
        }
    }

    #[tokio::test]
    async fn notifications_reach_topic_watchers_only() {
        let bus = InMemoryNotificationBus::new();
        let mut scan = bus.watch("scan");
        let mut other = bus.watch("other");
        bus.notify("scan", "job-1").unwrap();

        let got = scan.recv().await.unwrap();
        assert_eq!(got.payload, "job-1");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn only_first_take_wins_and_response_reaches_issuer() {
        let bus = InMemoryCommandBus::new();
        let mut node_a = bus.watch_commands();
        let mut node_b = bus.watch_commands();
        let reply = bus.send(command("r1")).unwrap();

        let seen_a = node_a.recv().await.unwrap();
        let seen_b = node_b.recv().await.unwrap();
        assert_eq!(seen_a, seen_b);
        assert!(bus.take_command("r1").unwrap());
        assert!(!bus.take_command("r1").unwrap());

        bus.respond("r1", Ok(TriggerResponse::default())).unwrap();
        assert_eq!(reply.await.unwrap(), Ok(TriggerResponse::default()));
    }

    #[test]
    fn duplicate_and_untaken_commands_are_rejected() {
        let bus = InMemoryCommandBus::new();
        let _reply = bus.send(command("r1")).unwrap();
        assert!(bus.send(command("r1")).is_err());
        assert!(bus.respond("r1", Err("nope".into())).is_err());
    }
}
