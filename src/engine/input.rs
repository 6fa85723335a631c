//! Delivery of external input to suspended human_input nodes

use super::EngineError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type Key = (String, String);

/// Waiting nodes keyed by `(execution_id, node_id)`
#[derive(Default)]
pub struct InputBroker {
    waiting: Mutex<HashMap<Key, oneshot::Sender<Value>>>,
}

impl InputBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node as waiting; the registration ends when the guard drops
    pub fn wait_for(&self, execution_id: &str, node_id: &str) -> PendingInput<'_> {
        let (sender, receiver) = oneshot::channel();
        let key = (execution_id.to_string(), node_id.to_string());
        self.lock().insert(key.clone(), sender);
        PendingInput {
            broker: self,
            key,
            receiver,
        }
    }

    /// Hand a value to a waiting node
    pub fn submit(
        &self,
        execution_id: &str,
        node_id: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        let key = (execution_id.to_string(), node_id.to_string());
        let sender = self.lock().remove(&key);
        let not_awaited = || EngineError::InputNotAwaited {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
        };
        match sender {
            Some(sender) => sender.send(value).map_err(|_| not_awaited()),
            None => Err(not_awaited()),
        }
    }

    pub fn is_waiting(&self, execution_id: &str, node_id: &str) -> bool {
        self.lock()
            .contains_key(&(execution_id.to_string(), node_id.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, oneshot::Sender<Value>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered wait; dropping it withdraws the registration
pub struct PendingInput<'a> {
    broker: &'a InputBroker,
    key: Key,
    receiver: oneshot::Receiver<Value>,
}

impl PendingInput<'_> {
    /// Wait for the submitted value
    pub async fn recv(&mut self) -> Option<Value> {
        (&mut self.receiver).await.ok()
    }
}

impl Drop for PendingInput<'_> {
    fn drop(&mut self) {
        self.broker.lock().remove(&self.key);
    }
}
