//! Cooperative cancellation and the registry of active executions

use super::EngineError;
use super::record::ExecutionStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

struct Inner {
    sender: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        self.sender.send_replace(true);
        let children = match self.children.lock() {
            Ok(mut children) => std::mem::take(&mut *children),
            Err(_) => return,
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Cancellation token for async operations
///
/// Checked by the engine at node-dispatch boundaries and awaited by
/// suspending executors. Cancelling a token cancels every child created
/// from it; cancelling a child leaves the parent untouched.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new cancellation token
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sender,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Cancel the token
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Wait until cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.inner.sender.subscribe();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Create a token that is cancelled together with this one
    pub fn child(&self) -> Self {
        let child = Self::new();
        if let Ok(mut children) = self.inner.children.lock() {
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct ActiveEntry {
    token: CancellationToken,
    status: ExecutionStatus,
}

/// Active `execution_id -> cancellation token` map, guarded by one mutex
#[derive(Default)]
pub struct ActiveExecutions {
    entries: Mutex<HashMap<String, ActiveEntry>>,
}

impl ActiveExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution in the `Pending` state
    pub fn register(&self, execution_id: &str) -> Result<CancellationToken, EngineError> {
        let mut entries = self.lock();
        if entries.contains_key(execution_id) {
            return Err(EngineError::DuplicateExecution {
                id: execution_id.to_string(),
            });
        }
        let token = CancellationToken::new();
        entries.insert(
            execution_id.to_string(),
            ActiveEntry {
                token: token.clone(),
                status: ExecutionStatus::Pending,
            },
        );
        Ok(token)
    }

    pub fn set_status(&self, execution_id: &str, status: ExecutionStatus) {
        if let Some(entry) = self.lock().get_mut(execution_id) {
            entry.status = status;
        }
    }

    pub fn status(&self, execution_id: &str) -> Option<ExecutionStatus> {
        self.lock().get(execution_id).map(|e| e.status)
    }

    /// Flip the cancellation flag; false if the execution is not active
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.lock().get(execution_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, execution_id: &str) {
        self.lock().remove(execution_id);
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveEntry>> {
        // A panic while holding this lock cannot leave the map inconsistent
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes an execution from the registry when dropped
pub(crate) struct ActiveGuard {
    registry: Arc<ActiveExecutions>,
    execution_id: String,
}

impl ActiveGuard {
    pub(crate) fn new(registry: Arc<ActiveExecutions>, execution_id: String) -> Self {
        Self {
            registry,
            execution_id,
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.execution_id);
    }
}
