//! The context store: per-instance serialized mutation, cross-instance
//! parallelism.

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use super::instance::{ExecutionInstance, InstanceReport, InstanceSnapshot};
use crate::graph::WorkflowDefinition;
use crate::types::{InstanceId, NodeId, NodeStatus};

/// Errors from context store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("unknown instance: {instance}")]
    #[diagnostic(code(warploom::context::unknown_instance))]
    UnknownInstance { instance: InstanceId },

    #[error("instance already terminal: {instance}")]
    #[diagnostic(
        code(warploom::context::archived),
        help("Terminal instances are archived and no longer accept deltas.")
    )]
    InstanceArchived { instance: InstanceId },
}

/// Owns every live [`ExecutionInstance`] and archives terminal ones.
///
/// Each live instance sits behind its own `tokio::sync::Mutex`; that mutex is
/// the instance's effective lock. [`update`](Self::update) acquires it,
/// runs a synchronous closure, and releases it, so deltas for one instance
/// apply strictly in order while unrelated instances never contend. The
/// outer maps use `parking_lot` locks held only for map lookups, never
/// across an await.
#[derive(Debug, Default)]
pub struct ContextStore {
    live: RwLock<FxHashMap<InstanceId, Arc<Mutex<ExecutionInstance>>>>,
    archived: RwLock<FxHashMap<InstanceId, InstanceSnapshot>>,
}

impl ContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh instance of `definition`: all nodes PENDING except the
    /// start nodes, which arm READY. Returns the minted instance id.
    pub fn create_instance(&self, definition: Arc<WorkflowDefinition>) -> InstanceId {
        let id = InstanceId::new();
        let instance = ExecutionInstance::new(id.clone(), definition);
        self.live
            .write()
            .insert(id.clone(), Arc::new(Mutex::new(instance)));
        id
    }

    /// Re-insert a recovered instance (recovery path). Replaces any existing
    /// live entry for the same id.
    pub fn insert_recovered(&self, instance: ExecutionInstance) {
        self.live
            .write()
            .insert(instance.id.clone(), Arc::new(Mutex::new(instance)));
    }

    fn handle(&self, id: &InstanceId) -> Option<Arc<Mutex<ExecutionInstance>>> {
        self.live.read().get(id).cloned()
    }

    /// Run `f` under the instance's lock. This is the sole mutation point:
    /// the closure is synchronous, so the lock is never held across an
    /// await of the evaluator, transport, or checkpoint store.
    pub async fn update<R>(
        &self,
        id: &InstanceId,
        f: impl FnOnce(&mut ExecutionInstance) -> R,
    ) -> Result<R, ContextError> {
        let handle = match self.handle(id) {
            Some(handle) => handle,
            None if self.is_archived(id) => {
                return Err(ContextError::InstanceArchived {
                    instance: id.clone(),
                });
            }
            None => {
                return Err(ContextError::UnknownInstance {
                    instance: id.clone(),
                });
            }
        };
        let mut guard = handle.lock().await;
        Ok(f(&mut guard))
    }

    /// Atomically merge a context delta for `node` and set its new status.
    ///
    /// Deltas for one instance apply serially in arrival order relative to
    /// their causal dependency; deltas for different instances are fully
    /// parallel.
    pub async fn apply_delta(
        &self,
        id: &InstanceId,
        node: &NodeId,
        delta: FxHashMap<String, Value>,
        new_status: NodeStatus,
    ) -> Result<(), ContextError> {
        self.update(id, |instance| {
            instance.merge_delta(delta);
            instance.set_status(node, new_status);
        })
        .await
    }

    /// Immutable snapshot of a live or archived instance.
    pub async fn snapshot(&self, id: &InstanceId) -> Result<InstanceSnapshot, ContextError> {
        if let Some(handle) = self.handle(id) {
            let guard = handle.lock().await;
            return Ok(guard.snapshot());
        }
        self.archived
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ContextError::UnknownInstance {
                instance: id.clone(),
            })
    }

    /// Move a terminal instance out of the live set, retaining its final
    /// snapshot for querying. Idempotent for already-archived instances.
    pub async fn archive(&self, id: &InstanceId) -> Result<InstanceSnapshot, ContextError> {
        let handle = {
            let mut live = self.live.write();
            live.remove(id)
        };
        match handle {
            Some(handle) => {
                let snapshot = {
                    let guard = handle.lock().await;
                    guard.snapshot()
                };
                self.archived
                    .write()
                    .insert(id.clone(), snapshot.clone());
                Ok(snapshot)
            }
            None => self
                .archived
                .read()
                .get(id)
                .cloned()
                .ok_or_else(|| ContextError::UnknownInstance {
                    instance: id.clone(),
                }),
        }
    }

    /// Status summary of an instance, live or archived. Available at all
    /// times; errors are visible here as node/instance statuses, never
    /// silently dropped.
    pub async fn report(&self, id: &InstanceId) -> Result<InstanceReport, ContextError> {
        Ok(self.snapshot(id).await?.report())
    }

    /// `true` if the instance has been archived (reached a terminal state).
    #[must_use]
    pub fn is_archived(&self, id: &InstanceId) -> bool {
        self.archived.read().contains_key(id)
    }

    /// Ids of all live (non-terminal) instances.
    #[must_use]
    pub fn live_ids(&self) -> Vec<InstanceId> {
        self.live.read().keys().cloned().collect()
    }
}
