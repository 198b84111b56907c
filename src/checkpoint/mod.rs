//! Checkpointing and recovery: durable snapshots of in-flight instances.
//!
//! The coordinator persists an [`InstanceCheckpoint`] after every accepted
//! state transition (keyed by instance id and sequence counter) and, on
//! startup, reloads every non-terminal instance to resume where it left off.
//! Recovery never re-dispatches a node that is already DISPATCHED until its
//! dispatch timeout elapses, so still-in-flight commands cannot double their
//! side effects.
//!
//! Two backends ship with the crate: [`InMemoryCheckpointer`] for tests and
//! development, and [`SqliteCheckpointer`](sqlite::SqliteCheckpointer)
//! (feature `sqlite`) for durable storage. Both implement the pluggable
//! [`Checkpointer`] trait; persistence shapes live in [`persistence`] and
//! stay decoupled from the in-memory types.

pub mod persistence;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::types::InstanceId;

pub use persistence::{InstanceCheckpoint, PersistedInFlight, PersistedTerminal};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteCheckpointer, resolve_database_url};

/// Errors from checkpoint persistence.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint backend error: {message}")]
    #[diagnostic(
        code(warploom::checkpoint::backend),
        help("Check the checkpoint store's connectivity and schema.")
    )]
    Backend { message: String },

    #[error("checkpoint serialization failed: {source}")]
    #[diagnostic(code(warploom::checkpoint::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("no definition registered for workflow: {workflow}")]
    #[diagnostic(
        code(warploom::checkpoint::unknown_workflow),
        help("Register the workflow definition before calling recover().")
    )]
    UnknownWorkflow { workflow: String },
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Pluggable persistence for instance checkpoints.
///
/// `save` must be idempotent for re-saves of the same (instance, seq) pair;
/// a later seq always supersedes an earlier one for the same instance.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist the checkpoint, superseding any older one for the instance.
    async fn save(&self, checkpoint: InstanceCheckpoint) -> Result<()>;

    /// Latest checkpoint for the instance, if any.
    async fn load_latest(&self, instance: &InstanceId) -> Result<Option<InstanceCheckpoint>>;

    /// Latest checkpoints of every instance not yet terminal.
    async fn list_non_terminal(&self) -> Result<Vec<InstanceCheckpoint>>;

    /// Drop all checkpoints for the instance.
    async fn delete(&self, instance: &InstanceId) -> Result<()>;
}

/// Volatile checkpointer for tests and development.
///
/// Keeps only the latest checkpoint per instance; an out-of-order save with
/// a stale sequence number is ignored.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    inner: Mutex<FxHashMap<InstanceId, InstanceCheckpoint>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instances with a stored checkpoint.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: InstanceCheckpoint) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.get(&checkpoint.instance_id) {
            Some(existing) if existing.seq > checkpoint.seq => Ok(()),
            _ => {
                inner.insert(checkpoint.instance_id.clone(), checkpoint);
                Ok(())
            }
        }
    }

    async fn load_latest(&self, instance: &InstanceId) -> Result<Option<InstanceCheckpoint>> {
        Ok(self.inner.lock().get(instance).cloned())
    }

    async fn list_non_terminal(&self) -> Result<Vec<InstanceCheckpoint>> {
        Ok(self
            .inner
            .lock()
            .values()
            .filter(|cp| cp.terminal.is_none())
            .cloned()
            .collect())
    }

    async fn delete(&self, instance: &InstanceId) -> Result<()> {
        self.inner.lock().remove(instance);
        Ok(())
    }
}
