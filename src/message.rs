//! Wire-level message types exchanged with workers.
//!
//! Two records cross the messaging fabric: [`DispatchCommand`] (coordinator →
//! worker, "run this node with this context") and [`CompletionEvent`]
//! (worker → coordinator, "this dispatch finished with this outcome and
//! these context deltas"). Both carry the idempotency key that pairs them:
//! one command accepts at most one completion per key, however many times
//! the fabric redelivers either.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{IdempotencyKey, InstanceId, NodeId, TaskOutcome};

/// Command instructing a worker to execute one node of one instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    /// Task-type tag from the node spec; tells workers what to run.
    pub task: String,
    /// Key the worker must echo back in its completion event.
    pub idempotency_key: IdempotencyKey,
    /// Context snapshot relevant to this node at dispatch time.
    #[serde(default)]
    pub context: FxHashMap<String, Value>,
}

/// A worker's report that a dispatched node finished.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    /// Must match the key of the command being completed; mismatches are
    /// discarded as stale.
    pub idempotency_key: IdempotencyKey,
    pub outcome: TaskOutcome,
    /// Context variables produced by the task, merged into the instance on
    /// acceptance.
    #[serde(default)]
    pub delta: FxHashMap<String, Value>,
}

impl CompletionEvent {
    /// Successful completion answering `command`, with produced deltas.
    #[must_use]
    pub fn success(command: &DispatchCommand, delta: FxHashMap<String, Value>) -> Self {
        Self {
            instance_id: command.instance_id.clone(),
            node_id: command.node_id.clone(),
            idempotency_key: command.idempotency_key.clone(),
            outcome: TaskOutcome::Success,
            delta,
        }
    }

    /// Failed completion answering `command`.
    #[must_use]
    pub fn failure(command: &DispatchCommand) -> Self {
        Self {
            instance_id: command.instance_id.clone(),
            node_id: command.node_id.clone(),
            idempotency_key: command.idempotency_key.clone(),
            outcome: TaskOutcome::Failure,
            delta: FxHashMap::default(),
        }
    }
}
