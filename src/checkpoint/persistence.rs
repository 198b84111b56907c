/*!
Persistence primitives for serializing/deserializing instance checkpoints
(used by the SQLite checkpointer and any future persistent backends).

Design Goals:
- Provide explicit serde-friendly structs decoupled from internal in-memory
  representations.
- Keep conversion logic localized so checkpointer code stays lean and
  declarative.
- Keep `chrono` types out of the serialized shape (timestamps persist as
  RFC3339 strings).

This module intentionally does NOT perform I/O. It is pure data
transformation and (de)serialization glue.
*/

use std::sync::Arc;

use chrono::Utc;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ExecutionInstance, InFlightDispatch, InstanceSnapshot, TerminalState};
use crate::graph::{EdgeId, WorkflowDefinition};
use crate::types::{
    FailureCause, IdempotencyKey, InstanceId, InstanceOutcome, NodeId, NodeStatus,
};

/// Persisted shape of one in-flight dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedInFlight {
    pub key: IdempotencyKey,
    /// RFC3339 string form (keeps `chrono::DateTime` out of the shape).
    pub dispatched_at: String,
    pub deadline: String,
}

/// Persisted shape of a terminal classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedTerminal {
    pub outcome: InstanceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
    pub at: String,
}

/// Full persisted checkpoint of one instance, keyed by (instance, seq).
///
/// This is the unit the [`Checkpointer`](super::Checkpointer) trait deals
/// in. The definition itself is not persisted — checkpoints carry the
/// workflow name and recovery resolves it against the coordinator's
/// definition registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceCheckpoint {
    pub instance_id: InstanceId,
    pub workflow: String,
    pub seq: u64,
    pub statuses: FxHashMap<NodeId, NodeStatus>,
    #[serde(default)]
    pub vars: FxHashMap<String, Value>,
    #[serde(default)]
    pub attempts: FxHashMap<NodeId, u32>,
    #[serde(default)]
    pub iterations: FxHashMap<NodeId, u32>,
    #[serde(default)]
    pub fired_edges: Vec<EdgeId>,
    #[serde(default)]
    pub dead_edges: Vec<EdgeId>,
    #[serde(default)]
    pub in_flight: FxHashMap<NodeId, PersistedInFlight>,
    #[serde(default)]
    pub first_failure: Option<FailureCause>,
    pub created_at: String,
    #[serde(default)]
    pub terminal: Option<PersistedTerminal>,
}

impl InstanceCheckpoint {
    /// Capture a checkpoint from an instance snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &InstanceSnapshot) -> Self {
        Self {
            instance_id: snapshot.id.clone(),
            workflow: snapshot.definition.name().to_string(),
            seq: snapshot.seq,
            statuses: snapshot.statuses.clone(),
            vars: snapshot.vars.clone(),
            attempts: snapshot.attempts.clone(),
            iterations: snapshot.iterations.clone(),
            fired_edges: sorted(&snapshot.fired_edges),
            dead_edges: sorted(&snapshot.dead_edges),
            in_flight: snapshot
                .in_flight
                .iter()
                .map(|(node, dispatch)| {
                    (
                        node.clone(),
                        PersistedInFlight {
                            key: dispatch.key.clone(),
                            dispatched_at: dispatch.dispatched_at.to_rfc3339(),
                            deadline: dispatch.deadline.to_rfc3339(),
                        },
                    )
                })
                .collect(),
            first_failure: snapshot.first_failure.clone(),
            created_at: snapshot.created_at.to_rfc3339(),
            terminal: snapshot.terminal.as_ref().map(|t| PersistedTerminal {
                outcome: t.outcome,
                cause: t.cause.clone(),
                at: t.at.to_rfc3339(),
            }),
        }
    }

    /// Rebuild a live instance against its (re-registered) definition.
    ///
    /// Unparseable timestamps fall back to now, matching the conservative
    /// recovery posture: a garbled deadline re-arms on the next timeout
    /// sweep rather than immediately.
    #[must_use]
    pub fn into_instance(self, definition: Arc<WorkflowDefinition>) -> ExecutionInstance {
        ExecutionInstance {
            id: self.instance_id,
            definition,
            statuses: self.statuses,
            vars: self.vars,
            seq: self.seq,
            attempts: self.attempts,
            iterations: self.iterations,
            fired_edges: self.fired_edges.into_iter().collect::<FxHashSet<_>>(),
            dead_edges: self.dead_edges.into_iter().collect::<FxHashSet<_>>(),
            in_flight: self
                .in_flight
                .into_iter()
                .map(|(node, persisted)| {
                    (
                        node,
                        InFlightDispatch {
                            key: persisted.key,
                            dispatched_at: parse_rfc3339(&persisted.dispatched_at),
                            deadline: parse_rfc3339(&persisted.deadline),
                        },
                    )
                })
                .collect(),
            first_failure: self.first_failure,
            created_at: parse_rfc3339(&self.created_at),
            terminal: self.terminal.map(|t| TerminalState {
                outcome: t.outcome,
                cause: t.cause,
                at: parse_rfc3339(&t.at),
            }),
        }
    }
}

fn sorted(set: &FxHashSet<EdgeId>) -> Vec<EdgeId> {
    let mut v: Vec<EdgeId> = set.iter().copied().collect();
    v.sort_unstable();
    v
}

fn parse_rfc3339(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
