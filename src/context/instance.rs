//! The per-instance execution record and its snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::graph::{EdgeId, WorkflowDefinition};
use crate::types::{FailureCause, IdempotencyKey, InstanceId, InstanceOutcome, NodeId, NodeStatus};

/// Bookkeeping for one in-flight dispatch of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlightDispatch {
    /// Key minted for this dispatch; completions must present it to be
    /// accepted.
    pub key: IdempotencyKey,
    pub dispatched_at: DateTime<Utc>,
    /// Past this point the dispatch counts as a delivery failure.
    pub deadline: DateTime<Utc>,
}

/// Terminal classification of an instance, set exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalState {
    pub outcome: InstanceOutcome,
    pub cause: Option<FailureCause>,
    pub at: DateTime<Utc>,
}

/// Mutable execution state of one running workflow instance.
///
/// Owned by the [`ContextStore`](super::ContextStore); all access outside the
/// store's per-instance lock goes through [`InstanceSnapshot`] copies.
#[derive(Clone, Debug)]
pub struct ExecutionInstance {
    pub id: InstanceId,
    pub definition: Arc<WorkflowDefinition>,
    /// One status per definition node, always fully populated.
    pub statuses: FxHashMap<NodeId, NodeStatus>,
    /// Context variables accumulated from completion deltas.
    pub vars: FxHashMap<String, Value>,
    /// Monotone counter minting idempotency keys; never reused or reset.
    pub seq: u64,
    /// Dispatch attempts per node (retry policy accounting).
    pub attempts: FxHashMap<NodeId, u32>,
    /// Loop re-arms per node, keyed by the loop target.
    pub iterations: FxHashMap<NodeId, u32>,
    /// Live edges whose source has completed.
    pub fired_edges: FxHashSet<EdgeId>,
    /// Edges that can no longer fire (guard false, or source failed/skipped).
    pub dead_edges: FxHashSet<EdgeId>,
    /// Nodes currently dispatched, with their accepted key and deadline.
    pub in_flight: FxHashMap<NodeId, InFlightDispatch>,
    /// First node-level failure cause; becomes the instance's terminal cause
    /// if the instance ends in FAILURE.
    pub first_failure: Option<FailureCause>,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the terminal transition or cancellation.
    pub terminal: Option<TerminalState>,
}

impl ExecutionInstance {
    /// Fresh instance: every node PENDING except the definition's start
    /// nodes, which arm READY immediately.
    #[must_use]
    pub fn new(id: InstanceId, definition: Arc<WorkflowDefinition>) -> Self {
        let statuses = definition
            .node_ids()
            .map(|n| {
                let status = if definition.start_nodes().contains(n) {
                    NodeStatus::Ready
                } else {
                    NodeStatus::Pending
                };
                (n.clone(), status)
            })
            .collect();
        Self {
            id,
            definition,
            statuses,
            vars: FxHashMap::default(),
            seq: 0,
            attempts: FxHashMap::default(),
            iterations: FxHashMap::default(),
            fired_edges: FxHashSet::default(),
            dead_edges: FxHashSet::default(),
            in_flight: FxHashMap::default(),
            first_failure: None,
            created_at: Utc::now(),
            terminal: None,
        }
    }

    /// Record a node-level failure cause; only the first one sticks.
    pub fn note_failure(&mut self, cause: FailureCause) {
        if self.first_failure.is_none() {
            self.first_failure = Some(cause);
        }
    }

    #[must_use]
    pub fn status(&self, node: &NodeId) -> NodeStatus {
        self.statuses
            .get(node)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn set_status(&mut self, node: &NodeId, status: NodeStatus) {
        self.statuses.insert(node.clone(), status);
    }

    /// Mint the next idempotency key for `node` from the sequence counter.
    pub fn mint_key(&mut self, node: &NodeId) -> IdempotencyKey {
        self.seq += 1;
        IdempotencyKey::mint(&self.id, node, self.seq)
    }

    /// Merge a completion's context deltas into the variable map.
    /// Later writes win; key order is irrelevant.
    pub fn merge_delta(&mut self, delta: FxHashMap<String, Value>) {
        self.vars.extend(delta);
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// `true` once every node is settled and none remains READY/DISPATCHED.
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.statuses.values().all(NodeStatus::is_settled)
    }

    /// Outcome per the terminal rule.
    ///
    /// SUCCESS when every designated terminal node COMPLETED. A terminal
    /// node deselected by a guard (SKIPPED with no failure recorded
    /// anywhere in the instance) does not spoil the outcome — that is
    /// ordinary branching. Any FAILED terminal node, or a skipped terminal
    /// downstream of a recorded failure, yields FAILURE.
    #[must_use]
    pub fn derive_outcome(&self) -> InstanceOutcome {
        let terminals = self.definition.terminal_nodes();
        if terminals
            .iter()
            .any(|n| self.status(n) == NodeStatus::Failed)
        {
            return InstanceOutcome::Failure;
        }
        let completed = terminals
            .iter()
            .filter(|n| self.status(n) == NodeStatus::Completed)
            .count();
        if completed == terminals.len() || (completed > 0 && self.first_failure.is_none()) {
            InstanceOutcome::Success
        } else {
            InstanceOutcome::Failure
        }
    }

    /// Immutable copy for checkpointing, guard evaluation, and reporting.
    #[must_use]
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            definition: Arc::clone(&self.definition),
            statuses: self.statuses.clone(),
            vars: self.vars.clone(),
            seq: self.seq,
            attempts: self.attempts.clone(),
            iterations: self.iterations.clone(),
            fired_edges: self.fired_edges.clone(),
            dead_edges: self.dead_edges.clone(),
            in_flight: self.in_flight.clone(),
            first_failure: self.first_failure.clone(),
            created_at: self.created_at,
            terminal: self.terminal.clone(),
        }
    }
}

/// Immutable point-in-time copy of an [`ExecutionInstance`].
///
/// Snapshots are what leaves the per-instance lock: the checkpointer
/// persists them, the evaluator reads variables from them, and archived
/// (terminal) instances are retained as snapshots for querying.
#[derive(Clone, Debug)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub definition: Arc<WorkflowDefinition>,
    pub statuses: FxHashMap<NodeId, NodeStatus>,
    pub vars: FxHashMap<String, Value>,
    pub seq: u64,
    pub attempts: FxHashMap<NodeId, u32>,
    pub iterations: FxHashMap<NodeId, u32>,
    pub fired_edges: FxHashSet<EdgeId>,
    pub dead_edges: FxHashSet<EdgeId>,
    pub in_flight: FxHashMap<NodeId, InFlightDispatch>,
    pub first_failure: Option<FailureCause>,
    pub created_at: DateTime<Utc>,
    pub terminal: Option<TerminalState>,
}

impl InstanceSnapshot {
    #[must_use]
    pub fn status(&self, node: &NodeId) -> NodeStatus {
        self.statuses
            .get(node)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    /// Rebuild a live instance from this snapshot (recovery path).
    #[must_use]
    pub fn into_instance(self) -> ExecutionInstance {
        ExecutionInstance {
            id: self.id,
            definition: self.definition,
            statuses: self.statuses,
            vars: self.vars,
            seq: self.seq,
            attempts: self.attempts,
            iterations: self.iterations,
            fired_edges: self.fired_edges,
            dead_edges: self.dead_edges,
            in_flight: self.in_flight,
            first_failure: self.first_failure,
            created_at: self.created_at,
            terminal: self.terminal,
        }
    }

    /// Condensed, user-facing view of this snapshot.
    #[must_use]
    pub fn report(&self) -> InstanceReport {
        InstanceReport {
            id: self.id.clone(),
            workflow: self.definition.name().to_string(),
            statuses: self.statuses.clone(),
            outcome: self.terminal.as_ref().map(|t| t.outcome),
            cause: self.terminal.as_ref().and_then(|t| t.cause.clone()),
            created_at: self.created_at,
        }
    }
}

/// Queryable status summary of an instance, live or archived.
///
/// Available at all times; every node- or instance-level error is reflected
/// here rather than dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceReport {
    pub id: InstanceId,
    pub workflow: String,
    pub statuses: FxHashMap<NodeId, NodeStatus>,
    /// `None` while the instance is still running.
    pub outcome: Option<InstanceOutcome>,
    pub cause: Option<FailureCause>,
    pub created_at: DateTime<Utc>,
}
