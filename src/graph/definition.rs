//! The compiled, immutable workflow definition and its read accessors.

use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::edges::{EdgeGuard, EdgeId, EdgeSpec};
use crate::types::{FailurePolicy, FanInPolicy, NodeId};

/// Static description of one task node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique identifier within the definition.
    pub id: NodeId,
    /// Task-type tag routed to workers; opaque to the coordinator.
    pub task: String,
    /// How many incoming live edges must fire before this node is ready.
    #[serde(default)]
    pub fan_in: FanInPolicy,
    /// How a failure of this node propagates.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Per-node override of the coordinator's dispatch timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_timeout: Option<Duration>,
}

impl NodeSpec {
    #[must_use]
    pub fn new(id: impl Into<NodeId>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            fan_in: FanInPolicy::default(),
            failure_policy: FailurePolicy::default(),
            dispatch_timeout: None,
        }
    }
}

/// Immutable, validated workflow graph.
///
/// Produced by [`DefinitionBuilder::compile`](super::DefinitionBuilder::compile);
/// read-only afterwards. One definition is shared (behind `Arc`) by every
/// concurrently running instance of that workflow type, without locking.
///
/// Invariants guaranteed by compilation:
/// - every edge endpoint names a known node
/// - the graph restricted to non-loop edges is acyclic
/// - every node is reachable from some start node
/// - loop-back edges carry a bound of at least one iteration
/// - `Count(n)` fan-in never exceeds the node's non-loop in-degree
#[derive(Clone, Debug)]
pub struct WorkflowDefinition {
    pub(super) name: String,
    pub(super) nodes: FxHashMap<NodeId, NodeSpec>,
    pub(super) edges: Vec<EdgeSpec>,
    pub(super) guards: FxHashMap<String, String>,
    pub(super) outgoing: FxHashMap<NodeId, Vec<EdgeId>>,
    pub(super) incoming: FxHashMap<NodeId, Vec<EdgeId>>,
    pub(super) start_nodes: Vec<NodeId>,
    pub(super) terminal_nodes: Vec<NodeId>,
    pub(super) loop_bodies: Vec<(EdgeId, FxHashSet<NodeId>)>,
}

impl WorkflowDefinition {
    /// Workflow type name; doubles as the dispatch channel suffix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// All node ids, in unspecified order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The edge with the given id. Ids come from this definition's own
    /// `outgoing`/`incoming` accessors, so the lookup is infallible.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> &EdgeSpec {
        &self.edges[id]
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Outgoing edge ids of `node`, in declaration order.
    #[must_use]
    pub fn outgoing_edges(&self, node: &NodeId) -> &[EdgeId] {
        self.outgoing.get(node).map_or(&[], Vec::as_slice)
    }

    /// Incoming edge ids of `node`, in declaration order.
    #[must_use]
    pub fn incoming_edges(&self, node: &NodeId) -> &[EdgeId] {
        self.incoming.get(node).map_or(&[], Vec::as_slice)
    }

    /// Incoming non-loop edge ids of `node`. Fan-in policies are evaluated
    /// over this set; loop-back edges re-arm rather than count.
    pub fn non_loop_incoming(&self, node: &NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.incoming_edges(node)
            .iter()
            .copied()
            .filter(|id| !self.edges[*id].is_loop())
    }

    #[must_use]
    pub fn fan_in_policy(&self, node: &NodeId) -> FanInPolicy {
        self.nodes
            .get(node)
            .map(|n| n.fan_in)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn failure_policy(&self, node: &NodeId) -> FailurePolicy {
        self.nodes
            .get(node)
            .map(|n| n.failure_policy)
            .unwrap_or_default()
    }

    /// Nodes with no incoming non-loop edges; these arm READY at instance
    /// creation.
    #[must_use]
    pub fn start_nodes(&self) -> &[NodeId] {
        &self.start_nodes
    }

    /// Nodes with no outgoing non-loop edges; instance outcome is SUCCESS
    /// iff all of these complete.
    #[must_use]
    pub fn terminal_nodes(&self) -> &[NodeId] {
        &self.terminal_nodes
    }

    /// Bodies of the declared loop-back edges: for each loop edge, the set
    /// of nodes on some non-loop path from its target to its source (both
    /// inclusive). These are the nodes a firing loop edge re-arms, and the
    /// nodes whose dead outgoing edges may come back to life on the next
    /// iteration.
    #[must_use]
    pub fn loop_bodies(&self) -> &[(EdgeId, FxHashSet<NodeId>)] {
        &self.loop_bodies
    }

    /// Body of one specific loop edge, if `edge` is a loop edge.
    #[must_use]
    pub fn loop_body(&self, edge: EdgeId) -> Option<&FxHashSet<NodeId>> {
        self.loop_bodies
            .iter()
            .find(|(id, _)| *id == edge)
            .map(|(_, body)| body)
    }

    /// Resolve the guard expression of an edge, following named references
    /// into the definition's guard table. `None` for unguarded edges.
    ///
    /// Named references are validated at compile time, so resolution never
    /// dangles on a compiled definition.
    #[must_use]
    pub fn guard_expr(&self, edge: EdgeId) -> Option<&str> {
        match &self.edges[edge].guard {
            None => None,
            Some(EdgeGuard::Expr(expr)) => Some(expr),
            Some(EdgeGuard::Named(name)) => self.guards.get(name).map(String::as_str),
        }
    }
}
