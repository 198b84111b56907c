//! Definition compilation and structural validation.
//!
//! Compilation turns a [`DefinitionBuilder`](super::DefinitionBuilder) into
//! an immutable [`WorkflowDefinition`](super::WorkflowDefinition), rejecting
//! malformed graphs up front so that instances are never created against an
//! invalid shape.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::definition::WorkflowDefinition;
use super::edges::{EdgeGuard, EdgeId};
use crate::types::{FanInPolicy, NodeId};

/// Structural validation failures, each carrying the offending node or edge
/// reference. Raised at load time; an instance is never created from a
/// definition that failed to compile.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("definition has no nodes")]
    #[diagnostic(code(warploom::graph::empty))]
    EmptyDefinition,

    #[error("duplicate node id: {node}")]
    #[diagnostic(code(warploom::graph::duplicate_node))]
    DuplicateNode { node: NodeId },

    #[error("edge {edge} references unknown node: {node}")]
    #[diagnostic(
        code(warploom::graph::unknown_node),
        help("Every edge endpoint must name a declared node.")
    )]
    UnknownNode { edge: String, node: NodeId },

    #[error("edge {edge} references unknown guard: {name}")]
    #[diagnostic(
        code(warploom::graph::unknown_guard),
        help("Declare the guard on the definition before referencing it.")
    )]
    UnknownGuard { edge: String, name: String },

    #[error("undeclared cycle through node: {node}")]
    #[diagnostic(
        code(warploom::graph::undeclared_cycle),
        help("Cycles must be declared as bounded loop-back edges.")
    )]
    UndeclaredCycle { node: NodeId },

    #[error("node unreachable from any start node: {node}")]
    #[diagnostic(code(warploom::graph::unreachable))]
    Unreachable { node: NodeId },

    #[error("no start nodes (every node has incoming edges)")]
    #[diagnostic(
        code(warploom::graph::no_start_nodes),
        help("At least one node must have no incoming non-loop edge.")
    )]
    NoStartNodes,

    #[error("no terminal nodes (every node has outgoing edges)")]
    #[diagnostic(code(warploom::graph::no_terminal_nodes))]
    NoTerminalNodes,

    #[error("loop-back edge {edge} declares a zero iteration bound")]
    #[diagnostic(
        code(warploom::graph::zero_loop_bound),
        help("Loop-back edges must allow at least one re-arm.")
    )]
    ZeroLoopBound { edge: String },

    #[error(
        "fan-in COUNT({required}) on node {node} exceeds its {incoming} incoming non-loop edges"
    )]
    #[diagnostic(code(warploom::graph::unsatisfiable_fan_in))]
    UnsatisfiableFanIn {
        node: NodeId,
        required: u32,
        incoming: usize,
    },

    #[error("definition document malformed: {message}")]
    #[diagnostic(code(warploom::graph::malformed))]
    Malformed { message: String },
}

impl super::builder::DefinitionBuilder {
    /// Validates and freezes the builder into a [`WorkflowDefinition`].
    ///
    /// Checks, in order: non-empty node set, unique node ids, edge endpoints
    /// and guard references resolve, loop bounds are positive, acyclicity of
    /// the non-loop subgraph, reachability of every node from the derived
    /// start set, existence of start and terminal nodes, and satisfiability
    /// of `Count(n)` fan-in policies.
    pub fn compile(self) -> Result<WorkflowDefinition, ValidationError> {
        if self.nodes.is_empty() {
            return Err(ValidationError::EmptyDefinition);
        }

        let mut nodes = FxHashMap::default();
        for spec in self.nodes {
            if nodes.insert(spec.id.clone(), spec.clone()).is_some() {
                return Err(ValidationError::DuplicateNode { node: spec.id });
            }
        }

        let mut outgoing: FxHashMap<NodeId, Vec<EdgeId>> = FxHashMap::default();
        let mut incoming: FxHashMap<NodeId, Vec<EdgeId>> = FxHashMap::default();
        for (id, edge) in self.edges.iter().enumerate() {
            for endpoint in [&edge.from, &edge.to] {
                if !nodes.contains_key(endpoint) {
                    return Err(ValidationError::UnknownNode {
                        edge: edge.reference(),
                        node: endpoint.clone(),
                    });
                }
            }
            if let Some(EdgeGuard::Named(name)) = &edge.guard
                && !self.guards.contains_key(name)
            {
                return Err(ValidationError::UnknownGuard {
                    edge: edge.reference(),
                    name: name.clone(),
                });
            }
            if edge.loop_back == Some(0) {
                return Err(ValidationError::ZeroLoopBound {
                    edge: edge.reference(),
                });
            }
            outgoing.entry(edge.from.clone()).or_default().push(id);
            incoming.entry(edge.to.clone()).or_default().push(id);
        }

        // Start/terminal sets are derived from the non-loop subgraph.
        let non_loop_in_degree = |node: &NodeId| {
            incoming
                .get(node)
                .map_or(0, |ids| ids.iter().filter(|id| !self.edges[**id].is_loop()).count())
        };
        let non_loop_out_degree = |node: &NodeId| {
            outgoing
                .get(node)
                .map_or(0, |ids| ids.iter().filter(|id| !self.edges[**id].is_loop()).count())
        };

        let mut start_nodes: Vec<NodeId> = nodes
            .keys()
            .filter(|n| non_loop_in_degree(n) == 0)
            .cloned()
            .collect();
        start_nodes.sort();
        if start_nodes.is_empty() {
            return Err(ValidationError::NoStartNodes);
        }

        // Kahn's algorithm over the non-loop subgraph; leftovers sit on an
        // undeclared cycle. Runs before terminal derivation so a cyclic
        // graph is reported as a cycle, not as a missing terminal.
        let mut in_degree: FxHashMap<&NodeId, usize> =
            nodes.keys().map(|n| (n, non_loop_in_degree(n))).collect();
        let mut queue: Vec<&NodeId> = in_degree
            .iter()
            .filter_map(|(n, d)| (*d == 0).then_some(*n))
            .collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop() {
            visited += 1;
            if let Some(out) = outgoing.get(node) {
                for edge_id in out {
                    let edge = &self.edges[*edge_id];
                    if edge.is_loop() {
                        continue;
                    }
                    let d = in_degree
                        .get_mut(&edge.to)
                        .expect("edge endpoints verified above");
                    *d -= 1;
                    if *d == 0 {
                        queue.push(&edge.to);
                    }
                }
            }
        }
        if visited != nodes.len() {
            let node = in_degree
                .iter()
                .find_map(|(n, d)| (*d > 0).then(|| (*n).clone()))
                .expect("unvisited node remains when a cycle exists");
            return Err(ValidationError::UndeclaredCycle { node });
        }

        let mut terminal_nodes: Vec<NodeId> = nodes
            .keys()
            .filter(|n| non_loop_out_degree(n) == 0)
            .cloned()
            .collect();
        terminal_nodes.sort();
        if terminal_nodes.is_empty() {
            return Err(ValidationError::NoTerminalNodes);
        }

        // Reachability over all edges (loop edges included) from the starts.
        let mut reachable: FxHashSet<&NodeId> = FxHashSet::default();
        let mut frontier: Vec<&NodeId> = start_nodes.iter().collect();
        while let Some(node) = frontier.pop() {
            if !reachable.insert(node) {
                continue;
            }
            if let Some(out) = outgoing.get(node) {
                for edge_id in out {
                    frontier.push(&self.edges[*edge_id].to);
                }
            }
        }
        if let Some(node) = nodes.keys().find(|n| !reachable.contains(n)) {
            return Err(ValidationError::Unreachable { node: node.clone() });
        }

        for (id, spec) in &nodes {
            if let FanInPolicy::Count(n) = spec.fan_in {
                let incoming_count = non_loop_in_degree(id);
                if n == 0 || n as usize > incoming_count.max(1) {
                    return Err(ValidationError::UnsatisfiableFanIn {
                        node: id.clone(),
                        required: n,
                        incoming: incoming_count,
                    });
                }
            }
        }

        // Precompute loop bodies: the nodes a firing loop edge re-arms are
        // those on some non-loop path from its target to its source.
        let loop_bodies = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_loop())
            .map(|(id, e)| {
                let forward = walk(&e.to, &outgoing, &self.edges, |edge| &edge.to);
                let backward = walk(&e.from, &incoming, &self.edges, |edge| &edge.from);
                let body: FxHashSet<NodeId> =
                    forward.intersection(&backward).cloned().collect();
                (id, body)
            })
            .collect();

        Ok(WorkflowDefinition {
            name: self.name,
            nodes,
            edges: self.edges,
            guards: self.guards,
            outgoing,
            incoming,
            start_nodes,
            terminal_nodes,
            loop_bodies,
        })
    }
}

/// Non-loop reachability sweep from `from`, following `index` (outgoing or
/// incoming) and projecting each edge to its next node with `step`.
fn walk(
    from: &NodeId,
    index: &FxHashMap<NodeId, Vec<EdgeId>>,
    edges: &[super::edges::EdgeSpec],
    step: impl Fn(&super::edges::EdgeSpec) -> &NodeId,
) -> FxHashSet<NodeId> {
    let mut seen: FxHashSet<NodeId> = FxHashSet::default();
    let mut stack = vec![from.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        if let Some(ids) = index.get(&node) {
            for id in ids {
                let edge = &edges[*id];
                if !edge.is_loop() {
                    stack.push(step(edge).clone());
                }
            }
        }
    }
    seen
}
