//! DefinitionBuilder: fluent construction of workflow definitions.
//!
//! The builder collects nodes, edges, and shared guards before
//! [`compile`](DefinitionBuilder::compile) validates the whole graph and
//! freezes it into a [`WorkflowDefinition`](super::WorkflowDefinition).

use std::time::Duration;

use rustc_hash::FxHashMap;

use super::definition::NodeSpec;
use super::edges::{EdgeGuard, EdgeSpec};
use crate::types::{FailurePolicy, FanInPolicy, NodeId};

/// Builder for constructing workflow definitions with a fluent API.
///
/// Start and terminal nodes are derived, not declared: a node with no
/// incoming non-loop edges is a start node, a node with no outgoing non-loop
/// edges is a terminal node. Compilation rejects graphs where either set is
/// empty.
///
/// # Examples
///
/// ## Fan-out / fan-in diamond
/// ```
/// use warploom::graph::DefinitionBuilder;
/// use warploom::types::FanInPolicy;
///
/// let def = DefinitionBuilder::new("diamond")
///     .add_node("a", "extract")
///     .add_node("b", "transform")
///     .add_node("c", "transform")
///     .add_node_with("d", "load", FanInPolicy::All, Default::default())
///     .add_edge("a", "b")
///     .add_edge("a", "c")
///     .add_edge("b", "d")
///     .add_edge("c", "d")
///     .compile()
///     .unwrap();
/// assert_eq!(def.node_count(), 4);
/// ```
///
/// ## Guarded branch with a shared guard
/// ```
/// use warploom::graph::DefinitionBuilder;
///
/// let def = DefinitionBuilder::new("branch")
///     .add_guard("is_large", "payload.size > 1048576")
///     .add_node("scan", "scan")
///     .add_node("chunked", "chunked-upload")
///     .add_node("direct", "direct-upload")
///     .add_named_guarded_edge("scan", "chunked", "is_large")
///     .add_guarded_edge("scan", "direct", "payload.size <= 1048576")
///     .compile()
///     .unwrap();
/// assert_eq!(def.start_nodes(), &["scan".into()]);
/// ```
#[derive(Debug, Default)]
pub struct DefinitionBuilder {
    pub(super) name: String,
    pub(super) nodes: Vec<NodeSpec>,
    pub(super) edges: Vec<EdgeSpec>,
    pub(super) guards: FxHashMap<String, String>,
}

impl DefinitionBuilder {
    /// Creates an empty builder for the named workflow type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            guards: FxHashMap::default(),
        }
    }

    /// Adds a node with default policies (fan-in ALL, abort-instance).
    #[must_use]
    pub fn add_node(mut self, id: impl Into<NodeId>, task: impl Into<String>) -> Self {
        self.nodes.push(NodeSpec::new(id, task));
        self
    }

    /// Adds a node with explicit fan-in and failure policies.
    #[must_use]
    pub fn add_node_with(
        mut self,
        id: impl Into<NodeId>,
        task: impl Into<String>,
        fan_in: FanInPolicy,
        failure_policy: FailurePolicy,
    ) -> Self {
        self.nodes.push(NodeSpec {
            id: id.into(),
            task: task.into(),
            fan_in,
            failure_policy,
            dispatch_timeout: None,
        });
        self
    }

    /// Adds a fully specified node.
    #[must_use]
    pub fn add_node_spec(mut self, spec: NodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    /// Overrides the dispatch timeout of the most recently added node.
    ///
    /// No-op on an empty builder.
    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        if let Some(last) = self.nodes.last_mut() {
            last.dispatch_timeout = Some(timeout);
        }
        self
    }

    /// Adds an unconditional edge.
    ///
    /// Multiple edges from one node create fan-out; multiple edges into one
    /// node create fan-in, resolved by the target's [`FanInPolicy`].
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            to: to.into(),
            guard: None,
            loop_back: None,
        });
        self
    }

    /// Adds an edge guarded by an inline expression.
    ///
    /// The edge is live iff the expression evaluates to `true` against the
    /// instance context when `from` completes.
    #[must_use]
    pub fn add_guarded_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        expr: impl Into<String>,
    ) -> Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            to: to.into(),
            guard: Some(EdgeGuard::Expr(expr.into())),
            loop_back: None,
        });
        self
    }

    /// Adds an edge guarded by a named guard (see [`add_guard`](Self::add_guard)).
    #[must_use]
    pub fn add_named_guarded_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        guard_name: impl Into<String>,
    ) -> Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            to: to.into(),
            guard: Some(EdgeGuard::Named(guard_name.into())),
            loop_back: None,
        });
        self
    }

    /// Adds an explicitly flagged loop-back edge, bounded by
    /// `max_iterations` re-arms of the target.
    ///
    /// Loop-back edges are the only permitted cycles; compilation rejects a
    /// bound of zero.
    #[must_use]
    pub fn add_loop_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        max_iterations: u32,
    ) -> Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            to: to.into(),
            guard: None,
            loop_back: Some(max_iterations),
        });
        self
    }

    /// Adds a guarded loop-back edge. The guard decides whether another
    /// iteration is taken at all; the bound caps how many may be taken.
    #[must_use]
    pub fn add_guarded_loop_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        expr: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            to: to.into(),
            guard: Some(EdgeGuard::Expr(expr.into())),
            loop_back: Some(max_iterations),
        });
        self
    }

    /// Declares a shared guard expression usable by several edges via
    /// [`add_named_guarded_edge`](Self::add_named_guarded_edge).
    #[must_use]
    pub fn add_guard(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.guards.insert(name.into(), expr.into());
        self
    }
}
