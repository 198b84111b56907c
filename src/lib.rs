//! # Warploom: Distributed Workflow Graph Coordinator
//!
//! Warploom coordinates multi-step workflows expressed as directed graphs
//! whose edges carry conditional transition logic. Ready tasks are dispatched
//! to distributed workers over a publish/subscribe fabric; completions flow
//! back, the context advances, and the graph executes until termination —
//! maintaining dependency-consistent ordering under concurrent, out-of-order,
//! and duplicated completion signals, and recovering cleanly from restarts.
//!
//! ## Core Concepts
//!
//! - **Definition**: an immutable, validated graph of task nodes with fan-in
//!   policies, guarded edges, and bounded loop-back edges
//! - **Instance**: one running execution of a definition with its own
//!   context variables and per-node statuses
//! - **Dispatch**: a command sent to workers, made idempotent by a key
//!   minted from the instance's sequence counter
//! - **Completion**: a worker's report of a dispatch's outcome, accepted at
//!   most once per key
//! - **Checkpoint**: a durable snapshot enabling restart recovery
//!
//! ## Building a Definition
//!
//! ```
//! use warploom::graph::DefinitionBuilder;
//! use warploom::types::{FailurePolicy, FanInPolicy};
//!
//! let definition = DefinitionBuilder::new("etl")
//!     .add_node("extract", "extract")
//!     .add_node("clean", "transform")
//!     .add_node("enrich", "transform")
//!     .add_node_with(
//!         "load",
//!         "load",
//!         FanInPolicy::All,
//!         FailurePolicy::RetryNode { max_attempts: 3 },
//!     )
//!     .add_edge("extract", "clean")
//!     .add_edge("extract", "enrich")
//!     .add_edge("clean", "load")
//!     .add_edge("enrich", "load")
//!     .compile()
//!     .expect("valid definition");
//!
//! assert_eq!(definition.start_nodes(), &["extract".into()]);
//! ```
//!
//! ## Running Instances
//!
//! The [`coordinator::Coordinator`] owns the execution loop; see its module
//! documentation for a complete example. The external collaborators — the
//! predicate evaluator, the messaging fabric, and the checkpoint store — are
//! consumed through the [`evaluator::GuardEvaluator`],
//! [`gateway::Transport`], and [`checkpoint::Checkpointer`] capability
//! traits; in-memory implementations of the latter two ship with the crate.
//!
//! ## Module Guide
//!
//! - [`graph`] - Workflow definition building, validation, loading, export
//! - [`context`] - Per-instance execution state and the context store
//! - [`coordinator`] - The dispatch coordinator (the scheduler proper)
//! - [`evaluator`] - Guard-expression capability and edge-liveness adapter
//! - [`gateway`] - Messaging seam: retrying publish, dedup window, transport
//! - [`checkpoint`] - Durable snapshots and restart recovery
//! - [`message`] - Wire records exchanged with workers
//! - [`config`] - Runtime tunables
//! - [`telemetry`] - Dispatch-interval events and report rendering
//! - [`types`] - Identifier and status vocabulary

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod evaluator;
pub mod gateway;
pub mod graph;
pub mod message;
pub mod telemetry;
pub mod types;
