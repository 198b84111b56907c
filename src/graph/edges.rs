//! Edge types and guard references for conditional graph flow.
//!
//! Edges carry the conditional transition logic of a workflow: an edge with
//! no guard is always live once its source completes; a guarded edge is live
//! iff its guard expression evaluates to `true` against the instance context
//! at the moment the source completes. Loop-back edges are the only permitted
//! cycles and carry an explicit iteration bound.

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Stable identifier of an edge within its definition.
///
/// Edge ids are the index of the edge in declaration order; they are stable
/// for the lifetime of the compiled definition and are what the coordinator's
/// per-instance edge accounting is keyed on.
pub type EdgeId = usize;

/// Reference to the guard of an edge.
///
/// Guards are either written inline on the edge or name an entry in the
/// definition's guard table, letting several edges share one expression.
/// The expression language itself is opaque to this crate; expressions are
/// handed verbatim to the configured
/// [`GuardEvaluator`](crate::evaluator::GuardEvaluator).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeGuard {
    /// Inline guard expression.
    Expr(String),
    /// Name of a shared guard declared on the definition.
    Named(String),
}

/// A directed edge between two nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Source node; the edge is considered for firing when this completes.
    pub from: NodeId,
    /// Target node.
    pub to: NodeId,
    /// Optional transition guard; `None` means unconditionally live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<EdgeGuard>,
    /// `Some(max_iterations)` flags this as a loop-back edge. Loop-back
    /// edges are excluded from the acyclicity check and re-arm their target;
    /// exceeding the bound forces the target FAILED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_back: Option<u32>,
}

impl EdgeSpec {
    /// `true` if this edge is an explicitly declared loop-back edge.
    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.loop_back.is_some()
    }

    /// Human-readable `from->to` reference used in validation diagnostics.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}->{}", self.from, self.to)
    }
}
