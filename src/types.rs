//! Core types for the warploom coordinator.
//!
//! This module defines the identifier and status vocabulary used throughout
//! the crate: how nodes and running instances are named, how dispatches are
//! made idempotent, and the per-node / per-instance state machines everything
//! else is written against.
//!
//! # Key Types
//!
//! - [`NodeId`] / [`InstanceId`]: stable identifiers for graph nodes and
//!   running executions
//! - [`IdempotencyKey`]: token minting exactly-once *acceptance* of dispatch
//!   effects despite at-least-once delivery
//! - [`NodeStatus`]: the per-node lifecycle
//!   (`Pending → Ready → Dispatched → {Completed, Failed} / Skipped`)
//! - [`FanInPolicy`] / [`FailurePolicy`]: per-node scheduling and error
//!   propagation rules
//! - [`InstanceOutcome`] / [`FailureCause`]: terminal classification of a
//!   whole instance
//!
//! # Examples
//!
//! ```rust
//! use warploom::types::{IdempotencyKey, InstanceId, NodeId, NodeStatus};
//!
//! let instance = InstanceId::new();
//! let node = NodeId::from("resize-image");
//!
//! let key = IdempotencyKey::mint(&instance, &node, 7);
//! assert!(key.as_str().ends_with(":7"));
//!
//! assert!(NodeStatus::Pending.is_schedulable());
//! assert!(NodeStatus::Completed.is_settled());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a node within a workflow definition.
///
/// Node ids are author-chosen strings, unique within one definition. They are
/// cheap to clone and hash (the coordinator keys most of its bookkeeping on
/// them) and serialize as plain strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Developer Experience: allow using string literals where a NodeId is expected.
impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Identifier of one running execution of a workflow definition.
///
/// Freshly minted ids are v4 UUIDs; the string form is used on the wire and
/// in checkpoint keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Mint a fresh instance id.
    #[must_use]
    pub fn new() -> Self {
        InstanceId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        InstanceId(s.to_string())
    }
}

/// Token guaranteeing at-most-once acceptance of a dispatch's effects.
///
/// Minted from the owning instance's monotone sequence counter at the moment
/// a node is armed for dispatch. The messaging fabric may deliver the
/// command (and its completion) any number of times; a completion is only
/// accepted while its key matches the key currently in flight for that node.
///
/// The encoded form is `<instance>:<node>:<seq>`, which keeps keys unique
/// across instances, across nodes, and across re-dispatches of the same node
/// (retries and loop iterations mint a fresh key).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Mint the key for dispatch `seq` of `node` within `instance`.
    #[must_use]
    pub fn mint(instance: &InstanceId, node: &NodeId, seq: u64) -> Self {
        IdempotencyKey(format!("{instance}:{node}:{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        IdempotencyKey(s.to_string())
    }
}

/// Per-node lifecycle within one instance.
///
/// Legal transitions (driven by the coordinator):
///
/// ```text
/// Pending ─► Ready ─► Dispatched ─► Completed
///    ▲                    │    └──► Failed
///    │                    ▼
///    └────────────── (loop re-arm)
/// Pending/Completed/Skipped ─► Skipped   (dead-path propagation / cancel)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Waiting for its fan-in policy to be satisfied.
    Pending,
    /// Eligible to run; a dispatch command is about to be (or being) minted.
    Ready,
    /// A dispatch command is in flight; awaiting a completion event.
    Dispatched,
    /// A SUCCESS completion was accepted.
    Completed,
    /// A FAILURE completion was accepted, or delivery/evaluation/loop limits
    /// were exhausted.
    Failed,
    /// Unreachable through any live path, or suppressed by cancellation.
    Skipped,
}

impl NodeStatus {
    /// `true` for statuses that may still transition toward execution.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    /// `true` for statuses that count toward instance termination.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Dispatched => "DISPATCHED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        write!(f, "{s}")
    }
}

/// How many incoming live edges must fire before a node becomes ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FanInPolicy {
    /// Every non-loop incoming edge must fire.
    All,
    /// The first firing incoming edge suffices.
    Any,
    /// At least `n` incoming edges must fire.
    Count(u32),
}

impl Default for FanInPolicy {
    fn default() -> Self {
        Self::All
    }
}

impl fmt::Display for FanInPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Any => write!(f, "ANY"),
            Self::Count(n) => write!(f, "COUNT({n})"),
        }
    }
}

/// How a node-level failure propagates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// Fail the whole instance immediately; remaining work is skipped.
    AbortInstance,
    /// Keep the instance running; paths reachable only through the failed
    /// node are skipped.
    SkipDownstream,
    /// Re-dispatch the node (fresh idempotency key) up to `max_attempts`
    /// total attempts, then degrade to skip-downstream propagation.
    RetryNode { max_attempts: u32 },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::AbortInstance
    }
}

/// Worker-reported outcome of one task execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Success,
    Failure,
}

/// Terminal classification of a whole instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceOutcome {
    /// Every designated terminal node completed.
    Success,
    /// At least one terminal node failed or was skipped.
    Failure,
    /// The instance was cancelled; in-flight completions are discarded.
    Cancelled,
}

impl fmt::Display for InstanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Why a node (and possibly its instance) was forced into FAILED.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
    /// The worker reported a FAILURE outcome.
    TaskFailed,
    /// Guard evaluation kept failing past the configured retry limit.
    EvaluationFailed,
    /// Publishing the dispatch command exhausted its delivery attempts.
    DeliveryExhausted,
    /// No completion arrived within the node's dispatch timeout.
    DispatchTimeout,
    /// A loop-back edge exceeded its declared max iteration count.
    LoopLimitExceeded,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TaskFailed => "TASK_FAILED",
            Self::EvaluationFailed => "EVALUATION_FAILED",
            Self::DeliveryExhausted => "DELIVERY_EXHAUSTED",
            Self::DispatchTimeout => "DISPATCH_TIMEOUT",
            Self::LoopLimitExceeded => "LOOP_LIMIT_EXCEEDED",
        };
        write!(f, "{s}")
    }
}
