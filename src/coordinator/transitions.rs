//! Pure, synchronous state-transition planning.
//!
//! Every function here runs inside [`ContextStore::update`] — under the
//! per-instance lock, never awaiting — and returns a *plan* (commands to
//! publish, nodes to fail) that the coordinator executes after the lock is
//! released. This is what keeps the concurrency contract honest: fan-in
//! satisfaction, duplicate suppression, and skip propagation are all decided
//! against the authoritative instance state at the moment of the last
//! satisfying delta.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rustc_hash::FxHashSet;

use crate::config::CoordinatorConfig;
use crate::context::{ExecutionInstance, InFlightDispatch, TerminalState};
use crate::graph::{EdgeId, WorkflowDefinition};
use crate::message::{CompletionEvent, DispatchCommand};
use crate::types::{
    FailureCause, FailurePolicy, FanInPolicy, InstanceOutcome, NodeId, NodeStatus, TaskOutcome,
};

/// Result of accepting a completion event under the lock.
pub(super) struct Accepted {
    pub outcome: TaskOutcome,
    pub dispatched_at: DateTime<Utc>,
}

/// Everything the coordinator must do after a successful completion was
/// applied: publish freshly armed dispatches and fail loop-limit breaches.
#[derive(Default)]
pub(super) struct AdvancePlan {
    pub commands: Vec<DispatchCommand>,
    pub loop_limit_failures: Vec<NodeId>,
}

/// Outcome of applying a node failure under the lock.
pub(super) enum FailurePlan {
    /// Retry policy re-armed the node; publish this command.
    Retry(DispatchCommand),
    /// The node settled FAILED and propagation was applied.
    Settled,
    /// The failure no longer applies (a completion raced it, or the
    /// instance is already terminal).
    Stale,
}

/// Validate a completion against the in-flight table and apply its effects.
///
/// Acceptance requires all of: the instance is live, the node is currently
/// DISPATCHED, and the event's idempotency key matches the key minted for
/// the dispatch in flight. Anything else — duplicates that slipped the
/// gateway window, completions for cancelled instances, echoes of an
/// earlier retry — is discarded with a debug log and no side effect.
pub(super) fn accept_completion(
    inst: &mut ExecutionInstance,
    event: &CompletionEvent,
) -> Option<Accepted> {
    if inst.is_terminal() {
        tracing::debug!(
            instance = %event.instance_id,
            node = %event.node_id,
            "completion for terminal instance discarded"
        );
        return None;
    }
    match inst.in_flight.get(&event.node_id) {
        Some(dispatch)
            if dispatch.key == event.idempotency_key
                && inst.status(&event.node_id) == NodeStatus::Dispatched =>
        {
            let dispatched_at = dispatch.dispatched_at;
            inst.in_flight.remove(&event.node_id);
            inst.merge_delta(event.delta.clone());
            let status = match event.outcome {
                TaskOutcome::Success => NodeStatus::Completed,
                TaskOutcome::Failure => NodeStatus::Failed,
            };
            inst.set_status(&event.node_id, status);
            Some(Accepted {
                outcome: event.outcome,
                dispatched_at,
            })
        }
        _ => {
            tracing::debug!(
                instance = %event.instance_id,
                node = %event.node_id,
                key = %event.idempotency_key,
                "stale or duplicate completion discarded"
            );
            None
        }
    }
}

/// Apply edge liveness after a SUCCESS completion and compute what runs next.
///
/// `live` is the evaluator's verdict over the node's outgoing edges. Dead
/// paths are skipped transitively; satisfied successors arm exactly once
/// (only a PENDING node can be promoted, so racing predecessor completions
/// produce one dispatch); live loop-back edges re-arm their target within
/// the declared iteration bound.
pub(super) fn plan_advance(
    inst: &mut ExecutionInstance,
    node: &NodeId,
    live: &[EdgeId],
    config: &CoordinatorConfig,
) -> AdvancePlan {
    let def = inst.definition.clone();
    let mut plan = AdvancePlan::default();
    if inst.is_terminal() {
        return plan;
    }
    let mut live_loop_edges = Vec::new();

    for &edge_id in def.outgoing_edges(node) {
        let edge = def.edge(edge_id);
        if live.contains(&edge_id) {
            if edge.is_loop() {
                live_loop_edges.push(edge_id);
            } else {
                inst.fired_edges.insert(edge_id);
            }
        } else {
            inst.dead_edges.insert(edge_id);
        }
    }

    propagate_skips(inst, &def);

    for &edge_id in def.outgoing_edges(node) {
        let edge = def.edge(edge_id);
        if edge.is_loop() || !live.contains(&edge_id) {
            continue;
        }
        let target = edge.to.clone();
        if inst.status(&target) == NodeStatus::Pending && fan_in_satisfied(inst, &def, &target) {
            inst.set_status(&target, NodeStatus::Ready);
            plan.commands.push(arm_node(inst, &target, config));
        }
    }

    for edge_id in live_loop_edges {
        let edge = def.edge(edge_id);
        let target = edge.to.clone();
        let bound = edge.loop_back.expect("loop edge carries a bound");
        let iteration = inst.iterations.get(&target).copied().unwrap_or(0) + 1;
        inst.iterations.insert(target.clone(), iteration);
        if iteration > bound {
            tracing::warn!(
                instance = %inst.id,
                node = %target,
                iteration,
                bound,
                "loop iteration bound exceeded"
            );
            // The loop can no longer re-arm its body.
            inst.dead_edges.insert(edge_id);
            plan.loop_limit_failures.push(target);
        } else {
            reset_loop_body(inst, &def, edge_id);
            inst.set_status(&target, NodeStatus::Ready);
            plan.commands.push(arm_node(inst, &target, config));
        }
    }

    plan
}

/// Apply a node failure per the node's failure policy.
pub(super) fn plan_failure(
    inst: &mut ExecutionInstance,
    node: &NodeId,
    cause: &FailureCause,
    config: &CoordinatorConfig,
) -> FailurePlan {
    if inst.is_terminal() {
        return FailurePlan::Stale;
    }
    // The failure may have been outrun by an accepted completion (timeout
    // sweep vs. in-flight event); only act when the node is still in the
    // state the cause was observed against.
    let status = inst.status(node);
    let applicable = match cause {
        FailureCause::EvaluationFailed => status == NodeStatus::Completed,
        FailureCause::TaskFailed => status == NodeStatus::Failed,
        FailureCause::DeliveryExhausted | FailureCause::DispatchTimeout => {
            status == NodeStatus::Dispatched
        }
        FailureCause::LoopLimitExceeded => true,
    };
    if !applicable {
        tracing::debug!(instance = %inst.id, node = %node, %cause, ?status, "failure no longer applicable");
        return FailurePlan::Stale;
    }
    inst.in_flight.remove(node);

    let policy = inst.definition.failure_policy(node);
    let retryable = !matches!(cause, FailureCause::LoopLimitExceeded);
    if retryable && let FailurePolicy::RetryNode { max_attempts } = policy {
        let attempts = inst.attempts.get(node).copied().unwrap_or(0);
        if attempts < max_attempts {
            tracing::info!(
                instance = %inst.id,
                node = %node,
                %cause,
                attempt = attempts + 1,
                max_attempts,
                "re-dispatching failed node"
            );
            inst.set_status(node, NodeStatus::Ready);
            return FailurePlan::Retry(arm_node(inst, node, config));
        }
    }

    inst.set_status(node, NodeStatus::Failed);
    inst.note_failure(cause.clone());
    let def = inst.definition.clone();
    for &edge_id in def.outgoing_edges(node) {
        inst.dead_edges.insert(edge_id);
    }

    match policy {
        FailurePolicy::AbortInstance => {
            let ids: Vec<NodeId> = def.node_ids().cloned().collect();
            for n in ids {
                if !inst.status(&n).is_settled() {
                    inst.set_status(&n, NodeStatus::Skipped);
                }
            }
            inst.in_flight.clear();
            // Abort escalates immediately; the outcome does not wait for the
            // terminal-node rule.
            inst.terminal = Some(TerminalState {
                outcome: InstanceOutcome::Failure,
                cause: Some(cause.clone()),
                at: Utc::now(),
            });
        }
        // Exhausted RetryNode degrades to skip-downstream propagation.
        FailurePolicy::SkipDownstream | FailurePolicy::RetryNode { .. } => {
            propagate_skips(inst, &def);
        }
    }
    FailurePlan::Settled
}

/// Mint and arm dispatch commands for every READY node (instance start and
/// recovery paths). Deterministic order for reproducible dispatch logs.
pub(super) fn arm_ready_nodes(
    inst: &mut ExecutionInstance,
    config: &CoordinatorConfig,
) -> Vec<DispatchCommand> {
    let mut ready: Vec<NodeId> = inst
        .statuses
        .iter()
        .filter(|(_, status)| **status == NodeStatus::Ready)
        .map(|(node, _)| node.clone())
        .collect();
    ready.sort();
    ready
        .into_iter()
        .map(|node| arm_node(inst, &node, config))
        .collect()
}

/// READY → DISPATCHED: mint a fresh idempotency key from the sequence
/// counter, record the in-flight deadline, and build the command.
pub(super) fn arm_node(
    inst: &mut ExecutionInstance,
    node: &NodeId,
    config: &CoordinatorConfig,
) -> DispatchCommand {
    let def = inst.definition.clone();
    let spec = def.node(node).expect("armed node exists in definition");
    let key = inst.mint_key(node);
    let now = Utc::now();
    let timeout = spec.dispatch_timeout.unwrap_or(config.dispatch_timeout);
    // An unrepresentable timeout degrades to one year, i.e. effectively "no
    // timeout" at workflow scale.
    let deadline = now
        + ChronoDuration::from_std(timeout)
            .unwrap_or_else(|_| ChronoDuration::days(365));
    *inst.attempts.entry(node.clone()).or_insert(0) += 1;
    inst.set_status(node, NodeStatus::Dispatched);
    inst.in_flight.insert(
        node.clone(),
        InFlightDispatch {
            key: key.clone(),
            dispatched_at: now,
            deadline,
        },
    );
    DispatchCommand {
        instance_id: inst.id.clone(),
        node_id: node.clone(),
        task: spec.task.clone(),
        idempotency_key: key,
        context: inst.vars.clone(),
    }
}

/// Settle the terminal state once every node is settled. Returns the newly
/// set terminal state, or `None` if the instance is still running (or was
/// already terminal).
pub(super) fn settle_terminal(inst: &mut ExecutionInstance) -> Option<TerminalState> {
    if inst.terminal.is_some() || !inst.all_settled() {
        return None;
    }
    let outcome = inst.derive_outcome();
    let cause = if outcome == InstanceOutcome::Failure {
        inst.first_failure.clone()
    } else {
        None
    };
    let terminal = TerminalState {
        outcome,
        cause,
        at: Utc::now(),
    };
    inst.terminal = Some(terminal.clone());
    Some(terminal)
}

/// Cancel: every non-settled node SKIPPED, outcome CANCELLED. Returns
/// `false` if the instance was already terminal.
pub(super) fn cancel_instance(inst: &mut ExecutionInstance) -> bool {
    if inst.terminal.is_some() {
        return false;
    }
    let ids: Vec<NodeId> = inst.definition.node_ids().cloned().collect();
    for node in ids {
        if !inst.status(&node).is_settled() {
            inst.set_status(&node, NodeStatus::Skipped);
        }
    }
    inst.in_flight.clear();
    inst.terminal = Some(TerminalState {
        outcome: InstanceOutcome::Cancelled,
        cause: None,
        at: Utc::now(),
    });
    true
}

/// Fan-in satisfaction against the authoritative fired-edge accounting.
fn fan_in_satisfied(
    inst: &ExecutionInstance,
    def: &WorkflowDefinition,
    node: &NodeId,
) -> bool {
    match def.fan_in_policy(node) {
        FanInPolicy::All => def
            .non_loop_incoming(node)
            .all(|e| inst.fired_edges.contains(&e)),
        FanInPolicy::Any => def
            .non_loop_incoming(node)
            .any(|e| inst.fired_edges.contains(&e)),
        FanInPolicy::Count(n) => {
            def.non_loop_incoming(node)
                .filter(|e| inst.fired_edges.contains(e))
                .count()
                >= n as usize
        }
    }
}

/// A dead edge is only *permanently* dead if no live loop can re-arm its
/// source: an edge sourced inside the body of a loop that may still iterate
/// can fire again on the next pass.
fn edge_permanently_dead(
    inst: &ExecutionInstance,
    def: &WorkflowDefinition,
    edge_id: EdgeId,
) -> bool {
    if !inst.dead_edges.contains(&edge_id) {
        return false;
    }
    let source = &def.edge(edge_id).from;
    for (loop_id, body) in def.loop_bodies() {
        if !body.contains(source) || inst.dead_edges.contains(loop_id) {
            continue;
        }
        let loop_edge = def.edge(*loop_id);
        let bound = loop_edge.loop_back.expect("loop edge carries a bound");
        let used = inst.iterations.get(&loop_edge.to).copied().unwrap_or(0);
        if used < bound && inst.status(&loop_edge.to) != NodeStatus::Failed {
            return false;
        }
    }
    true
}

/// `true` once the node's fan-in can no longer be satisfied by any future
/// firing (enough incoming edges are permanently dead).
fn fan_in_unsatisfiable(
    inst: &ExecutionInstance,
    def: &WorkflowDefinition,
    node: &NodeId,
) -> bool {
    let total = def.non_loop_incoming(node).count();
    let dead = def
        .non_loop_incoming(node)
        .filter(|e| edge_permanently_dead(inst, def, *e))
        .count();
    let possible = total - dead;
    match def.fan_in_policy(node) {
        FanInPolicy::All => dead > 0,
        FanInPolicy::Any => total > 0 && possible == 0,
        FanInPolicy::Count(n) => possible < n as usize,
    }
}

/// Transitive skip propagation over now-dead paths.
///
/// Computed lazily on each transition that kills edges: a PENDING node whose
/// fan-in became unsatisfiable is SKIPPED, which kills its own outgoing
/// edges, until the frontier of dead paths stops growing. Nodes reachable
/// through some other live path are left alone.
fn propagate_skips(inst: &mut ExecutionInstance, def: &WorkflowDefinition) {
    loop {
        let mut changed = false;
        let ids: Vec<NodeId> = def.node_ids().cloned().collect();
        for node in ids {
            if inst.status(&node) == NodeStatus::Pending
                && fan_in_unsatisfiable(inst, def, &node)
            {
                tracing::debug!(instance = %inst.id, node = %node, "skipping unreachable node");
                inst.set_status(&node, NodeStatus::Skipped);
                for &edge_id in def.outgoing_edges(&node) {
                    inst.dead_edges.insert(edge_id);
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Reset the body of a firing loop-back edge so it can execute again.
///
/// The body is every node on a non-loop path from the loop target to the
/// loop source (both inclusive). Settled body nodes return to PENDING with a
/// fresh retry budget, and edge accounting for edges sourced inside the body
/// is cleared; edges entering the body from outside keep their fired marks
/// so outside fan-in stays satisfied. The target itself is re-armed by the
/// caller.
fn reset_loop_body(inst: &mut ExecutionInstance, def: &WorkflowDefinition, loop_edge: EdgeId) {
    let target = def.edge(loop_edge).to.clone();
    let body: FxHashSet<NodeId> = def
        .loop_body(loop_edge)
        .cloned()
        .unwrap_or_default();

    for edge_id in 0..def.edge_count() {
        let spec = def.edge(edge_id);
        if !spec.is_loop() && body.contains(&spec.from) {
            inst.fired_edges.remove(&edge_id);
            inst.dead_edges.remove(&edge_id);
        }
    }

    for node in &body {
        if node == &target {
            continue;
        }
        if inst.status(node).is_settled() {
            inst.set_status(node, NodeStatus::Pending);
            inst.attempts.remove(node);
        }
    }
    inst.attempts.remove(&target);
}
