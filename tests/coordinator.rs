use serde_json::json;
use warploom::message::CompletionEvent;
use warploom::types::{InstanceOutcome, NodeStatus, TaskOutcome};

mod common;
use common::*;

#[tokio::test]
async fn linear_flow_dispatches_in_topological_order() {
    let h = harness(linear());
    let id = h.coordinator.start_instance("linear").await.unwrap();

    let a = h.expect_one_dispatch();
    assert_eq!(a.node_id, "a".into());
    assert_status(&h.coordinator, &id, "a", NodeStatus::Dispatched).await;
    assert_status(&h.coordinator, &id, "b", NodeStatus::Pending).await;

    h.complete(&a).await;
    let b = h.expect_one_dispatch();
    assert_eq!(b.node_id, "b".into());
    assert_status(&h.coordinator, &id, "a", NodeStatus::Completed).await;

    h.complete(&b).await;
    let c = h.expect_one_dispatch();
    assert_eq!(c.node_id, "c".into());

    assert_running(&h.coordinator, &id).await;
    h.complete(&c).await;

    assert_outcome(&h.coordinator, &id, InstanceOutcome::Success).await;
    assert_status(&h.coordinator, &id, "c", NodeStatus::Completed).await;
}

#[tokio::test]
async fn context_deltas_flow_into_later_dispatches() {
    let h = harness(linear());
    h.coordinator.start_instance("linear").await.unwrap();

    let a = h.expect_one_dispatch();
    assert!(a.context.is_empty());
    h.complete_with(&a, delta("rows", json!(42))).await;

    let b = h.expect_one_dispatch();
    assert_eq!(b.context.get("rows"), Some(&json!(42)));
}

/// Spec scenario: diamond with D fan-in ALL; completions arrive A, C, B.
/// D becomes ready only after B (the last satisfying delta) and is
/// dispatched exactly once.
#[tokio::test]
async fn diamond_fan_in_all_waits_for_last_predecessor() {
    let h = harness(diamond());
    let id = h.coordinator.start_instance("diamond").await.unwrap();

    let a = h.expect_one_dispatch();
    h.complete(&a).await;

    let mut fan_out = h.drain_dispatches();
    fan_out.sort_by(|x, y| x.node_id.cmp(&y.node_id));
    assert_eq!(fan_out.len(), 2);
    let b = fan_out[0].clone();
    let c = fan_out[1].clone();
    assert_eq!(b.node_id, "b".into());
    assert_eq!(c.node_id, "c".into());

    // C first: D must stay pending.
    h.complete(&c).await;
    assert!(h.drain_dispatches().is_empty(), "D dispatched before B completed");
    assert_status(&h.coordinator, &id, "d", NodeStatus::Pending).await;

    // B second: now D arms, exactly once.
    h.complete(&b).await;
    let d = h.expect_one_dispatch();
    assert_eq!(d.node_id, "d".into());

    h.complete(&d).await;
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Success).await;
}

#[tokio::test]
async fn fan_in_any_arms_on_first_predecessor() {
    let h = harness(diamond_any());
    let id = h.coordinator.start_instance("diamond-any").await.unwrap();

    let a = h.expect_one_dispatch();
    h.complete(&a).await;
    let mut fan_out = h.drain_dispatches();
    fan_out.sort_by(|x, y| x.node_id.cmp(&y.node_id));
    let b = fan_out[0].clone();
    let c = fan_out[1].clone();

    // First completion arms D immediately, regardless of arrival order.
    h.complete(&c).await;
    let d = h.expect_one_dispatch();
    assert_eq!(d.node_id, "d".into());

    // The remaining predecessor completes later; D must not re-arm.
    h.complete(&b).await;
    assert!(h.drain_dispatches().is_empty(), "D dispatched twice");

    h.complete(&d).await;
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Success).await;
    assert_status(&h.coordinator, &id, "b", NodeStatus::Completed).await;
}

#[tokio::test]
async fn duplicate_completion_events_have_no_effect() {
    let h = harness(diamond());
    let id = h.coordinator.start_instance("diamond").await.unwrap();

    let a = h.expect_one_dispatch();
    let event = CompletionEvent::success(&a, delta("from_a", json!(true)));

    h.coordinator.handle_completion(event.clone()).await.unwrap();
    let first_wave = h.drain_dispatches();
    assert_eq!(first_wave.len(), 2);

    // Same idempotency key again: no transition, no promotion, no dispatch.
    h.coordinator.handle_completion(event.clone()).await.unwrap();
    h.coordinator.handle_completion(event).await.unwrap();
    assert!(h.drain_dispatches().is_empty(), "duplicate caused dispatches");
    assert_status(&h.coordinator, &id, "a", NodeStatus::Completed).await;
    assert_running(&h.coordinator, &id).await;
}

#[tokio::test]
async fn mismatched_idempotency_key_is_discarded() {
    let h = harness(linear());
    let id = h.coordinator.start_instance("linear").await.unwrap();

    let a = h.expect_one_dispatch();
    let mut forged = a.clone();
    forged.idempotency_key = "someone-else:a:99".into();
    h.coordinator
        .handle_completion(CompletionEvent::success(&forged, Default::default()))
        .await
        .unwrap();

    assert_status(&h.coordinator, &id, "a", NodeStatus::Dispatched).await;
    assert!(h.drain_dispatches().is_empty());

    // The genuine completion still lands.
    h.complete(&a).await;
    assert_status(&h.coordinator, &id, "a", NodeStatus::Completed).await;
}

#[tokio::test]
async fn guarded_branch_skips_the_dead_path() {
    let h = harness(branch());
    let id = h.coordinator.start_instance("branch").await.unwrap();

    let gate = h.expect_one_dispatch();
    h.complete_with(&gate, delta("take_high", json!(true))).await;

    let high = h.expect_one_dispatch();
    assert_eq!(high.node_id, "high".into());
    assert_status(&h.coordinator, &id, "low", NodeStatus::Skipped).await;

    h.complete(&high).await;
    // Deselected branch does not spoil the outcome.
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Success).await;
}

#[tokio::test]
async fn branch_with_no_live_edges_skips_everything_downstream() {
    let h = harness(branch());
    let id = h.coordinator.start_instance("branch").await.unwrap();

    let gate = h.expect_one_dispatch();
    // Neither guard true: both branches dead.
    h.complete(&gate).await;

    assert!(h.drain_dispatches().is_empty());
    assert_status(&h.coordinator, &id, "high", NodeStatus::Skipped).await;
    assert_status(&h.coordinator, &id, "low", NodeStatus::Skipped).await;
    // No terminal node completed and nothing failed: the instance ends,
    // unsuccessfully.
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Failure).await;
}

#[tokio::test]
async fn cancel_skips_remaining_nodes_and_discards_late_completions() {
    let h = harness(diamond());
    let id = h.coordinator.start_instance("diamond").await.unwrap();

    let a = h.expect_one_dispatch();
    h.complete(&a).await;
    let fan_out = h.drain_dispatches();
    assert_eq!(fan_out.len(), 2);

    h.coordinator.cancel(&id).await.unwrap();
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Cancelled).await;
    assert_status(&h.coordinator, &id, "a", NodeStatus::Completed).await;
    assert_status(&h.coordinator, &id, "b", NodeStatus::Skipped).await;
    assert_status(&h.coordinator, &id, "c", NodeStatus::Skipped).await;
    assert_status(&h.coordinator, &id, "d", NodeStatus::Skipped).await;

    // In-flight completions arriving after cancellation are stale.
    for command in fan_out {
        h.coordinator
            .handle_completion(CompletionEvent::success(&command, delta("late", json!(1))))
            .await
            .unwrap();
    }
    assert!(h.drain_dispatches().is_empty());
    assert_status(&h.coordinator, &id, "b", NodeStatus::Skipped).await;
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Cancelled).await;

    // Cancelling again is a no-op.
    h.coordinator.cancel(&id).await.unwrap();
}

#[tokio::test]
async fn instances_run_independently() {
    let h = harness(linear());
    let first = h.coordinator.start_instance("linear").await.unwrap();
    let second = h.coordinator.start_instance("linear").await.unwrap();
    assert_ne!(first, second);

    let mut dispatches = h.drain_dispatches();
    assert_eq!(dispatches.len(), 2);
    let of_first = dispatches
        .iter()
        .position(|c| c.instance_id == first)
        .expect("dispatch for first instance");
    let a_first = dispatches.remove(of_first);

    h.complete(&a_first).await;
    assert_status(&h.coordinator, &first, "a", NodeStatus::Completed).await;
    assert_status(&h.coordinator, &second, "a", NodeStatus::Dispatched).await;
}

#[tokio::test]
async fn worker_reported_failure_uses_task_outcome() {
    let h = harness(linear());
    let id = h.coordinator.start_instance("linear").await.unwrap();
    let a = h.expect_one_dispatch();

    let event = CompletionEvent {
        outcome: TaskOutcome::Failure,
        ..CompletionEvent::success(&a, Default::default())
    };
    h.coordinator.handle_completion(event).await.unwrap();

    assert_status(&h.coordinator, &id, "a", NodeStatus::Failed).await;
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Failure).await;
}
