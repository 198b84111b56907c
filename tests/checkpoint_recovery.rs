use std::sync::Arc;

use serde_json::json;
use warploom::checkpoint::{Checkpointer, InMemoryCheckpointer};
use warploom::types::{InstanceOutcome, NodeStatus};

mod common;
use common::*;

/// Drive a diamond to the midpoint: a completed, b completed, c still in
/// flight, d pending. Returns (harness, instance id, c's pending command).
async fn half_run_diamond(
    checkpointer: Arc<dyn Checkpointer>,
) -> (Harness, warploom::types::InstanceId, warploom::message::DispatchCommand) {
    let h = harness_with(
        diamond(),
        test_config(),
        Arc::new(KeyEvaluator),
        Some(checkpointer),
    );
    let id = h.coordinator.start_instance("diamond").await.unwrap();

    let a = h.expect_one_dispatch();
    h.complete_with(&a, delta("from_a", json!(true))).await;

    let mut fan_out = h.drain_dispatches();
    fan_out.sort_by(|x, y| x.node_id.cmp(&y.node_id));
    let b = fan_out[0].clone();
    let c = fan_out[1].clone();
    h.complete(&b).await;

    (h, id, c)
}

#[tokio::test]
async fn checkpoints_track_every_transition() {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let (_h, id, _c) = half_run_diamond(checkpointer.clone()).await;

    let stored = checkpointer
        .load_latest(&id)
        .await
        .unwrap()
        .expect("checkpoint persisted");
    assert_eq!(stored.workflow, "diamond");
    assert!(stored.terminal.is_none());
    assert_eq!(stored.statuses.get(&"a".into()), Some(&NodeStatus::Completed));
    assert_eq!(stored.statuses.get(&"b".into()), Some(&NodeStatus::Completed));
    assert_eq!(
        stored.statuses.get(&"c".into()),
        Some(&NodeStatus::Dispatched)
    );
    assert_eq!(stored.statuses.get(&"d".into()), Some(&NodeStatus::Pending));
    assert_eq!(stored.vars.get("from_a"), Some(&json!(true)));
    assert!(stored.in_flight.contains_key(&"c".into()));
}

#[tokio::test]
async fn recover_reproduces_statuses_and_does_not_re_dispatch_in_flight() {
    let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
    let (old, id, c) = half_run_diamond(checkpointer.clone()).await;
    let before = old.coordinator.report(&id).await.unwrap();
    drop(old);

    // A fresh coordinator (fresh transport) takes over.
    let recovered = harness_with(
        diamond(),
        test_config(),
        Arc::new(KeyEvaluator),
        Some(checkpointer),
    );
    let resumed = recovered.coordinator.recover().await.unwrap();
    assert_eq!(resumed, 1);

    // Identical READY/DISPATCHED/COMPLETED picture.
    let after = recovered.coordinator.report(&id).await.unwrap();
    assert_eq!(after.statuses, before.statuses);
    assert_eq!(after.outcome, None);

    // c was DISPATCHED before the restart: it must NOT be re-published
    // while its dispatch timeout has not elapsed.
    assert!(
        recovered.drain_dispatches().is_empty(),
        "re-dispatched a command still safely in flight"
    );

    // The still-in-flight completion arrives via redelivery and is accepted.
    recovered.complete(&c).await;
    let d = recovered.expect_one_dispatch();
    assert_eq!(d.node_id, "d".into());
    recovered.complete(&d).await;
    assert_outcome(&recovered.coordinator, &id, InstanceOutcome::Success).await;
}

#[tokio::test]
async fn recover_skips_terminal_instances() {
    let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
    let h = harness_with(
        linear(),
        test_config(),
        Arc::new(KeyEvaluator),
        Some(checkpointer.clone()),
    );
    let id = h.coordinator.start_instance("linear").await.unwrap();
    for _ in 0..3 {
        let cmd = h.expect_one_dispatch();
        h.complete(&cmd).await;
    }
    assert_outcome(&h.coordinator, &id, InstanceOutcome::Success).await;
    drop(h);

    let recovered = harness_with(
        linear(),
        test_config(),
        Arc::new(KeyEvaluator),
        Some(checkpointer),
    );
    assert_eq!(recovered.coordinator.recover().await.unwrap(), 0);
    assert!(recovered.drain_dispatches().is_empty());
}

#[tokio::test]
async fn recovery_honors_the_persisted_dispatch_deadline() {
    let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
    let (old, id, _c) = half_run_diamond(checkpointer.clone()).await;
    drop(old);

    // Even if the restarted coordinator is configured with a zero timeout,
    // the deadline persisted at dispatch time is what the sweep honors: the
    // in-flight node is left alone until that deadline elapses.
    let config = test_config().with_dispatch_timeout(std::time::Duration::ZERO);
    let recovered = harness_with(diamond(), config, Arc::new(KeyEvaluator), Some(checkpointer));
    recovered.coordinator.recover().await.unwrap();

    let timed_out = recovered.coordinator.check_dispatch_timeouts().await.unwrap();
    assert!(timed_out.is_empty());
    assert_status(&recovered.coordinator, &id, "c", NodeStatus::Dispatched).await;
}

#[tokio::test]
async fn cancelled_instances_checkpoint_as_terminal() {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let (h, id, _c) = half_run_diamond(checkpointer.clone()).await;

    h.coordinator.cancel(&id).await.unwrap();
    let stored = checkpointer
        .load_latest(&id)
        .await
        .unwrap()
        .expect("terminal checkpoint persisted");
    let terminal = stored.terminal.expect("terminal recorded");
    assert_eq!(terminal.outcome, InstanceOutcome::Cancelled);
    assert_eq!(
        checkpointer.list_non_terminal().await.unwrap().len(),
        0,
        "cancelled instance still listed as non-terminal"
    );
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use warploom::checkpoint::SqliteCheckpointer;

    #[tokio::test]
    async fn sqlite_round_trip_preserves_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("recovery.db");
        let url = format!("sqlite://{}", db_path.display());
        let _ = std::fs::File::create_new(&db_path);

        let checkpointer: Arc<dyn Checkpointer> =
            Arc::new(SqliteCheckpointer::connect(&url).await.unwrap());
        let (old, id, c) = half_run_diamond(checkpointer.clone()).await;
        let before = old.coordinator.report(&id).await.unwrap();
        drop(old);

        // Reconnect, as a restarted coordinator would.
        let checkpointer: Arc<dyn Checkpointer> =
            Arc::new(SqliteCheckpointer::connect(&url).await.unwrap());
        let non_terminal = checkpointer.list_non_terminal().await.unwrap();
        assert_eq!(non_terminal.len(), 1);
        assert_eq!(non_terminal[0].instance_id, id);

        let recovered = harness_with(
            diamond(),
            test_config(),
            Arc::new(KeyEvaluator),
            Some(checkpointer),
        );
        assert_eq!(recovered.coordinator.recover().await.unwrap(), 1);
        let after = recovered.coordinator.report(&id).await.unwrap();
        assert_eq!(after.statuses, before.statuses);

        recovered.complete(&c).await;
        let d = recovered.expect_one_dispatch();
        recovered.complete(&d).await;
        assert_outcome(&recovered.coordinator, &id, InstanceOutcome::Success).await;
    }

    #[tokio::test]
    async fn stale_seq_does_not_roll_back_a_newer_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("seq.db");
        let url = format!("sqlite://{}", db_path.display());
        let _ = std::fs::File::create_new(&db_path);
        let checkpointer = SqliteCheckpointer::connect(&url).await.unwrap();

        // Write seq 5, then attempt seq 2: the newer row must survive.
        let h = harness_with(
            diamond(),
            test_config(),
            Arc::new(KeyEvaluator),
            None,
        );
        let id = h.coordinator.start_instance("diamond").await.unwrap();
        let snapshot = h.coordinator.store().snapshot(&id).await.unwrap();
        let mut newer = warploom::checkpoint::InstanceCheckpoint::from_snapshot(&snapshot);
        newer.seq = 5;
        let mut stale = newer.clone();
        stale.seq = 2;
        stale.vars.insert("stale".to_string(), json!(true));

        checkpointer.save(newer.clone()).await.unwrap();
        checkpointer.save(stale).await.unwrap();

        let stored = checkpointer.load_latest(&id).await.unwrap().unwrap();
        assert_eq!(stored.seq, 5);
        assert!(!stored.vars.contains_key("stale"));
    }
}
