use warploom::coordinator::Coordinator;
use warploom::types::{FailureCause, InstanceId, InstanceOutcome, NodeId, NodeStatus};

pub async fn assert_status(
    coordinator: &Coordinator,
    instance: &InstanceId,
    node: &str,
    expected: NodeStatus,
) {
    let report = coordinator.report(instance).await.expect("report available");
    let actual = report
        .statuses
        .get(&NodeId::from(node))
        .copied()
        .unwrap_or_else(|| panic!("node {node} missing from report"));
    assert_eq!(actual, expected, "status of node {node}");
}

pub async fn assert_running(coordinator: &Coordinator, instance: &InstanceId) {
    let report = coordinator.report(instance).await.expect("report available");
    assert_eq!(report.outcome, None, "expected instance still running");
}

pub async fn assert_outcome(
    coordinator: &Coordinator,
    instance: &InstanceId,
    expected: InstanceOutcome,
) {
    let report = coordinator.report(instance).await.expect("report available");
    assert_eq!(report.outcome, Some(expected), "instance outcome");
}

pub async fn assert_cause(
    coordinator: &Coordinator,
    instance: &InstanceId,
    expected: FailureCause,
) {
    let report = coordinator.report(instance).await.expect("report available");
    assert_eq!(report.cause, Some(expected), "instance failure cause");
}
