use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use warploom::checkpoint::Checkpointer;
use warploom::config::CoordinatorConfig;
use warploom::coordinator::Coordinator;
use warploom::evaluator::GuardEvaluator;
use warploom::gateway::{InMemoryTransport, Transport, wire};
use warploom::graph::WorkflowDefinition;
use warploom::message::{CompletionEvent, DispatchCommand};

use super::evaluators::KeyEvaluator;

/// Everything a coordinator test needs: the coordinator, the in-memory
/// transport (for failure injection and redelivery), and a subscription on
/// the workflow's dispatch channel so published commands can be observed.
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub transport: Arc<InMemoryTransport>,
    pub dispatches: flume::Receiver<Vec<u8>>,
    pub dispatch_channel: String,
    pub completion_channel: String,
}

/// Fast backoffs so retry paths do not slow the suite down.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_delivery_backoff(Duration::from_millis(1), Duration::from_millis(5))
        .with_evaluation_backoff(Duration::from_millis(1))
}

pub fn harness(definition: WorkflowDefinition) -> Harness {
    harness_with(definition, test_config(), Arc::new(KeyEvaluator), None)
}

pub fn harness_with(
    definition: WorkflowDefinition,
    config: CoordinatorConfig,
    evaluator: Arc<dyn GuardEvaluator>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
) -> Harness {
    let transport = Arc::new(InMemoryTransport::new());
    let workflow = definition.name().to_string();
    let mut coordinator = Coordinator::new(
        Arc::clone(&transport) as Arc<dyn warploom::gateway::Transport>,
        evaluator,
        config,
    );
    if let Some(checkpointer) = checkpointer {
        coordinator = coordinator.with_checkpointer(checkpointer);
    }
    let coordinator = Arc::new(coordinator);
    coordinator.register_definition(definition);

    let gateway = coordinator.gateway(&workflow).expect("gateway registered");
    let dispatches = transport.subscribe(gateway.dispatch_channel());
    let dispatch_channel = gateway.dispatch_channel().to_string();
    let completion_channel = gateway.completion_channel().to_string();

    Harness {
        coordinator,
        transport,
        dispatches,
        dispatch_channel,
        completion_channel,
    }
}

impl Harness {
    /// Decode every dispatch command published since the last call.
    pub fn drain_dispatches(&self) -> Vec<DispatchCommand> {
        self.dispatches
            .try_iter()
            .map(|payload| wire::decode_command(&payload).expect("decodable dispatch"))
            .collect()
    }

    /// The single command expected to be pending; panics otherwise.
    pub fn expect_one_dispatch(&self) -> DispatchCommand {
        let mut commands = self.drain_dispatches();
        assert_eq!(
            commands.len(),
            1,
            "expected exactly one dispatch, got {:?}",
            commands.iter().map(|c| c.node_id.clone()).collect::<Vec<_>>()
        );
        commands.remove(0)
    }

    /// Feed a SUCCESS completion for `command` straight into the
    /// coordinator, bypassing the transport (deterministic path).
    pub async fn complete(&self, command: &DispatchCommand) {
        self.complete_with(command, FxHashMap::default()).await;
    }

    pub async fn complete_with(
        &self,
        command: &DispatchCommand,
        delta: FxHashMap<String, Value>,
    ) {
        self.coordinator
            .handle_completion(CompletionEvent::success(command, delta))
            .await
            .expect("completion handled");
    }

    pub async fn fail(&self, command: &DispatchCommand) {
        self.coordinator
            .handle_completion(CompletionEvent::failure(command))
            .await
            .expect("completion handled");
    }
}

/// Shorthand for a single-entry context delta.
pub fn delta(key: &str, value: Value) -> FxHashMap<String, Value> {
    let mut map = FxHashMap::default();
    map.insert(key.to_string(), value);
    map
}
