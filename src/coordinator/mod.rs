//! The dispatch coordinator: the scheduler proper.
//!
//! A [`Coordinator`] turns a validated [`WorkflowDefinition`] plus a stream
//! of [`CompletionEvent`]s into a correctly ordered, fault tolerant sequence
//! of [`DispatchCommand`](crate::message::DispatchCommand)s:
//!
//! - consumes completion events (deduplicated by the gateway, re-checked
//!   here against the in-flight idempotency keys)
//! - updates the execution context and computes the next ready set per each
//!   node's fan-in policy
//! - consults the transition evaluator to decide which outgoing edges of a
//!   completed node are live, skipping dead paths transitively
//! - applies failure policies, loop bounds, dispatch timeouts, and
//!   cancellation
//! - detects terminal states and archives finished instances
//! - checkpoints after every accepted transition and recovers in-flight
//!   instances on startup
//!
//! # Locking discipline
//!
//! All state mutation happens in the synchronous planners of
//! [`transitions`], executed under the per-instance lock via
//! [`ContextStore::update`]. The lock is never held across an await:
//! evaluator calls, publishes, and checkpoint writes all happen between
//! lock acquisitions, and their results re-enter through a fresh plan.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warploom::config::CoordinatorConfig;
//! use warploom::coordinator::Coordinator;
//! use warploom::evaluator::{EvaluationError, GuardEvaluator};
//! use warploom::gateway::InMemoryTransport;
//! use warploom::graph::DefinitionBuilder;
//! # use async_trait::async_trait;
//! # struct AlwaysTrue;
//! # #[async_trait]
//! # impl GuardEvaluator for AlwaysTrue {
//! #     async fn evaluate(&self, _: &str, _: &rustc_hash::FxHashMap<String, serde_json::Value>)
//! #         -> Result<bool, EvaluationError> { Ok(true) }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let definition = DefinitionBuilder::new("greet")
//!     .add_node("hello", "print")
//!     .compile()?;
//!
//! let coordinator = Arc::new(Coordinator::new(
//!     Arc::new(InMemoryTransport::new()),
//!     Arc::new(AlwaysTrue),
//!     CoordinatorConfig::default(),
//! ));
//! coordinator.register_definition(definition);
//! coordinator.start();
//!
//! let instance = coordinator.start_instance("greet").await?;
//! let report = coordinator.report(&instance).await?;
//! println!("{:?}", report.statuses);
//! # Ok(())
//! # }
//! ```

mod transitions;

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::checkpoint::{CheckpointError, Checkpointer, InstanceCheckpoint};
use crate::config::CoordinatorConfig;
use crate::context::{ContextError, ContextStore, InstanceReport};
use crate::evaluator::{EdgeEvaluator, GuardEvaluator};
use crate::gateway::{DispatchGateway, GatewayError, Transport};
use crate::graph::WorkflowDefinition;
use crate::message::{CompletionEvent, DispatchCommand};
use crate::telemetry;
use crate::types::{FailureCause, InstanceId, NodeId, TaskOutcome};

use transitions::FailurePlan;

/// Errors surfaced by coordinator operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CoordinatorError {
    #[error("no definition registered for workflow: {workflow}")]
    #[diagnostic(
        code(warploom::coordinator::unknown_workflow),
        help("Call register_definition before starting instances.")
    )]
    UnknownWorkflow { workflow: String },

    #[error("unknown instance: {instance}")]
    #[diagnostic(code(warploom::coordinator::unknown_instance))]
    UnknownInstance { instance: InstanceId },

    #[error(transparent)]
    #[diagnostic(code(warploom::coordinator::context))]
    Context(#[from] ContextError),

    #[error(transparent)]
    #[diagnostic(code(warploom::coordinator::checkpoint))]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(code(warploom::coordinator::gateway))]
    Gateway(#[from] GatewayError),
}

/// Graph execution coordinator for any number of registered workflow types
/// and concurrently running instances.
pub struct Coordinator {
    store: Arc<ContextStore>,
    transport: Arc<dyn Transport>,
    evaluator: EdgeEvaluator,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: CoordinatorConfig,
    definitions: RwLock<FxHashMap<String, Arc<WorkflowDefinition>>>,
    gateways: RwLock<FxHashMap<String, Arc<DispatchGateway>>>,
    pumps: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Coordinator {
    /// Build a coordinator over the given transport and guard evaluator.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        evaluator: Arc<dyn GuardEvaluator>,
        config: CoordinatorConfig,
    ) -> Self {
        let edge_evaluator = EdgeEvaluator::new(
            evaluator,
            config.evaluation_retry_limit,
            config.evaluation_backoff,
        );
        Self {
            store: Arc::new(ContextStore::new()),
            transport,
            evaluator: edge_evaluator,
            checkpointer: None,
            config,
            definitions: RwLock::new(FxHashMap::default()),
            gateways: RwLock::new(FxHashMap::default()),
            pumps: Mutex::new(Vec::new()),
        }
    }

    /// Attach a checkpoint store; transitions are persisted after every
    /// accepted delta and [`recover`](Self::recover) becomes meaningful.
    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Register a workflow definition and wire up its dispatch gateway.
    ///
    /// Register every workflow type before calling [`start`](Self::start);
    /// instances can only be started (and recovered) for registered types.
    pub fn register_definition(&self, definition: WorkflowDefinition) -> Arc<WorkflowDefinition> {
        let definition = Arc::new(definition);
        let name = definition.name().to_string();
        let gateway = Arc::new(DispatchGateway::new(
            Arc::clone(&self.transport),
            &name,
            &self.config.channel_prefix,
            self.config.retry_policy(),
            self.config.dedup_capacity,
        ));
        self.definitions
            .write()
            .insert(name.clone(), Arc::clone(&definition));
        self.gateways.write().insert(name, gateway);
        definition
    }

    /// The registered definition for `workflow`, if any.
    #[must_use]
    pub fn definition(&self, workflow: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.read().get(workflow).cloned()
    }

    /// The gateway serving `workflow` (visible so tests and embedding code
    /// can reach the channel names).
    pub fn gateway(&self, workflow: &str) -> Result<Arc<DispatchGateway>, CoordinatorError> {
        self.gateways
            .read()
            .get(workflow)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownWorkflow {
                workflow: workflow.to_string(),
            })
    }

    /// Start the completion pumps: one background task per registered
    /// workflow type draining its gateway into
    /// [`handle_completion`](Self::handle_completion).
    pub fn start(self: &Arc<Self>) {
        let workflows: Vec<String> = self.gateways.read().keys().cloned().collect();
        for workflow in workflows {
            let Ok(gateway) = self.gateway(&workflow) else {
                continue;
            };
            gateway.start();
            let completions = gateway.completions();
            let coordinator = Arc::clone(self);
            let handle = tokio::spawn(async move {
                while let Ok(event) = completions.recv_async().await {
                    if let Err(e) = coordinator.handle_completion(event).await {
                        tracing::error!(error = %e, "completion handling failed");
                    }
                }
            });
            self.pumps.lock().push(handle);
        }
    }

    /// Stop the completion pumps and gateways.
    pub async fn shutdown(&self) {
        let gateways: Vec<Arc<DispatchGateway>> =
            self.gateways.read().values().cloned().collect();
        for gateway in gateways {
            gateway.stop().await;
        }
        for handle in self.pumps.lock().drain(..) {
            handle.abort();
        }
    }

    /// Start a fresh instance of `workflow` with an empty context.
    pub async fn start_instance(&self, workflow: &str) -> Result<InstanceId, CoordinatorError> {
        self.start_instance_with(workflow, FxHashMap::default())
            .await
    }

    /// Start a fresh instance seeded with initial context variables.
    ///
    /// All nodes initialize PENDING except the definition's start nodes,
    /// which arm READY and are dispatched before this returns.
    #[instrument(skip(self, vars), err)]
    pub async fn start_instance_with(
        &self,
        workflow: &str,
        vars: FxHashMap<String, Value>,
    ) -> Result<InstanceId, CoordinatorError> {
        let definition =
            self.definition(workflow)
                .ok_or_else(|| CoordinatorError::UnknownWorkflow {
                    workflow: workflow.to_string(),
                })?;
        let id = self.store.create_instance(definition);
        if !vars.is_empty() {
            self.store
                .update(&id, |inst| inst.vars.extend(vars))
                .await?;
        }
        tracing::info!(instance = %id, workflow, "instance created");
        // Persist the READY start set before dispatching so a crash in
        // between recovers into arming, not into limbo.
        self.maybe_checkpoint(&id).await;

        let commands = self
            .store
            .update(&id, |inst| {
                transitions::arm_ready_nodes(inst, &self.config)
            })
            .await?;
        self.dispatch_and_settle(&id, commands).await?;
        Ok(id)
    }

    /// Consume one completion event.
    ///
    /// Duplicates (same idempotency key), completions for cancelled or
    /// unknown instances, and echoes of superseded dispatches are discarded
    /// without side effect. An accepted SUCCESS completion merges its
    /// context deltas, evaluates the node's outgoing guards, promotes
    /// satisfied successors, and dispatches them; an accepted FAILURE enters
    /// the node's failure policy.
    #[instrument(
        skip(self, event),
        fields(instance = %event.instance_id, node = %event.node_id),
        err
    )]
    pub async fn handle_completion(&self, event: CompletionEvent) -> Result<(), CoordinatorError> {
        if self.store.is_archived(&event.instance_id) {
            tracing::debug!("completion for archived instance discarded");
            return Ok(());
        }

        let accepted = match self
            .store
            .update(&event.instance_id, |inst| {
                transitions::accept_completion(inst, &event)
            })
            .await
        {
            Ok(accepted) => accepted,
            Err(ContextError::UnknownInstance { .. } | ContextError::InstanceArchived { .. }) => {
                tracing::debug!("completion for unknown or archived instance discarded");
                return Ok(());
            }
        };
        let Some(accepted) = accepted else {
            return Ok(());
        };

        telemetry::record_completion(
            &event.instance_id,
            &event.node_id,
            accepted.outcome,
            accepted.dispatched_at,
        );

        match accepted.outcome {
            TaskOutcome::Failure => {
                self.fail_node(&event.instance_id, &event.node_id, FailureCause::TaskFailed)
                    .await
            }
            TaskOutcome::Success => {
                self.advance_after_success(&event.instance_id, &event.node_id)
                    .await
            }
        }
    }

    /// Cancel a running instance: all non-terminal nodes SKIPPED, outcome
    /// CANCELLED, in-flight completions discarded from now on. Idempotent
    /// for already-terminal instances.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, id: &InstanceId) -> Result<(), CoordinatorError> {
        match self
            .store
            .update(id, transitions::cancel_instance)
            .await
        {
            Ok(true) => {
                tracing::info!(instance = %id, "instance cancelled");
                self.maybe_checkpoint(id).await;
                self.store.archive(id).await?;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(ContextError::InstanceArchived { .. }) => Ok(()),
            Err(ContextError::UnknownInstance { .. }) => Err(CoordinatorError::UnknownInstance {
                instance: id.clone(),
            }),
        }
    }

    /// Sweep every live instance for DISPATCHED nodes past their deadline
    /// and run each through its failure policy as a delivery failure.
    /// Returns the (instance, node) pairs that were timed out.
    #[instrument(skip(self), err)]
    pub async fn check_dispatch_timeouts(
        &self,
    ) -> Result<Vec<(InstanceId, NodeId)>, CoordinatorError> {
        let now = chrono::Utc::now();
        let mut timed_out = Vec::new();
        for id in self.store.live_ids() {
            let expired: Vec<NodeId> = match self
                .store
                .update(&id, |inst| {
                    inst.in_flight
                        .iter()
                        .filter(|(_, dispatch)| dispatch.deadline <= now)
                        .map(|(node, _)| node.clone())
                        .collect()
                })
                .await
            {
                Ok(expired) => expired,
                // Raced a terminal transition; nothing to time out.
                Err(_) => continue,
            };
            for node in expired {
                tracing::warn!(instance = %id, node = %node, "dispatch timeout elapsed");
                self.fail_node(&id, &node, FailureCause::DispatchTimeout)
                    .await?;
                timed_out.push((id.clone(), node));
            }
        }
        Ok(timed_out)
    }

    /// Reload every non-terminal instance from the checkpoint store and
    /// resume it: READY-but-never-dispatched nodes are armed and published;
    /// DISPATCHED nodes are left in flight until their dispatch timeout
    /// elapses, so still-running commands are re-verified through
    /// redelivery rather than re-dispatched. Returns the number of resumed
    /// instances.
    #[instrument(skip(self), err)]
    pub async fn recover(&self) -> Result<usize, CoordinatorError> {
        let Some(checkpointer) = &self.checkpointer else {
            return Ok(0);
        };
        let checkpoints = checkpointer.list_non_terminal().await?;
        let mut resumed = 0usize;
        for checkpoint in checkpoints {
            let definition = self.definition(&checkpoint.workflow).ok_or_else(|| {
                CheckpointError::UnknownWorkflow {
                    workflow: checkpoint.workflow.clone(),
                }
            })?;
            let id = checkpoint.instance_id.clone();
            let in_flight = checkpoint.in_flight.len();
            self.store
                .insert_recovered(checkpoint.into_instance(definition));
            let commands = self
                .store
                .update(&id, |inst| {
                    transitions::arm_ready_nodes(inst, &self.config)
                })
                .await?;
            tracing::info!(
                instance = %id,
                re_armed = commands.len(),
                left_in_flight = in_flight,
                "instance recovered"
            );
            self.dispatch_and_settle(&id, commands).await?;
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Status summary of an instance, live or archived.
    pub async fn report(&self, id: &InstanceId) -> Result<InstanceReport, CoordinatorError> {
        self.store.report(id).await.map_err(|_| {
            CoordinatorError::UnknownInstance {
                instance: id.clone(),
            }
        })
    }

    /// The context store (read access for embedding code and tests).
    #[must_use]
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// SUCCESS path: evaluate outgoing guards (outside the lock), then apply
    /// the advance plan. Persistent evaluation failure forces the node
    /// FAILED with cause EVALUATION_FAILED rather than resolving to "no
    /// edges live".
    async fn advance_after_success(
        &self,
        id: &InstanceId,
        node: &NodeId,
    ) -> Result<(), CoordinatorError> {
        let (definition, vars) = match self
            .store
            .update(id, |inst| (inst.definition.clone(), inst.vars.clone()))
            .await
        {
            Ok(snapshot) => snapshot,
            // Cancelled between acceptance and evaluation; nothing to advance.
            Err(_) => return Ok(()),
        };

        let live = match self
            .evaluator
            .evaluate_edges(&definition, node, &vars)
            .await
        {
            Ok(live) => live,
            Err(e) => {
                tracing::warn!(instance = %id, node = %node, error = %e, "edge evaluation failed");
                return self
                    .fail_node(id, node, FailureCause::EvaluationFailed)
                    .await;
            }
        };

        let plan = match self
            .store
            .update(id, |inst| {
                transitions::plan_advance(inst, node, &live, &self.config)
            })
            .await
        {
            Ok(plan) => plan,
            Err(_) => return Ok(()),
        };

        for target in &plan.loop_limit_failures {
            self.fail_node(id, target, FailureCause::LoopLimitExceeded)
                .await?;
        }
        self.dispatch_and_settle(id, plan.commands).await
    }

    /// Run a node through its failure policy and publish any retry.
    async fn fail_node(
        &self,
        id: &InstanceId,
        node: &NodeId,
        cause: FailureCause,
    ) -> Result<(), CoordinatorError> {
        let plan = match self
            .store
            .update(id, |inst| {
                transitions::plan_failure(inst, node, &cause, &self.config)
            })
            .await
        {
            Ok(plan) => plan,
            // The instance reached terminal (or vanished) before the
            // failure could apply; nothing left to do.
            Err(_) => return Ok(()),
        };
        let commands = match plan {
            FailurePlan::Retry(command) => vec![command],
            FailurePlan::Settled | FailurePlan::Stale => Vec::new(),
        };
        self.dispatch_and_settle(id, commands).await
    }

    /// Publish a batch of dispatch commands, feeding delivery exhaustion
    /// back through the failure policy (which may mint further retries)
    /// until the batch drains, then settle terminal state and checkpoint.
    async fn dispatch_and_settle(
        &self,
        id: &InstanceId,
        mut commands: Vec<DispatchCommand>,
    ) -> Result<(), CoordinatorError> {
        while !commands.is_empty() {
            let workflow = match self
                .store
                .update(id, |inst| inst.definition.name().to_string())
                .await
            {
                Ok(workflow) => workflow,
                // Cancelled or archived mid-batch; drop the rest.
                Err(_) => return Ok(()),
            };
            let gateway = self.gateway(&workflow)?;

            let mut exhausted: Vec<NodeId> = Vec::new();
            for command in commands.drain(..) {
                telemetry::record_dispatch(id, &command.node_id);
                match gateway.publish_command(&command).await {
                    Ok(()) => {}
                    Err(GatewayError::Delivery {
                        attempts, message, ..
                    }) => {
                        tracing::warn!(
                            instance = %id,
                            node = %command.node_id,
                            attempts,
                            error = %message,
                            "dispatch delivery exhausted"
                        );
                        exhausted.push(command.node_id);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            for node in exhausted {
                let plan = match self
                    .store
                    .update(id, |inst| {
                        transitions::plan_failure(
                            inst,
                            &node,
                            &FailureCause::DeliveryExhausted,
                            &self.config,
                        )
                    })
                    .await
                {
                    Ok(plan) => plan,
                    Err(_) => continue,
                };
                if let FailurePlan::Retry(command) = plan {
                    commands.push(command);
                }
            }
        }
        self.settle_and_save(id).await
    }

    /// Settle terminal state once every node is settled, checkpoint, and
    /// archive. Also picks up instances made terminal directly by an
    /// abort so they are archived on the same pass.
    async fn settle_and_save(&self, id: &InstanceId) -> Result<(), CoordinatorError> {
        let terminal = match self
            .store
            .update(id, |inst| {
                transitions::settle_terminal(inst);
                inst.terminal.clone()
            })
            .await
        {
            Ok(t) => t,
            // Already archived by a racing path; nothing left to settle.
            Err(_) => None,
        };
        self.maybe_checkpoint(id).await;
        if let Some(terminal) = terminal {
            self.store.archive(id).await?;
            tracing::info!(
                instance = %id,
                outcome = %terminal.outcome,
                cause = terminal.cause.as_ref().map(ToString::to_string),
                "instance terminal"
            );
        }
        Ok(())
    }

    /// Best-effort checkpoint of the instance's current snapshot.
    async fn maybe_checkpoint(&self, id: &InstanceId) {
        let Some(checkpointer) = &self.checkpointer else {
            return;
        };
        match self.store.snapshot(id).await {
            Ok(snapshot) => {
                if let Err(e) = checkpointer
                    .save(InstanceCheckpoint::from_snapshot(&snapshot))
                    .await
                {
                    tracing::warn!(instance = %id, error = %e, "checkpoint save failed");
                }
            }
            Err(e) => {
                tracing::debug!(instance = %id, error = %e, "checkpoint skipped");
            }
        }
    }
}
