//! Transition evaluation: the guard-expression capability and its adapter.
//!
//! Guard expressions live on edges; the expression language itself is an
//! external concern. This module defines the single capability the
//! coordinator needs — [`GuardEvaluator::evaluate`] — and the
//! [`EdgeEvaluator`] adapter that turns "a node just completed" into the set
//! of live outgoing edges, with transient evaluator failures retried rather
//! than ever being silently resolved to "no edges live".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::graph::{EdgeId, WorkflowDefinition};
use crate::types::NodeId;

/// Failure of a guard evaluation.
///
/// Always treated as transient by the adapter: the call is retried up to the
/// configured limit, and only then surfaced to the coordinator, which fails
/// the node with cause `EVALUATION_FAILED`.
#[derive(Debug, Error, Diagnostic)]
pub enum EvaluationError {
    #[error("guard evaluation failed: {message}")]
    #[diagnostic(
        code(warploom::evaluator::failed),
        help("The predicate service rejected or could not evaluate the expression.")
    )]
    Evaluator { message: String },

    #[error("guard evaluation retries exhausted after {attempts} attempts: {message}")]
    #[diagnostic(code(warploom::evaluator::retries_exhausted))]
    RetriesExhausted { attempts: u32, message: String },
}

/// Capability trait for the external predicate-evaluation service.
///
/// Implementations must be pure with respect to the supplied context: the
/// same expression and context yield the same verdict, with no side effects
/// on the workflow state.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use rustc_hash::FxHashMap;
/// use serde_json::Value;
/// use warploom::evaluator::{EvaluationError, GuardEvaluator};
///
/// /// Truthy-variable evaluator: the expression names a context key.
/// struct KeyEvaluator;
///
/// #[async_trait]
/// impl GuardEvaluator for KeyEvaluator {
///     async fn evaluate(
///         &self,
///         expr: &str,
///         context: &FxHashMap<String, Value>,
///     ) -> Result<bool, EvaluationError> {
///         Ok(matches!(context.get(expr), Some(Value::Bool(true))))
///     }
/// }
/// ```
#[async_trait]
pub trait GuardEvaluator: Send + Sync {
    /// Evaluate `expr` against the context snapshot.
    async fn evaluate(
        &self,
        expr: &str,
        context: &FxHashMap<String, Value>,
    ) -> Result<bool, EvaluationError>;
}

/// Adapter from guard evaluation to edge liveness.
///
/// Holds the injected [`GuardEvaluator`] plus the retry policy for transient
/// evaluator failures. The concrete expression engine is swappable behind
/// the trait object.
#[derive(Clone)]
pub struct EdgeEvaluator {
    evaluator: Arc<dyn GuardEvaluator>,
    retry_limit: u32,
    retry_backoff: Duration,
}

impl EdgeEvaluator {
    #[must_use]
    pub fn new(evaluator: Arc<dyn GuardEvaluator>, retry_limit: u32, retry_backoff: Duration) -> Self {
        Self {
            evaluator,
            retry_limit,
            retry_backoff,
        }
    }

    /// Compute the live outgoing edges of `node` against `context`.
    ///
    /// Unguarded edges are always live. A guarded edge is live iff its
    /// resolved expression evaluates to `true`. Evaluator failures are
    /// retried (`retry_limit` attempts with a fixed backoff between them);
    /// exhaustion returns the last error so the caller can apply the node's
    /// failure policy — a persistent failure is never folded into an empty
    /// live set.
    pub async fn evaluate_edges(
        &self,
        definition: &WorkflowDefinition,
        node: &NodeId,
        context: &FxHashMap<String, Value>,
    ) -> Result<Vec<EdgeId>, EvaluationError> {
        let mut live = Vec::new();
        for edge_id in definition.outgoing_edges(node) {
            match definition.guard_expr(*edge_id) {
                None => live.push(*edge_id),
                Some(expr) => {
                    if self.evaluate_with_retry(expr, context).await? {
                        live.push(*edge_id);
                    }
                }
            }
        }
        Ok(live)
    }

    async fn evaluate_with_retry(
        &self,
        expr: &str,
        context: &FxHashMap<String, Value>,
    ) -> Result<bool, EvaluationError> {
        let attempts = self.retry_limit.max(1);
        let mut last_message = String::new();
        for attempt in 1..=attempts {
            match self.evaluator.evaluate(expr, context).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) => {
                    last_message = e.to_string();
                    tracing::warn!(
                        attempt,
                        attempts,
                        expr,
                        error = %last_message,
                        "guard evaluation failed; retrying"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }
        Err(EvaluationError::RetriesExhausted {
            attempts,
            message: last_message,
        })
    }
}
