use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use warploom::evaluator::{EvaluationError, GuardEvaluator};

/// Truthy-key evaluator: a guard expression is simply the name of a context
/// variable, live iff that variable is boolean `true`.
#[derive(Debug, Default)]
pub struct KeyEvaluator;

#[async_trait]
impl GuardEvaluator for KeyEvaluator {
    async fn evaluate(
        &self,
        expr: &str,
        context: &FxHashMap<String, Value>,
    ) -> Result<bool, EvaluationError> {
        Ok(matches!(context.get(expr), Some(Value::Bool(true))))
    }
}

/// Evaluator whose first `failures` calls error, then defers to
/// [`KeyEvaluator`]. Exercises the transient-retry path of the adapter.
#[derive(Debug, Default)]
pub struct FlakyEvaluator {
    remaining: AtomicU32,
}

impl FlakyEvaluator {
    pub fn failing(failures: u32) -> Self {
        Self {
            remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl GuardEvaluator for FlakyEvaluator {
    async fn evaluate(
        &self,
        expr: &str,
        context: &FxHashMap<String, Value>,
    ) -> Result<bool, EvaluationError> {
        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(EvaluationError::Evaluator {
                message: "injected evaluator outage".to_string(),
            });
        }
        KeyEvaluator.evaluate(expr, context).await
    }
}
