//! Loading workflow definitions from serialized documents.
//!
//! Definitions authored outside the process arrive as JSON documents; this
//! module deserializes them and runs them through the same compilation path
//! as builder-constructed definitions. Schema validation of the document is
//! assumed to have happened upstream; what is enforced here is structural
//! validity of the graph itself.
//!
//! # Document shape
//!
//! ```json
//! {
//!   "name": "image-pipeline",
//!   "guards": { "is_large": "payload.size > 1048576" },
//!   "nodes": [
//!     { "id": "fetch", "task": "http-fetch" },
//!     { "id": "publish", "task": "cdn-publish",
//!       "fan_in": "ALL",
//!       "failure_policy": { "RETRY_NODE": { "max_attempts": 3 } },
//!       "dispatch_timeout_secs": 120 }
//!   ],
//!   "edges": [
//!     { "from": "fetch", "to": "publish", "guard_ref": "is_large" },
//!     { "from": "publish", "to": "fetch", "loop_max": 2 }
//!   ]
//! }
//! ```

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use super::builder::DefinitionBuilder;
use super::compilation::ValidationError;
use super::definition::{NodeSpec, WorkflowDefinition};
use super::edges::{EdgeGuard, EdgeSpec};
use crate::types::{FailurePolicy, FanInPolicy};

#[derive(Debug, Deserialize)]
struct DefinitionDoc {
    name: String,
    #[serde(default)]
    guards: FxHashMap<String, String>,
    nodes: Vec<NodeDoc>,
    edges: Vec<EdgeDoc>,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    id: String,
    task: String,
    #[serde(default)]
    fan_in: FanInPolicy,
    #[serde(default)]
    failure_policy: FailurePolicy,
    #[serde(default)]
    dispatch_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EdgeDoc {
    from: String,
    to: String,
    #[serde(default)]
    guard: Option<String>,
    #[serde(default)]
    guard_ref: Option<String>,
    #[serde(default)]
    loop_max: Option<u32>,
}

/// Deserialize and compile a JSON workflow definition document.
///
/// Deserialization failures surface as [`ValidationError::Malformed`];
/// structural problems surface as the usual compilation errors with node and
/// edge references.
pub fn load_definition(serialized: &str) -> Result<WorkflowDefinition, ValidationError> {
    let doc: DefinitionDoc =
        serde_json::from_str(serialized).map_err(|e| ValidationError::Malformed {
            message: e.to_string(),
        })?;

    let mut builder = DefinitionBuilder::new(doc.name);
    for (name, expr) in doc.guards {
        builder = builder.add_guard(name, expr);
    }
    for node in doc.nodes {
        builder = builder.add_node_spec(NodeSpec {
            id: node.id.into(),
            task: node.task,
            fan_in: node.fan_in,
            failure_policy: node.failure_policy,
            dispatch_timeout: node.dispatch_timeout_secs.map(Duration::from_secs),
        });
    }
    for edge in doc.edges {
        let guard = match (edge.guard, edge.guard_ref) {
            (Some(expr), _) => Some(EdgeGuard::Expr(expr)),
            (None, Some(name)) => Some(EdgeGuard::Named(name)),
            (None, None) => None,
        };
        builder.edges.push(EdgeSpec {
            from: edge.from.into(),
            to: edge.to.into(),
            guard,
            loop_back: edge.loop_max,
        });
    }
    builder.compile()
}
