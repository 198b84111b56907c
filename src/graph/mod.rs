//! Workflow graph model: definition building, validation, and read access.
//!
//! A [`WorkflowDefinition`] is the immutable, validated shape of a workflow:
//! nodes with fan-in and failure policies, directed edges with optional guard
//! expressions, explicitly flagged loop-back edges, and derived start/terminal
//! sets. Definitions are built through [`DefinitionBuilder`] (or loaded from a
//! serialized document via [`load_definition`]) and compiled exactly once;
//! after compilation they are read-only and safe to share across any number
//! of concurrently running instances behind an `Arc`.
//!
//! # Examples
//!
//! ```rust
//! use warploom::graph::DefinitionBuilder;
//! use warploom::types::FanInPolicy;
//!
//! let def = DefinitionBuilder::new("image-pipeline")
//!     .add_node("fetch", "http-fetch")
//!     .add_node("resize", "image-resize")
//!     .add_node_with("publish", "cdn-publish", FanInPolicy::All, Default::default())
//!     .add_edge("fetch", "resize")
//!     .add_guarded_edge("resize", "publish", "size_ok == true")
//!     .compile()
//!     .expect("valid definition");
//!
//! assert_eq!(def.start_nodes(), &["fetch".into()]);
//! assert_eq!(def.terminal_nodes(), &["publish".into()]);
//! ```

pub mod builder;
pub mod compilation;
pub mod definition;
pub mod dot;
pub mod edges;
pub mod loader;

pub use builder::DefinitionBuilder;
pub use compilation::ValidationError;
pub use definition::{NodeSpec, WorkflowDefinition};
pub use edges::{EdgeGuard, EdgeId, EdgeSpec};
pub use loader::load_definition;
