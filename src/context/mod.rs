//! Per-instance execution state and the store that owns it.
//!
//! This module provides the mutable half of the system: one
//! [`ExecutionInstance`] per running workflow, owned by a [`ContextStore`]
//! that serializes all mutation of a given instance while letting unrelated
//! instances proceed fully in parallel.
//!
//! # Concurrency contract
//!
//! Every mutation goes through [`ContextStore::update`] (or the
//! [`ContextStore::apply_delta`] convenience built on it), which runs a
//! synchronous closure under that instance's async mutex. The closure cannot
//! await, so the per-instance lock is never held across calls into the
//! evaluator, the transport, or the checkpoint store; callers take a
//! snapshot, await, and re-enter.

pub mod instance;
pub mod store;

pub use instance::{
    ExecutionInstance, InFlightDispatch, InstanceReport, InstanceSnapshot, TerminalState,
};
pub use store::{ContextError, ContextStore};
