use warploom::graph::{DefinitionBuilder, WorkflowDefinition};
use warploom::types::{FailurePolicy, FanInPolicy};

/// `a -> b -> c`.
pub fn linear() -> WorkflowDefinition {
    DefinitionBuilder::new("linear")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_node("c", "step")
        .add_edge("a", "b")
        .add_edge("b", "c")
        .compile()
        .expect("linear definition compiles")
}

/// The spec's diamond: `a -> {b, c} -> d`, `d` fan-in ALL.
pub fn diamond() -> WorkflowDefinition {
    DefinitionBuilder::new("diamond")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_node("c", "step")
        .add_node_with("d", "step", FanInPolicy::All, FailurePolicy::AbortInstance)
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .compile()
        .expect("diamond definition compiles")
}

/// Diamond with `d` fan-in ANY instead of ALL.
pub fn diamond_any() -> WorkflowDefinition {
    DefinitionBuilder::new("diamond-any")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_node("c", "step")
        .add_node_with("d", "step", FanInPolicy::Any, FailurePolicy::AbortInstance)
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .compile()
        .expect("diamond-any definition compiles")
}

/// Guarded two-way branch: `gate -> high` iff `take_high`, `gate -> low`
/// iff `take_low`. Both branch heads are terminal nodes.
pub fn branch() -> WorkflowDefinition {
    DefinitionBuilder::new("branch")
        .add_node("gate", "route")
        .add_node("high", "step")
        .add_node("low", "step")
        .add_guarded_edge("gate", "high", "take_high")
        .add_guarded_edge("gate", "low", "take_low")
        .compile()
        .expect("branch definition compiles")
}

/// `seed -> work -> check`; `check` loops back to `work` (guard `again`,
/// max `bound` iterations) or exits to `done` (guard `finished`).
pub fn looped(bound: u32) -> WorkflowDefinition {
    DefinitionBuilder::new("looped")
        .add_node("seed", "step")
        .add_node("work", "step")
        .add_node("check", "step")
        .add_node("done", "step")
        .add_edge("seed", "work")
        .add_edge("work", "check")
        .add_guarded_loop_edge("check", "work", "again", bound)
        .add_guarded_edge("check", "done", "finished")
        .compile()
        .expect("looped definition compiles")
}

/// `a -> b -> c` with a configurable failure policy on `b`.
pub fn linear_with_policy(policy: FailurePolicy) -> WorkflowDefinition {
    DefinitionBuilder::new("linear-policy")
        .add_node("a", "step")
        .add_node_with("b", "step", FanInPolicy::All, policy)
        .add_node("c", "step")
        .add_edge("a", "b")
        .add_edge("b", "c")
        .compile()
        .expect("linear-policy definition compiles")
}
