use warploom::graph::{DefinitionBuilder, ValidationError, load_definition};
use warploom::types::{FailurePolicy, FanInPolicy, NodeId};

mod common;
use common::*;

#[test]
fn derives_start_and_terminal_sets() {
    let def = diamond();
    assert_eq!(def.start_nodes(), &[NodeId::from("a")]);
    assert_eq!(def.terminal_nodes(), &[NodeId::from("d")]);
    assert_eq!(def.node_count(), 4);
    assert_eq!(def.edge_count(), 4);
}

#[test]
fn incoming_and_outgoing_indexes_match_edges() {
    let def = diamond();
    let out_a = def.outgoing_edges(&"a".into());
    assert_eq!(out_a.len(), 2);
    for &edge_id in out_a {
        assert_eq!(def.edge(edge_id).from, "a".into());
    }
    let in_d = def.incoming_edges(&"d".into());
    assert_eq!(in_d.len(), 2);
    assert_eq!(def.fan_in_policy(&"d".into()), FanInPolicy::All);
}

#[test]
fn rejects_empty_definition() {
    let err = DefinitionBuilder::new("empty").compile().unwrap_err();
    assert!(matches!(err, ValidationError::EmptyDefinition));
}

#[test]
fn rejects_duplicate_node() {
    let err = DefinitionBuilder::new("dup")
        .add_node("a", "step")
        .add_node("a", "step")
        .compile()
        .unwrap_err();
    assert!(matches!(err, ValidationError::DuplicateNode { node } if node == "a".into()));
}

#[test]
fn rejects_edge_to_unknown_node() {
    let err = DefinitionBuilder::new("unknown")
        .add_node("a", "step")
        .add_edge("a", "ghost")
        .compile()
        .unwrap_err();
    match err {
        ValidationError::UnknownNode { edge, node } => {
            assert_eq!(edge, "a->ghost");
            assert_eq!(node, "ghost".into());
        }
        other => panic!("expected UnknownNode, got {other:?}"),
    }
}

#[test]
fn rejects_undeclared_cycle() {
    let err = DefinitionBuilder::new("cycle")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_node("entry", "step")
        .add_edge("entry", "a")
        .add_edge("a", "b")
        .add_edge("b", "a")
        .compile()
        .unwrap_err();
    assert!(matches!(err, ValidationError::UndeclaredCycle { .. }));
}

#[test]
fn declared_loop_edge_is_not_a_cycle() {
    let def = looped(3);
    assert_eq!(def.start_nodes(), &[NodeId::from("seed")]);
    // `done` is the only node without outgoing non-loop edges.
    assert_eq!(def.terminal_nodes(), &[NodeId::from("done")]);
    // One loop body covering work..check.
    assert_eq!(def.loop_bodies().len(), 1);
    let (_, body) = &def.loop_bodies()[0];
    assert!(body.contains(&"work".into()));
    assert!(body.contains(&"check".into()));
    assert!(!body.contains(&"done".into()));
    assert!(!body.contains(&"seed".into()));
}

#[test]
fn rejects_zero_loop_bound() {
    let err = DefinitionBuilder::new("zero-loop")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_edge("a", "b")
        .add_loop_edge("b", "a", 0)
        .compile()
        .unwrap_err();
    assert!(matches!(err, ValidationError::ZeroLoopBound { .. }));
}

#[test]
fn rejects_fully_cyclic_graph_as_having_no_start() {
    let err = DefinitionBuilder::new("ring")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_edge("a", "b")
        .add_edge("b", "a")
        .compile()
        .unwrap_err();
    // Every node has incoming edges, so start derivation fails before the
    // cycle check even runs.
    assert!(matches!(err, ValidationError::NoStartNodes));
}

#[test]
fn rejects_unsatisfiable_count_fan_in() {
    let err = DefinitionBuilder::new("count")
        .add_node("a", "step")
        .add_node_with("b", "step", FanInPolicy::Count(3), FailurePolicy::default())
        .add_edge("a", "b")
        .compile()
        .unwrap_err();
    match err {
        ValidationError::UnsatisfiableFanIn {
            node,
            required,
            incoming,
        } => {
            assert_eq!(node, "b".into());
            assert_eq!(required, 3);
            assert_eq!(incoming, 1);
        }
        other => panic!("expected UnsatisfiableFanIn, got {other:?}"),
    }
}

#[test]
fn rejects_unknown_named_guard() {
    let err = DefinitionBuilder::new("guards")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_named_guarded_edge("a", "b", "missing")
        .compile()
        .unwrap_err();
    assert!(matches!(err, ValidationError::UnknownGuard { name, .. } if name == "missing"));
}

#[test]
fn named_guards_resolve_through_the_table() {
    let def = DefinitionBuilder::new("guards")
        .add_guard("is_ready", "ready == true")
        .add_node("a", "step")
        .add_node("b", "step")
        .add_named_guarded_edge("a", "b", "is_ready")
        .compile()
        .unwrap();
    let edge_id = def.outgoing_edges(&"a".into())[0];
    assert_eq!(def.guard_expr(edge_id), Some("ready == true"));
}

#[test]
fn load_definition_compiles_documents() {
    let doc = r#"{
        "name": "doc-flow",
        "guards": { "is_large": "size_exceeds_limit" },
        "nodes": [
            { "id": "scan", "task": "scan" },
            { "id": "split", "task": "split",
              "failure_policy": { "RETRY_NODE": { "max_attempts": 2 } },
              "dispatch_timeout_secs": 30 },
            { "id": "upload", "task": "upload", "fan_in": "ANY" }
        ],
        "edges": [
            { "from": "scan", "to": "split", "guard_ref": "is_large" },
            { "from": "scan", "to": "upload", "guard": "small_enough" },
            { "from": "split", "to": "upload" }
        ]
    }"#;
    let def = load_definition(doc).expect("document compiles");
    assert_eq!(def.name(), "doc-flow");
    assert_eq!(def.start_nodes(), &[NodeId::from("scan")]);
    assert_eq!(def.fan_in_policy(&"upload".into()), FanInPolicy::Any);
    assert_eq!(
        def.failure_policy(&"split".into()),
        FailurePolicy::RetryNode { max_attempts: 2 }
    );
    let split = def.node(&"split".into()).unwrap();
    assert_eq!(
        split.dispatch_timeout,
        Some(std::time::Duration::from_secs(30))
    );
}

#[test]
fn load_definition_rejects_malformed_documents() {
    let err = load_definition("{ not json").unwrap_err();
    assert!(matches!(err, ValidationError::Malformed { .. }));
}

#[test]
fn dot_export_labels_guards_and_loops() {
    let def = looped(2);
    let dot = def.to_dot();
    assert!(dot.starts_with("digraph \"looped\""));
    assert!(dot.contains("\"seed\" -> \"work\""));
    assert!(dot.contains("label=\"again\""));
    assert!(dot.contains("loop<=2"));
    assert!(dot.contains("shape=doublecircle"));
}
