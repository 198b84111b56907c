#[macro_use]
extern crate proptest;

use proptest::prelude::{Strategy, prop};
use warploom::graph::{DefinitionBuilder, ValidationError};
use warploom::types::NodeId;

// Generators shared by the definition-validation properties

/// Generate valid node names: a letter followed by 0..12 of [A-Za-z0-9_].
fn node_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,12}").unwrap()
}

/// Distinct node names, at least `min` of them.
fn names_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(node_name_strategy(), min..max).prop_map(|mut names| {
        names.sort();
        names.dedup();
        names
    })
}

proptest! {
    /// Any linear chain compiles, with the first node as the only start and
    /// the last as the only terminal.
    #[test]
    fn prop_linear_chains_compile(names in names_strategy(2, 12)) {
        prop_assume!(names.len() >= 2);

        let mut builder = DefinitionBuilder::new("chain");
        for name in &names {
            builder = builder.add_node(name.as_str(), "step");
        }
        for pair in names.windows(2) {
            builder = builder.add_edge(pair[0].as_str(), pair[1].as_str());
        }
        let def = builder.compile().unwrap();

        prop_assert_eq!(def.start_nodes(), &[NodeId::from(names[0].as_str())]);
        prop_assert_eq!(
            def.terminal_nodes(),
            &[NodeId::from(names[names.len() - 1].as_str())]
        );
        prop_assert_eq!(def.edge_count(), names.len() - 1);
    }
}

proptest! {
    /// Forward-only random edge sets (i -> j with i < j) are DAGs: they
    /// compile whenever every node stays connected, and never report a
    /// cycle.
    #[test]
    fn prop_forward_edges_never_cycle(
        names in names_strategy(2, 10),
        edge_seed in prop::collection::vec((0usize..10, 0usize..10), 1..20),
    ) {
        prop_assume!(names.len() >= 2);

        let mut builder = DefinitionBuilder::new("dag");
        for name in &names {
            builder = builder.add_node(name.as_str(), "step");
        }
        // Spine keeps everything reachable; extra forward edges cannot
        // introduce a cycle.
        for pair in names.windows(2) {
            builder = builder.add_edge(pair[0].as_str(), pair[1].as_str());
        }
        for (a, b) in edge_seed {
            let i = a % names.len();
            let j = b % names.len();
            if i < j {
                builder = builder.add_edge(names[i].as_str(), names[j].as_str());
            }
        }

        let def = builder.compile().unwrap();
        prop_assert!(!def.start_nodes().is_empty());
        prop_assert!(!def.terminal_nodes().is_empty());
    }
}

proptest! {
    /// Adding one backward edge to a chain without flagging it as loop-back
    /// is always rejected, and flagging it (with a positive bound) is
    /// always accepted.
    #[test]
    fn prop_back_edges_require_loop_declaration(
        names in names_strategy(3, 10),
        from_seed in 1usize..10,
        to_seed in 0usize..10,
        bound in 1u32..5,
    ) {
        prop_assume!(names.len() >= 3);
        let from = 1 + from_seed % (names.len() - 1);
        let to = to_seed % from;

        let chain = |mut builder: DefinitionBuilder| {
            for name in &names {
                builder = builder.add_node(name.as_str(), "step");
            }
            for pair in names.windows(2) {
                builder = builder.add_edge(pair[0].as_str(), pair[1].as_str());
            }
            builder
        };

        // Undeclared: a structural cycle.
        let undeclared = chain(DefinitionBuilder::new("undeclared"))
            .add_edge(names[from].as_str(), names[to].as_str())
            .compile();
        let is_cycle_shaped = matches!(
            &undeclared,
            Err(ValidationError::UndeclaredCycle { .. }) | Err(ValidationError::NoStartNodes)
        );
        prop_assert!(is_cycle_shaped, "undeclared back edge compiled: {undeclared:?}");

        // Declared: the same edge as a bounded loop-back compiles.
        let declared = chain(DefinitionBuilder::new("declared"))
            .add_loop_edge(names[from].as_str(), names[to].as_str(), bound)
            .compile();
        prop_assert!(declared.is_ok(), "declared loop edge rejected: {declared:?}");
    }
}

proptest! {
    /// Every node in a compiled definition has a status seed: edges out of
    /// and into each node index back to that node.
    #[test]
    fn prop_edge_indexes_are_consistent(names in names_strategy(2, 10)) {
        prop_assume!(names.len() >= 2);

        let mut builder = DefinitionBuilder::new("indexed");
        for name in &names {
            builder = builder.add_node(name.as_str(), "step");
        }
        for pair in names.windows(2) {
            builder = builder.add_edge(pair[0].as_str(), pair[1].as_str());
        }
        let def = builder.compile().unwrap();

        for name in &names {
            let node = NodeId::from(name.as_str());
            for &edge_id in def.outgoing_edges(&node) {
                prop_assert_eq!(&def.edge(edge_id).from, &node);
            }
            for &edge_id in def.incoming_edges(&node) {
                prop_assert_eq!(&def.edge(edge_id).to, &node);
            }
        }
    }
}
