//! Graphviz DOT export of workflow definitions.
//!
//! Intended for debugging and documentation: edge labels carry guard
//! expressions and loop bounds so a rendered graph shows the transition
//! logic, not just the topology.

use std::fmt::Write as _;

use super::definition::WorkflowDefinition;

impl WorkflowDefinition {
    /// Render this definition as a Graphviz DOT digraph.
    ///
    /// Start nodes are doubly circled, terminal nodes shaded; guarded edges
    /// are labelled with their (resolved) expression and loop-back edges are
    /// dashed with their iteration bound.
    ///
    /// # Examples
    ///
    /// ```
    /// use warploom::graph::DefinitionBuilder;
    ///
    /// let def = DefinitionBuilder::new("tiny")
    ///     .add_node("a", "t")
    ///     .add_node("b", "t")
    ///     .add_guarded_edge("a", "b", "x > 1")
    ///     .compile()
    ///     .unwrap();
    /// let dot = def.to_dot();
    /// assert!(dot.starts_with("digraph \"tiny\""));
    /// assert!(dot.contains("label=\"x > 1\""));
    /// ```
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape(self.name()));
        let _ = writeln!(out, "  rankdir=LR;");

        let mut node_ids: Vec<_> = self.node_ids().collect();
        node_ids.sort();
        for id in node_ids {
            let spec = self.node(id).expect("listed node exists");
            let mut attrs = vec![format!(
                "label=\"{}\\n[{}]\"",
                escape(id.as_str()),
                escape(&spec.task)
            )];
            if self.start_nodes().contains(id) {
                attrs.push("shape=doublecircle".to_string());
            } else if self.terminal_nodes().contains(id) {
                attrs.push("style=filled, fillcolor=lightgrey".to_string());
            }
            let _ = writeln!(out, "  \"{}\" [{}];", escape(id.as_str()), attrs.join(", "));
        }

        for (edge_id, edge) in (0..self.edge_count()).map(|i| (i, self.edge(i))) {
            let mut attrs = Vec::new();
            if let Some(expr) = self.guard_expr(edge_id) {
                attrs.push(format!("label=\"{}\"", escape(expr)));
            }
            if let Some(max) = edge.loop_back {
                attrs.push(format!("style=dashed, taillabel=\"loop<={max}\""));
            }
            let rendered = if attrs.is_empty() {
                String::new()
            } else {
                format!(" [{}]", attrs.join(", "))
            };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\"{};",
                escape(edge.from.as_str()),
                escape(edge.to.as_str()),
                rendered
            );
        }

        out.push_str("}\n");
        out
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
