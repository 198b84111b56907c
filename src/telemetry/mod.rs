//! Telemetry: dispatch-interval events and human-readable report rendering.
//!
//! Emission is fire-and-forget through `tracing` under the
//! `warploom::telemetry` target — never blocking, never load-bearing. The
//! formatter half renders [`InstanceReport`]s as plain text with optional
//! ANSI color for terminals.

use std::io::IsTerminal;

use chrono::{DateTime, Utc};

use crate::context::InstanceReport;
use crate::types::{InstanceId, NodeId, TaskOutcome};

pub const TELEMETRY_TARGET: &str = "warploom::telemetry";

const STATUS_COLOR: &str = "\x1b[32m"; // green
const LINE_COLOR: &str = "\x1b[35m"; // magenta
const RESET_COLOR: &str = "\x1b[0m";

/// Record the start of a node's dispatch-to-completion interval.
pub fn record_dispatch(instance: &InstanceId, node: &NodeId) {
    tracing::info!(
        target: TELEMETRY_TARGET,
        instance = %instance,
        node = %node,
        "node dispatched"
    );
}

/// Record the end of a node's dispatch-to-completion interval.
pub fn record_completion(
    instance: &InstanceId,
    node: &NodeId,
    outcome: TaskOutcome,
    dispatched_at: DateTime<Utc>,
) {
    let elapsed_ms = (Utc::now() - dispatched_at).num_milliseconds().max(0);
    tracing::info!(
        target: TELEMETRY_TARGET,
        instance = %instance,
        node = %node,
        outcome = ?outcome,
        elapsed_ms,
        "node completed"
    );
}

/// Formatter color mode for report output.
///
/// - [`FormatterMode::Auto`]: detects TTY capability via `stderr.is_terminal()`
/// - [`FormatterMode::Colored`]: always includes color codes
/// - [`FormatterMode::Plain`]: never includes color codes (logs/files)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Plain text formatter for instance reports with optional ANSI color.
pub struct ReportFormatter {
    mode: FormatterMode,
}

impl ReportFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    #[must_use]
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    /// Render a report as one line per node plus a header and outcome line.
    #[must_use]
    pub fn render(&self, report: &InstanceReport) -> String {
        let color = self.mode.is_colored();
        let mut lines = Vec::new();

        lines.push(format!(
            "instance {} [{}] created {}",
            report.id,
            report.workflow,
            report.created_at.to_rfc3339()
        ));

        let mut nodes: Vec<_> = report.statuses.iter().collect();
        nodes.sort_by(|a, b| a.0.cmp(b.0));
        for (node, status) in nodes {
            if color {
                lines.push(format!(
                    "  {node}: {STATUS_COLOR}{status}{RESET_COLOR}"
                ));
            } else {
                lines.push(format!("  {node}: {status}"));
            }
        }

        let outcome_line = match (&report.outcome, &report.cause) {
            (Some(outcome), Some(cause)) => format!("outcome: {outcome} ({cause})"),
            (Some(outcome), None) => format!("outcome: {outcome}"),
            (None, _) => "outcome: (running)".to_string(),
        };
        if color {
            lines.push(format!("{LINE_COLOR}{outcome_line}{RESET_COLOR}"));
        } else {
            lines.push(outcome_line);
        }

        lines.join("\n")
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a `tracing` subscriber honoring `RUST_LOG` (dev/test helper).
/// Repeated calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
