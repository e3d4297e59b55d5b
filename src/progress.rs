//! Progress indicators for sqlfleet
//!
//! One bar per node under a shared `MultiProgress`, driven by the engine's
//! progress callbacks from every node's worker thread.

use colored::Colorize;
use converge::{ExecutionOutcome, ExecutionResult, NodeReport, ProgressCallback, ReconcileError};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::ui;

fn node_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:<14.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// A standalone spinner for short blocking steps
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Per-node progress bars for a fleet run
pub struct FleetProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
}

impl FleetProgress {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        let target = if quiet {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
            verbose,
        }
    }

    fn bar(&self, node: &str) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
    }

    /// Print a line above the bars without tearing them
    fn println(&self, line: &str) {
        self.multi.suspend(|| println!("{line}"));
    }
}

impl ProgressCallback for FleetProgress {
    fn on_node_start(&self, node: &converge::TargetNode, count: usize) {
        let pb = self.multi.add(ProgressBar::new(count as u64));
        pb.set_style(node_style());
        pb.set_prefix(node.name.clone());
        pb.enable_steady_tick(Duration::from_millis(120));
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.name.clone(), pb);
    }

    fn on_resource_start(&self, node: &str, _id: &str, description: &str) {
        if let Some(pb) = self.bar(node) {
            pb.set_message(description.to_string());
        }
    }

    fn on_retry(
        &self,
        node: &str,
        id: &str,
        attempt: u32,
        max_attempts: u32,
        error: &ReconcileError,
        delay: Duration,
    ) {
        if let Some(pb) = self.bar(node) {
            pb.set_message(format!(
                "{id} waiting {} ({attempt}/{max_attempts})",
                ui::format_duration(delay)
            ));
        }
        if self.verbose {
            self.println(&format!(
                "  {} {node}: {id} attempt {attempt}/{max_attempts}: {error}",
                "↻".yellow()
            ));
        }
    }

    fn on_resource_complete(&self, node: &str, result: &ExecutionResult) {
        if let Some(pb) = self.bar(node) {
            pb.inc(1);
        }
        match &result.outcome {
            ExecutionOutcome::Failed { error } => self.println(&format!(
                "  {} {node}: {} ({error})",
                "✗".red(),
                result.description
            )),
            ExecutionOutcome::Applied if self.verbose => self.println(&format!(
                "  {} {node}: {}",
                "✓".green(),
                result.description
            )),
            _ => {}
        }
    }

    fn on_node_complete(&self, report: &NodeReport) {
        let Some(pb) = self.bar(&report.node.name) else {
            return;
        };
        let summary = report.summary();
        if summary.is_success() {
            pb.finish_with_message(format!(
                "{} {} applied, {} unchanged",
                "✓".green(),
                summary.applied,
                summary.unchanged
            ));
        } else {
            pb.finish_with_message(format!(
                "{} {} failed, {} blocked",
                "✗".red(),
                summary.failed,
                summary.blocked
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{NodeRole, TargetNode};

    #[test]
    fn test_hidden_progress_tracks_nodes() {
        let progress = FleetProgress::new(true, false);
        let node = TargetNode::new("sql01", NodeRole::Primary);
        progress.on_node_start(&node, 2);

        let result = ExecutionResult {
            resource_id: "disk:E:".into(),
            resource_type: "disk".into(),
            description: "Disk E: (SQLData)".into(),
            outcome: ExecutionOutcome::Applied,
            attempts: 1,
            diff: None,
        };
        progress.on_resource_complete("sql01", &result);

        let pb = progress.bar("sql01").unwrap();
        assert_eq!(pb.position(), 1);

        let mut report = NodeReport::new(node);
        report.results.push(result);
        progress.on_node_complete(&report);
        assert!(pb.is_finished());
    }

    #[test]
    fn test_unknown_node_is_ignored() {
        let progress = FleetProgress::new(true, true);
        progress.on_resource_start("ghost", "disk:E:", "Disk E:");
        assert!(progress.bar("ghost").is_none());
    }
}
