//! Execution - confirm, persist the plan, converge the fleet, report

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use converge::{
    Credential, ExecuteOptions, ExecutionOutcome, FailurePolicy, RetryConfig, RunPlan, RunReport,
    Transport, fleet,
};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifacts::{self, RunArtifacts};
use crate::progress::FleetProgress;

use super::differ::{collect_diffs, display_diff};

/// Options for a fleet run (`yes` skips the confirmation)
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Probe only; report what would change
    pub dry_run: bool,
    /// Skip confirmation prompts
    pub yes: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub failure_policy: FailurePolicy,
    pub barrier_wait: RetryConfig,
    /// Where to write the JSON run report
    pub report: Option<PathBuf>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            yes: false,
            verbose: false,
            quiet: false,
            failure_policy: FailurePolicy::default(),
            barrier_wait: RetryConfig::cluster_wait(),
            report: None,
        }
    }
}

impl ApplyOptions {
    fn engine_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            dry_run: self.dry_run,
            verbose: self.verbose,
            failure_policy: self.failure_policy,
            barrier_wait: self.barrier_wait.clone(),
        }
    }
}

/// Run the plan against the fleet.
///
/// Returns `None` when the operator declines.
pub fn execute(
    plan: &RunPlan,
    transport: &dyn Transport,
    credential: &Credential,
    opts: &ApplyOptions,
) -> Result<Option<RunReport>> {
    if plan.is_empty() {
        println!();
        println!("  {} Nothing declared", "✓".green());
        return Ok(Some(RunReport::default()));
    }

    println!();
    println!(
        "  {} {} declarations on {} nodes",
        "→".cyan(),
        plan.total_declarations(),
        plan.nodes.len()
    );

    if !opts.yes && !opts.dry_run && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(None);
    }

    let persisted = RunArtifacts::write(plan)?;
    info!("run {} plan written to {}", persisted.run_id, persisted.dir().display());
    for file in persisted.files() {
        if !artifacts::verify(file)? {
            bail!("plan file {} does not match its checksum", file.display());
        }
    }

    let report = converge_fleet(plan, transport, credential, opts)?;

    if opts.dry_run {
        for (node, diffs) in collect_diffs(&report, None) {
            display_diff(node, &diffs);
        }
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
    }

    print_summary(&report);

    if let Some(path) = &opts.report {
        write_report(&report, path)?;
        println!("  {} Report written to {}", "ℹ".blue(), path.display());
    }

    Ok(Some(report))
}

/// Probe every declaration without applying anything
pub fn probe(
    plan: &RunPlan,
    transport: &dyn Transport,
    credential: &Credential,
    opts: &ApplyOptions,
) -> Result<RunReport> {
    let opts = ApplyOptions {
        dry_run: true,
        ..opts.clone()
    };
    converge_fleet(plan, transport, credential, &opts)
}

fn converge_fleet(
    plan: &RunPlan,
    transport: &dyn Transport,
    credential: &Credential,
    opts: &ApplyOptions,
) -> Result<RunReport> {
    let progress = FleetProgress::new(opts.quiet, opts.verbose);
    let report = fleet::run(plan, transport, credential, &opts.engine_options(), &progress)?;
    Ok(report)
}

/// Write the run report as pretty JSON
pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Print every failure, then the totals
pub fn print_summary(report: &RunReport) {
    let summary = report.summary();

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!();
        for (node, result) in failures {
            let (symbol, detail) = match &result.outcome {
                ExecutionOutcome::Failed { error } if result.outcome.is_blocked() => {
                    ("⊘".yellow(), error.to_string())
                }
                ExecutionOutcome::Failed { error } => ("✗".red(), error.to_string()),
                other => ("?".dimmed(), other.label().to_string()),
            };
            println!(
                "  {} {}: {} {}",
                symbol,
                node.name.bold(),
                result.description,
                format!("({detail})").dimmed()
            );
        }
    }

    println!();
    println!(
        "  {} {} applied, {} unchanged, {} skipped, {} failed, {} blocked",
        if summary.is_success() {
            "✓".green()
        } else {
            "✗".red()
        },
        summary.applied.to_string().green(),
        summary.unchanged,
        summary.skipped,
        summary.failed.to_string().red(),
        summary.blocked.to_string().yellow()
    );
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Converge these nodes?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}
