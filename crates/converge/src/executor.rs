//! Per-node executor - converges one node's declarations in order
//!
//! Each declaration moves through
//! `Pending -> Probing -> {Converged | Applying} -> {Applied | Failed}`.
//! A failed apply that is transient loops back to `Probing` until the
//! resource's retry budget is spent.

use crate::barrier::{BarrierBoard, BarrierWait};
use crate::context::{ApplyContext, ProgressCallback, Session};
use crate::diff::ResourceDiff;
use crate::error::{ReconcileError, Result};
use crate::planner::{NodePlan, ResourceDeclaration};
use crate::types::{
    ExecuteOptions, ExecutionOutcome, ExecutionResult, FailurePolicy, NodeReport, ResourceState,
};
use crate::wait::{RetryCallback, RetryConfig, with_retry};
use log::{debug, info, trace, warn};
use std::time::Duration;

/// Lifecycle phase of one declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Probing,
    Converged,
    Applying,
    Applied,
    Failed,
}

impl Phase {
    /// Whether `next` is a legal successor
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Pending, Probing)
                | (Pending, Failed)
                | (Probing, Probing)
                | (Probing, Converged)
                | (Probing, Applying)
                | (Probing, Applied)
                | (Probing, Failed)
                | (Applying, Probing)
                | (Applying, Applied)
                | (Applying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Converged | Phase::Applied | Phase::Failed)
    }
}

struct Tracker<'a> {
    node: &'a str,
    id: &'a str,
    phase: Phase,
}

impl<'a> Tracker<'a> {
    fn new(node: &'a str, id: &'a str) -> Self {
        Self {
            node,
            id,
            phase: Phase::Pending,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "{}: illegal transition {:?} -> {:?}",
            self.id,
            self.phase,
            next
        );
        trace!("{}: {} {:?} -> {:?}", self.node, self.id, self.phase, next);
        self.phase = next;
    }
}

/// Forwards retry notifications to the progress callback
struct RetryReporter<'a> {
    progress: &'a dyn ProgressCallback,
    node: &'a str,
    id: &'a str,
}

impl RetryCallback for RetryReporter<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ReconcileError, delay: Duration) {
        self.progress
            .on_retry(self.node, self.id, attempt, max_attempts, error, delay);
    }
}

/// What one probe/apply cycle concluded
enum Cycle {
    Converged { applied: bool },
    Diverged,
}

/// Converge every declaration of one node, in plan order.
pub fn execute_node(
    plan: &NodePlan,
    session: &dyn Session,
    opts: &ExecuteOptions,
    board: &BarrierBoard,
    progress: &dyn ProgressCallback,
) -> NodeReport {
    let node_name = plan.node.name.as_str();
    let mut report = NodeReport::new(plan.node.clone());
    let mut finished: Vec<Option<ExecutionOutcome>> = vec![None; plan.declarations.len()];
    let mut first_failure: Option<String> = None;

    progress.on_node_start(&plan.node, plan.declarations.len());
    info!(
        "{node_name}: converging {} declarations ({})",
        plan.declarations.len(),
        plan.node.role
    );

    for (id, decl) in plan.ordered() {
        let resource_id = decl.resource.id();
        progress.on_resource_start(node_name, &resource_id, &decl.resource.description());

        let blocked = blocking_reason(plan, decl, &finished, first_failure.as_deref(), opts)
            .or_else(|| await_barriers(decl, board, opts));

        let (outcome, attempts, diff) = match blocked {
            Some(reason) => {
                debug!("{node_name}: {resource_id} not attempted: {reason}");
                (
                    ExecutionOutcome::Failed {
                        error: ReconcileError::precondition(&resource_id, reason),
                    },
                    0,
                    None,
                )
            }
            None if decl.after_change && !dependency_changed(decl, &finished) => {
                debug!("{node_name}: {resource_id} skipped, no dependency changed");
                (ExecutionOutcome::Unchanged, 0, None)
            }
            None => reconcile(decl, plan, session, opts, progress),
        };

        if let Some(barrier) = &decl.publishes {
            match &outcome {
                ExecutionOutcome::Failed { error } => board.fail(barrier, error.to_string()),
                _ => board.reach(barrier),
            }
        }

        if let ExecutionOutcome::Failed { error } = &outcome {
            warn!("{node_name}: {resource_id} failed: {error}");
            first_failure.get_or_insert_with(|| decl.name.clone());
        }

        let result = ExecutionResult {
            resource_id,
            resource_type: decl.resource.resource_type().to_string(),
            description: decl.resource.description(),
            outcome: outcome.clone(),
            attempts,
            diff,
        };
        progress.on_resource_complete(node_name, &result);
        finished[id.index()] = Some(outcome);
        report.results.push(result);
    }

    progress.on_node_complete(&report);
    report
}

/// Report for a node whose session could not be opened.
///
/// Every declaration fails with the transport error, and every barrier the
/// node would have published is marked failed so other nodes stop waiting.
pub fn unreachable_node(
    plan: &NodePlan,
    error: &ReconcileError,
    board: &BarrierBoard,
    progress: &dyn ProgressCallback,
) -> NodeReport {
    warn!("{}: {error}", plan.node.name);
    progress.on_node_start(&plan.node, plan.declarations.len());

    let mut report = NodeReport::new(plan.node.clone());
    for (_, decl) in plan.ordered() {
        if let Some(barrier) = &decl.publishes {
            board.fail(barrier, error.to_string());
        }
        let result = ExecutionResult {
            resource_id: decl.resource.id(),
            resource_type: decl.resource.resource_type().to_string(),
            description: decl.resource.description(),
            outcome: ExecutionOutcome::Failed {
                error: error.clone(),
            },
            attempts: 0,
            diff: None,
        };
        progress.on_resource_complete(&plan.node.name, &result);
        report.results.push(result);
    }

    progress.on_node_complete(&report);
    report
}

fn blocking_reason(
    plan: &NodePlan,
    decl: &ResourceDeclaration,
    finished: &[Option<ExecutionOutcome>],
    first_failure: Option<&str>,
    opts: &ExecuteOptions,
) -> Option<String> {
    if opts.failure_policy == FailurePolicy::AbortNode
        && let Some(failed) = first_failure
    {
        return Some(format!("node stopped after {failed} failed"));
    }

    decl.depends_on.iter().find_map(|dep| {
        let dependency = plan.declaration(*dep);
        match &finished[dep.index()] {
            Some(outcome) if outcome.is_success() => None,
            Some(_) => Some(format!("dependency {} failed", dependency.name)),
            None => Some(format!("dependency {} was not attempted", dependency.name)),
        }
    })
}

/// Whether any dependency was applied, or would be in a dry run
fn dependency_changed(decl: &ResourceDeclaration, finished: &[Option<ExecutionOutcome>]) -> bool {
    decl.depends_on.iter().any(|dep| {
        matches!(
            finished[dep.index()],
            Some(ExecutionOutcome::Applied | ExecutionOutcome::Skipped { .. })
        )
    })
}

fn await_barriers(
    decl: &ResourceDeclaration,
    board: &BarrierBoard,
    opts: &ExecuteOptions,
) -> Option<String> {
    decl.awaits
        .iter()
        .find_map(|barrier| match board.wait(barrier, &opts.barrier_wait) {
            BarrierWait::Reached => None,
            BarrierWait::Failed { reason } => Some(format!("barrier {barrier} failed: {reason}")),
            BarrierWait::TimedOut { waited } => Some(format!(
                "barrier {barrier} not reached within {}s",
                waited.as_secs()
            )),
        })
}

/// Run the probe/apply state machine for one declaration.
fn reconcile(
    decl: &ResourceDeclaration,
    plan: &NodePlan,
    session: &dyn Session,
    opts: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> (ExecutionOutcome, u32, Option<ResourceDiff>) {
    let resource = decl.resource.as_ref();
    let resource_id = resource.id();
    let node_name = plan.node.name.as_str();
    let desired = resource.desired_state();
    let policy = if opts.dry_run {
        RetryConfig::no_retry()
    } else {
        resource.retry_policy()
    };

    let mut tracker = Tracker::new(node_name, &resource_id);
    let mut attempts = 0;
    let mut applied = false;
    let mut first_divergence: Option<ResourceState> = None;

    let reporter = RetryReporter {
        progress,
        node: node_name,
        id: &resource_id,
    };

    let cycle: Result<Cycle> = with_retry(&policy, Some(&reporter), |attempt| {
        attempts = attempt;
        tracker.advance(Phase::Probing);
        let current = resource.current_state(session)?;

        if resource.is_converged(&current, &desired) {
            tracker.advance(if applied {
                Phase::Applied
            } else {
                Phase::Converged
            });
            return Ok(Cycle::Converged { applied });
        }
        first_divergence.get_or_insert_with(|| current.clone());

        if opts.dry_run {
            return Ok(Cycle::Diverged);
        }

        tracker.advance(Phase::Applying);
        let mut ctx = ApplyContext::new(&plan.node, session, false, opts.verbose);
        resource.apply(&mut ctx)?;
        applied = true;

        let verified = resource.current_state(session)?;
        if resource.is_converged(&verified, &desired) {
            tracker.advance(Phase::Applied);
            Ok(Cycle::Converged { applied: true })
        } else {
            Err(ReconcileError::transient(format!(
                "{resource_id} has not converged yet ({verified})"
            )))
        }
    });

    let diff = first_divergence
        .as_ref()
        .and_then(|current| ResourceDiff::from_states(resource, current));

    let outcome = match cycle {
        Ok(Cycle::Converged { applied: false }) => ExecutionOutcome::Unchanged,
        Ok(Cycle::Converged { applied: true }) => ExecutionOutcome::Applied,
        Ok(Cycle::Diverged) => ExecutionOutcome::Skipped {
            reason: "dry run: would apply".to_string(),
        },
        Err(error) => {
            if tracker.phase != Phase::Failed {
                tracker.advance(Phase::Failed);
            }
            ExecutionOutcome::Failed { error }
        }
    };

    if matches!(outcome, ExecutionOutcome::Applied) {
        info!("{node_name}: {resource_id} applied after {attempts} attempt(s)");
    }

    (outcome, attempts, diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{NodeConfiguration, RunPlan};
    use crate::testing::{FakeResource, FakeSession};
    use crate::context::NoProgress;
    use crate::types::{NodeRole, TargetNode};

    fn plan_for(cfg: NodeConfiguration) -> NodePlan {
        let node = TargetNode::new("sql01", NodeRole::Primary);
        RunPlan::from_configurations(vec![(node, cfg)])
            .unwrap()
            .nodes
            .remove(0)
    }

    fn run(plan: &NodePlan, opts: &ExecuteOptions) -> NodeReport {
        let session = FakeSession::new("sql01");
        execute_node(plan, &session, opts, &BarrierBoard::new(), &NoProgress)
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Pending.can_advance_to(Phase::Probing));
        assert!(Phase::Probing.can_advance_to(Phase::Applying));
        assert!(Phase::Applying.can_advance_to(Phase::Probing));
        assert!(!Phase::Converged.can_advance_to(Phase::Applying));
        assert!(!Phase::Pending.can_advance_to(Phase::Applied));
        assert!(Phase::Failed.is_terminal());
    }

    #[test]
    fn test_converged_resource_is_unchanged_and_not_applied() {
        let disk = FakeResource::converged("disk:E:");
        let applies = disk.applies.clone();
        let mut cfg = NodeConfiguration::new();
        cfg.declare("Disk_SQLData", disk);
        let plan = plan_for(cfg);

        for _ in 0..2 {
            let report = run(&plan, &ExecuteOptions::default());
            assert_eq!(report.results[0].outcome, ExecutionOutcome::Unchanged);
        }
        assert_eq!(applies.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_apply_then_second_run_is_unchanged() {
        let disk = FakeResource::converges_on_apply("disk:E:");
        let applies = disk.applies.clone();
        let mut cfg = NodeConfiguration::new();
        cfg.declare("Disk_SQLData", disk);
        let plan = plan_for(cfg);

        let first = run(&plan, &ExecuteOptions::default());
        assert_eq!(first.results[0].outcome, ExecutionOutcome::Applied);
        assert!(first.results[0].diff.is_some());

        let second = run(&plan, &ExecuteOptions::default());
        assert_eq!(second.results[0].outcome, ExecutionOutcome::Unchanged);
        assert_eq!(applies.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_ceiling_is_exact() {
        let wait = FakeResource::never_ready("wait_for_disk:2")
            .with_policy(RetryConfig::fixed(60, Duration::ZERO));
        let probes = wait.probes.clone();
        let mut cfg = NodeConfiguration::new();
        cfg.declare("WaitForDisk2", wait);

        let report = run(&plan_for(cfg), &ExecuteOptions::default());
        let result = &report.results[0];

        assert_eq!(probes.load(std::sync::atomic::Ordering::SeqCst), 60);
        assert_eq!(result.attempts, 60);
        assert!(matches!(
            result.outcome,
            ExecutionOutcome::Failed {
                error: ReconcileError::PermanentFailure { .. }
            }
        ));
    }

    #[test]
    fn test_failure_blocks_dependents_but_not_independent_branches() {
        let mut cfg = NodeConfiguration::new();
        let disk = cfg
            .declare("Disk", FakeResource::apply_fails("disk:E:", ReconcileError::permanent("format failed")))
            .id();
        let install = cfg
            .declare("Install", FakeResource::converges_on_apply("sql_instance:MSSQLSERVER"))
            .depends_on(disk)
            .id();
        cfg.declare("Agent", FakeResource::converges_on_apply("windows_service:SQLSERVERAGENT"))
            .depends_on(install);
        cfg.declare("Firewall", FakeResource::converges_on_apply("firewall_rule:SQL"));

        let report = run(&plan_for(cfg), &ExecuteOptions::default());

        assert!(matches!(
            report.results[0].outcome.error(),
            Some(ReconcileError::PermanentFailure { .. })
        ));
        assert!(report.results[1].outcome.is_blocked());
        assert!(report.results[2].outcome.is_blocked());
        assert_eq!(report.results[1].attempts, 0);
        assert_eq!(report.results[3].outcome, ExecutionOutcome::Applied);

        let summary = report.summary();
        assert_eq!((summary.failed, summary.blocked, summary.applied), (1, 2, 1));
    }

    #[test]
    fn test_abort_node_policy_blocks_everything_after_failure() {
        let mut cfg = NodeConfiguration::new();
        cfg.declare("Disk", FakeResource::apply_fails("disk:E:", ReconcileError::permanent("boom")));
        cfg.declare("Firewall", FakeResource::converges_on_apply("firewall_rule:SQL"));

        let opts = ExecuteOptions {
            failure_policy: FailurePolicy::AbortNode,
            ..Default::default()
        };
        let report = run(&plan_for(cfg), &opts);
        assert!(report.results[1].outcome.is_blocked());
    }

    #[test]
    fn test_transient_apply_retried_until_converged() {
        // probe 1 diverged, apply, probe 2 diverged -> retry, probe 3 converged
        let create = FakeResource::ready_after_probes("cluster_node:SQLCLU01:create", 2)
            .with_policy(RetryConfig::fixed(5, Duration::ZERO));
        let mut cfg = NodeConfiguration::new();
        cfg.declare("ClusterCreate", create);

        let report = run(&plan_for(cfg), &ExecuteOptions::default());
        assert_eq!(report.results[0].outcome, ExecutionOutcome::Applied);
        assert_eq!(report.results[0].attempts, 2);
    }

    #[test]
    fn test_after_change_runs_only_when_a_dependency_applied() {
        let settle = FakeResource::converges_on_apply("pause:settle");
        let settle_applies = settle.applies.clone();
        let mut cfg = NodeConfiguration::new();
        let create = cfg
            .declare("ClusterCreate", FakeResource::converges_on_apply("cluster_node:SQLCLU01:create"))
            .id();
        cfg.declare("Settle", settle).depends_on(create).after_change();
        let plan = plan_for(cfg);

        let first = run(&plan, &ExecuteOptions::default());
        assert_eq!(first.results[1].outcome, ExecutionOutcome::Applied);

        let second = run(&plan, &ExecuteOptions::default());
        assert_eq!(second.results[0].outcome, ExecutionOutcome::Unchanged);
        assert_eq!(second.results[1].outcome, ExecutionOutcome::Unchanged);
        assert_eq!(second.results[1].attempts, 0);
        assert_eq!(settle_applies.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_after_change_follows_dependency_in_dry_run() {
        let settle = FakeResource::never_ready("pause:settle");
        let probes = settle.probes.clone();
        let mut cfg = NodeConfiguration::new();
        let formed = cfg
            .declare("ClusterCreate", FakeResource::converged("cluster_node:SQLCLU01:create"))
            .id();
        let join = cfg
            .declare("ClusterJoin", FakeResource::converges_on_apply("cluster_node:SQLCLU01:join"))
            .id();
        cfg.declare("SettleCreate", settle).depends_on(formed).after_change();
        cfg.declare("SettleJoin", FakeResource::never_ready("pause:join"))
            .depends_on(join)
            .after_change();

        let opts = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(&plan_for(cfg), &opts);
        assert_eq!(report.results[2].outcome, ExecutionOutcome::Unchanged);
        assert_eq!(probes.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(matches!(
            report.results[3].outcome,
            ExecutionOutcome::Skipped { .. }
        ));
    }

    #[test]
    fn test_dry_run_probes_without_applying() {
        let disk = FakeResource::converges_on_apply("disk:E:");
        let applies = disk.applies.clone();
        let mut cfg = NodeConfiguration::new();
        cfg.declare("Disk", disk);

        let opts = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(&plan_for(cfg), &opts);
        assert!(matches!(
            report.results[0].outcome,
            ExecutionOutcome::Skipped { .. }
        ));
        assert!(report.results[0].diff.is_some());
        assert_eq!(applies.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unreachable_node_fails_everything_and_barriers() {
        let mut cfg = NodeConfiguration::new();
        cfg.declare("ClusterCreate", FakeResource::converged("cluster"))
            .publishes(crate::planner::Barrier::new("cluster-created"));
        let plan = plan_for(cfg);
        let board = BarrierBoard::new();

        let error = ReconcileError::unreachable("sql01", "WinRM connection refused");
        let report = unreachable_node(&plan, &error, &board, &NoProgress);

        assert_eq!(report.summary().failed, 1);
        assert!(matches!(
            board.status(&crate::planner::Barrier::new("cluster-created")),
            crate::barrier::BarrierStatus::Failed { .. }
        ));
    }
}
