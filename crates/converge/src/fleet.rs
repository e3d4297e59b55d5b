//! Fleet coordinator - runs every node's executor concurrently
//!
//! One worker per node, each with its own session. Nodes share nothing but
//! the read-only plan and the barrier board.

use crate::barrier::BarrierBoard;
use crate::context::{ProgressCallback, Transport};
use crate::error::{ReconcileError, Result};
use crate::executor::{execute_node, unreachable_node};
use crate::planner::{NodePlan, RunPlan};
use crate::types::{Credential, ExecuteOptions, NodeReport, RunReport};
use log::{debug, info};
use rayon::prelude::*;

/// Converge every node in `plan` and collect the run report.
///
/// Node reports come back in plan order regardless of finishing order. An
/// unreachable node fails on its own; the rest of the fleet carries on
/// until something awaits a barrier that node would have published.
pub fn run(
    plan: &RunPlan,
    transport: &dyn Transport,
    credential: &Credential,
    opts: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> Result<RunReport> {
    if plan.nodes.is_empty() {
        return Ok(RunReport::default());
    }

    // Executors block on barriers, so every node needs its own thread
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(plan.nodes.len())
        .thread_name(|i| format!("node-{i}"))
        .build()
        .map_err(|e| ReconcileError::permanent(format!("failed to create thread pool: {e}")))?;

    let board = BarrierBoard::new();
    info!(
        "converging {} declarations on {} nodes{}",
        plan.total_declarations(),
        plan.nodes.len(),
        if opts.dry_run { " (dry run)" } else { "" }
    );

    let nodes: Vec<NodeReport> = pool.install(|| {
        plan.nodes
            .par_iter()
            .with_max_len(1)
            .map(|node_plan| run_node(node_plan, transport, credential, opts, &board, progress))
            .collect()
    });

    let report = RunReport { nodes };
    let summary = report.summary();
    info!(
        "run finished: {} applied, {} unchanged, {} failed, {} blocked",
        summary.applied, summary.unchanged, summary.failed, summary.blocked
    );
    Ok(report)
}

fn run_node(
    node_plan: &NodePlan,
    transport: &dyn Transport,
    credential: &Credential,
    opts: &ExecuteOptions,
    board: &BarrierBoard,
    progress: &dyn ProgressCallback,
) -> NodeReport {
    debug!("{}: opening session as {}", node_plan.node.name, credential.user);
    match transport.open_session(&node_plan.node, credential) {
        Ok(session) => execute_node(node_plan, session.as_ref(), opts, board, progress),
        Err(error) => {
            let error = match error {
                ReconcileError::UnreachableNode { .. } => error,
                other => ReconcileError::unreachable(&node_plan.node.name, other.to_string()),
            };
            unreachable_node(node_plan, &error, board, progress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::planner::{Barrier, NodeConfiguration};
    use crate::testing::{FakeResource, FakeTransport, event_log, events};
    use crate::types::{ExecutionOutcome, TargetNode};
    use crate::wait::RetryConfig;
    use std::time::Duration;

    fn credential() -> Credential {
        Credential::new("CONTOSO\\svc-sql", "secret")
    }

    fn opts() -> ExecuteOptions {
        ExecuteOptions {
            barrier_wait: RetryConfig::fixed(500, Duration::from_millis(10)),
            ..Default::default()
        }
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} not in {log:?}"))
    }

    #[test]
    fn test_cluster_scenario_converges_in_order() {
        let log = event_log();
        let nodes = TargetNode::from_machine_list(&["NodeA", "NodeB"]);

        let mut a = NodeConfiguration::new();
        a.declare("DiskAttach", FakeResource::converges_on_apply("disk:D:").logging_to(&log));
        a.declare(
            "ClusterCreate",
            FakeResource::ready_after_probes("cluster:create", 2)
                .with_policy(RetryConfig::fixed(5, Duration::from_millis(20)))
                .logging_to(&log),
        )
        .publishes(Barrier::new("cluster-created"));

        let mut b = NodeConfiguration::new();
        b.declare("ClusterJoin", FakeResource::converges_on_apply("cluster:join").logging_to(&log))
            .awaits(Barrier::new("cluster-created"));

        let plan = RunPlan::from_configurations(vec![
            (nodes[0].clone(), a),
            (nodes[1].clone(), b),
        ])
        .unwrap();

        let report = run(&plan, &FakeTransport::new(), &credential(), &opts(), &NoProgress).unwrap();

        let node_a = report.node("NodeA").unwrap();
        assert_eq!(node_a.results[0].outcome, ExecutionOutcome::Applied);
        let create = node_a.result("cluster:create").unwrap();
        assert_eq!(create.outcome, ExecutionOutcome::Applied);
        assert_eq!(create.attempts, 2);

        let join = report.node("NodeB").unwrap().result("cluster:join").unwrap();
        assert_eq!(join.outcome, ExecutionOutcome::Applied);
        assert_eq!(report.summary().failed, 0);
        assert!(report.is_success());

        // The join was first probed after the create's final, converged probe
        let log = events(&log);
        let last_create = log
            .iter()
            .rposition(|e| e == "NodeA:cluster:create:probe")
            .unwrap();
        assert!(last_create < position(&log, "NodeB:cluster:join:probe"));
    }

    #[test]
    fn test_reports_keep_plan_order() {
        let nodes = TargetNode::from_machine_list(&["sql01", "sql02", "sql03"]);
        let per_node = nodes
            .into_iter()
            .map(|node| {
                let mut cfg = NodeConfiguration::new();
                cfg.declare("Marker", FakeResource::converged("marker"));
                (node, cfg)
            })
            .collect();
        let plan = RunPlan::from_configurations(per_node).unwrap();

        let report = run(&plan, &FakeTransport::new(), &credential(), &opts(), &NoProgress).unwrap();
        let names: Vec<&str> = report.nodes.iter().map(|n| n.node.name.as_str()).collect();
        assert_eq!(names, ["sql01", "sql02", "sql03"]);
    }

    #[test]
    fn test_unreachable_node_is_isolated() {
        let nodes = TargetNode::from_machine_list(&["sql01", "sql02", "sql03"]);
        let mut per_node = Vec::new();
        for node in nodes {
            let mut cfg = NodeConfiguration::new();
            cfg.declare("Firewall", FakeResource::converges_on_apply("firewall_rule:SQL"));
            per_node.push((node, cfg));
        }
        let plan = RunPlan::from_configurations(per_node).unwrap();
        let transport = FakeTransport::new().unreachable("sql02");

        let report = run(&plan, &transport, &credential(), &opts(), &NoProgress).unwrap();

        assert_eq!(transport.opened(), 3);
        assert!(matches!(
            report.node("sql02").unwrap().results[0].outcome.error(),
            Some(ReconcileError::UnreachableNode { .. })
        ));
        for name in ["sql01", "sql03"] {
            assert_eq!(
                report.node(name).unwrap().results[0].outcome,
                ExecutionOutcome::Applied
            );
        }
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_unreachable_publisher_fails_awaiters() {
        let nodes = TargetNode::from_machine_list(&["sql01", "sql02"]);
        let mut a = NodeConfiguration::new();
        a.declare("ClusterCreate", FakeResource::converges_on_apply("cluster:create"))
            .publishes(Barrier::new("cluster-created"));
        let mut b = NodeConfiguration::new();
        let join = b
            .declare("ClusterJoin", FakeResource::converges_on_apply("cluster:join"))
            .awaits(Barrier::new("cluster-created"))
            .id();
        b.declare("AgReplica", FakeResource::converges_on_apply("ag_replica:AG1"))
            .depends_on(join);

        let plan =
            RunPlan::from_configurations(vec![(nodes[0].clone(), a), (nodes[1].clone(), b)])
                .unwrap();
        let transport = FakeTransport::new().unreachable("sql01");

        let report = run(&plan, &transport, &credential(), &opts(), &NoProgress).unwrap();
        let secondary = report.node("sql02").unwrap();
        assert!(secondary.results.iter().all(|r| r.outcome.is_blocked()));
        assert_eq!(secondary.summary().blocked, 2);
    }

    #[test]
    fn test_dry_run_releases_barriers() {
        let nodes = TargetNode::from_machine_list(&["sql01", "sql02"]);
        let mut a = NodeConfiguration::new();
        let create = FakeResource::converges_on_apply("cluster:create");
        let applies = create.applies.clone();
        a.declare("ClusterCreate", create)
            .publishes(Barrier::new("cluster-created"));
        let mut b = NodeConfiguration::new();
        b.declare("ClusterJoin", FakeResource::converges_on_apply("cluster:join"))
            .awaits(Barrier::new("cluster-created"));

        let plan =
            RunPlan::from_configurations(vec![(nodes[0].clone(), a), (nodes[1].clone(), b)])
                .unwrap();
        let opts = ExecuteOptions {
            dry_run: true,
            ..opts()
        };

        let report = run(&plan, &FakeTransport::new(), &credential(), &opts, &NoProgress).unwrap();
        assert_eq!(report.summary().skipped, 2);
        assert!(report.is_success());
        assert_eq!(applies.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_plan() {
        let report = run(
            &RunPlan::default(),
            &FakeTransport::new(),
            &credential(),
            &opts(),
            &NoProgress,
        )
        .unwrap();
        assert!(report.nodes.is_empty());
    }
}
