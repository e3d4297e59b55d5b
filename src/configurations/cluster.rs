//! Cluster configuration
//!
//! Primary: create the cluster and publish `cluster-created`.
//! Secondaries: await that barrier, poll until the cluster answers, join.

use converge::{Barrier, Configuration, NodeConfiguration, Result, RetryConfig, TargetNode};
use std::time::Duration;

use super::CLUSTER_CREATED;
use crate::config::DeploymentConfig;
use crate::resource::{ClusterNode, Pause, WaitForCluster};

/// Declaration every node's cluster work ends with
pub const CLUSTER_READY: &str = "ClusterReady";

#[derive(Debug, Clone)]
pub struct ClusterConfiguration {
    pub name: String,
    pub ip: Option<String>,
    pub cluster_wait: RetryConfig,
    /// Fixed settle time after forming or joining
    pub settle: Duration,
}

impl ClusterConfiguration {
    /// `None` when the deployment has no cluster
    pub fn from_config(config: &DeploymentConfig) -> Option<Self> {
        if !config.wants_cluster() {
            return None;
        }
        Some(Self {
            name: config.cluster.name.clone().unwrap_or_default(),
            ip: config.cluster.ip.clone(),
            cluster_wait: config.retry.cluster.to_retry_config(),
            settle: Duration::from_secs(config.pause_after_cluster_secs),
        })
    }
}

impl Configuration for ClusterConfiguration {
    fn name(&self) -> &str {
        "cluster"
    }

    fn declare(&self, node: &TargetNode, out: &mut NodeConfiguration) -> Result<()> {
        let membership = if node.is_primary() {
            out.declare(
                "ClusterCreate",
                ClusterNode::create(&self.name, self.ip.clone())
                    .with_policy(self.cluster_wait.clone()),
            )
            .publishes(Barrier::new(CLUSTER_CREATED))
            .id()
        } else {
            let wait = out
                .declare(
                    "WaitForCluster",
                    WaitForCluster::new(&self.name).with_policy(self.cluster_wait.clone()),
                )
                .awaits(Barrier::new(CLUSTER_CREATED))
                .id();
            out.declare(
                "ClusterJoin",
                ClusterNode::join(&self.name).with_policy(self.cluster_wait.clone()),
            )
            .depends_on(wait)
            .id()
        };

        if self.settle.is_zero() {
            return Ok(());
        }
        out.declare(
            CLUSTER_READY,
            Pause::new(format!("cluster {} settling", self.name), self.settle),
        )
        .depends_on(membership)
        .after_change();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurations::{target_nodes, tests as fixtures};
    use converge::RunPlan;
    use converge::testing::FakeTransport;
    use converge::testing::FakeSession;
    use converge::{
        BarrierBoard, CommandOutput, Credential, ExecuteOptions, ExecutionOutcome, NoProgress,
        execute_node, fleet,
    };
    use std::time::Instant;

    #[test]
    fn test_primary_creates_secondary_joins() {
        let media = fixtures::media();
        let config = fixtures::deployment(media.path());
        let cluster = ClusterConfiguration::from_config(&config).unwrap();
        assert_eq!(cluster.settle, Duration::from_secs(300));

        let plan = RunPlan::build(target_nodes(&config), &[&cluster]).unwrap();
        let primary = plan.nodes[0].describe();
        assert_eq!(primary[0].name, "ClusterCreate");
        assert_eq!(primary[0].publishes.as_deref(), Some(CLUSTER_CREATED));
        assert_eq!(primary[1].name, CLUSTER_READY);
        assert!(primary[1].after_change);

        let secondary = plan.nodes[1].describe();
        let names: Vec<&str> = secondary.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["WaitForCluster", "ClusterJoin", CLUSTER_READY]);
    }

    #[test]
    fn test_formed_cluster_reruns_without_settling() {
        let media = fixtures::media();
        let config = fixtures::deployment(media.path());
        let cluster = ClusterConfiguration::from_config(&config).unwrap();
        let plan = RunPlan::build(target_nodes(&config), &[&cluster]).unwrap();
        let primary = plan.node("sql01").unwrap();

        for _ in 0..2 {
            let session = FakeSession::new("sql01").respond(
                "Get-Cluster",
                CommandOutput::ok(r#"{"cluster":"SQLCLU01","member":"True","state":"Up"}"#),
            );
            let started = Instant::now();
            let report = execute_node(
                primary,
                &session,
                &ExecuteOptions::default(),
                &BarrierBoard::new(),
                &NoProgress,
            );

            assert!(started.elapsed() < Duration::from_secs(5));
            assert_eq!(report.results.len(), 2);
            for result in &report.results {
                assert_eq!(result.outcome, ExecutionOutcome::Unchanged);
            }
            assert_eq!(session.ran("New-Cluster"), 0);
        }
    }

    #[test]
    fn test_no_cluster_without_name_or_ag() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.cluster.name = None;
        config.availability_group.enabled = false;
        assert!(ClusterConfiguration::from_config(&config).is_none());
    }

    #[test]
    fn test_dry_run_over_fresh_nodes() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.pause_after_cluster_secs = 0;
        let cluster = ClusterConfiguration::from_config(&config).unwrap();
        let plan = RunPlan::build(target_nodes(&config), &[&cluster]).unwrap();

        let opts = ExecuteOptions {
            dry_run: true,
            ..ExecuteOptions::default()
        };
        let report = fleet::run(
            &plan,
            &FakeTransport::new(),
            &Credential::new("svc", "pw"),
            &opts,
            &NoProgress,
        )
        .unwrap();

        let join = report.node("sql02").unwrap().result("cluster_node:SQLCLU01:join").unwrap();
        assert!(matches!(join.outcome, ExecutionOutcome::Skipped { .. }));
        assert!(report.is_success());
    }
}
