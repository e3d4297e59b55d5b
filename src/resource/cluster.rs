//! Failover cluster resources
//!
//! The primary creates the cluster; every other node waits until the cluster
//! answers, then joins it. Both sides check before acting so a rerun against
//! a formed cluster changes nothing.

use converge::{ApplyContext, ReconcileError, Resource, ResourceState, Result, RetryConfig, Session};

use super::{probe_properties, ps_quote};

const INSTALL_FEATURE: &str =
    "Install-WindowsFeature -Name Failover-Clustering -IncludeManagementTools | Out-Null";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterMode {
    /// Form a new single-node cluster
    Create { ip: Option<String> },
    /// Join an existing cluster
    Join,
}

/// This node's membership in a failover cluster
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub cluster: String,
    pub mode: ClusterMode,
    pub policy: RetryConfig,
}

impl ClusterNode {
    pub fn create(cluster: impl Into<String>, ip: Option<String>) -> Self {
        Self {
            cluster: cluster.into(),
            mode: ClusterMode::Create { ip },
            policy: RetryConfig::cluster_wait(),
        }
    }

    pub fn join(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            mode: ClusterMode::Join,
            policy: RetryConfig::cluster_wait(),
        }
    }

    pub fn with_policy(mut self, policy: RetryConfig) -> Self {
        self.policy = policy;
        self
    }

    fn apply_script(&self) -> String {
        let cluster = ps_quote(&self.cluster);
        let action = match &self.mode {
            ClusterMode::Create { ip } => {
                let address = ip
                    .as_deref()
                    .map(|ip| format!(" -StaticAddress {}", ps_quote(ip)))
                    .unwrap_or_default();
                format!(
                    "if (-not (Get-Cluster -Name {cluster} -ErrorAction SilentlyContinue)) {{\n\
                     \x20   New-Cluster -Name {cluster} -Node $env:COMPUTERNAME{address} -NoStorage | Out-Null\n\
                     }}"
                )
            }
            ClusterMode::Join => format!(
                "if (-not (Get-ClusterNode -Cluster {cluster} -Name $env:COMPUTERNAME -ErrorAction SilentlyContinue)) {{\n\
                 \x20   Add-ClusterNode -Cluster {cluster} -Name $env:COMPUTERNAME -NoStorage | Out-Null\n\
                 }}"
            ),
        };
        format!("{INSTALL_FEATURE}\n{action}")
    }
}

fn cluster_probe(cluster: &str) -> String {
    let cluster = ps_quote(cluster);
    format!(
        "if (Get-Command Get-Cluster -ErrorAction SilentlyContinue) {{\n\
         \x20   $c = Get-Cluster -Name {cluster} -ErrorAction SilentlyContinue\n\
         \x20   if ($c) {{\n\
         \x20       $n = Get-ClusterNode -Cluster {cluster} -Name $env:COMPUTERNAME -ErrorAction SilentlyContinue\n\
         \x20       [pscustomobject]@{{ cluster = $c.Name; member = [string][bool]$n; state = [string]$n.State }} | ConvertTo-Json -Compress\n\
         \x20   }}\n\
         }}"
    )
}

impl Resource for ClusterNode {
    fn id(&self) -> String {
        let mode = match self.mode {
            ClusterMode::Create { .. } => "create",
            ClusterMode::Join => "join",
        };
        format!("cluster_node:{}:{mode}", self.cluster)
    }

    fn description(&self) -> String {
        match &self.mode {
            ClusterMode::Create { ip: Some(ip) } => {
                format!("Create cluster {} at {ip}", self.cluster)
            }
            ClusterMode::Create { ip: None } => format!("Create cluster {}", self.cluster),
            ClusterMode::Join => format!("Join cluster {}", self.cluster),
        }
    }

    fn resource_type(&self) -> &'static str {
        "cluster_node"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(session, &cluster_probe(&self.cluster))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([
            ("cluster", self.cluster.as_str()),
            ("member", "True"),
            ("state", "Up"),
        ])
    }

    /// A rejected create or join is retried; the cluster may not have quorum yet
    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(&self.apply_script())
            .map_err(ReconcileError::into_transient)?;
        Ok(())
    }

    fn retry_policy(&self) -> RetryConfig {
        self.policy.clone()
    }
}

/// Wait until a cluster answers from this node
#[derive(Debug, Clone)]
pub struct WaitForCluster {
    pub cluster: String,
    pub policy: RetryConfig,
}

impl WaitForCluster {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            policy: RetryConfig::cluster_wait(),
        }
    }

    pub fn with_policy(mut self, policy: RetryConfig) -> Self {
        self.policy = policy;
        self
    }
}

impl Resource for WaitForCluster {
    fn id(&self) -> String {
        format!("wait_for_cluster:{}", self.cluster)
    }

    fn description(&self) -> String {
        format!("Wait for cluster {}", self.cluster)
    }

    fn resource_type(&self) -> &'static str {
        "wait_for_cluster"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(session, &cluster_probe(&self.cluster))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([("cluster", self.cluster.as_str())])
    }

    /// Make sure the cluster cmdlets exist, then report not-ready
    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(INSTALL_FEATURE)?;
        Err(ReconcileError::transient(format!(
            "cluster {} is not reachable yet",
            self.cluster
        )))
    }

    fn retry_policy(&self) -> RetryConfig {
        self.policy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::testing::FakeSession;
    use converge::{
        BarrierBoard, CommandOutput, ExecuteOptions, ExecutionOutcome, NoProgress,
        NodeConfiguration, NodeRole, RunPlan, TargetNode, execute_node,
    };
    use std::time::Duration;

    #[test]
    fn test_identity_includes_mode() {
        assert_eq!(
            ClusterNode::create("SQLCLU01", None).id(),
            "cluster_node:SQLCLU01:create"
        );
        assert_eq!(ClusterNode::join("SQLCLU01").id(), "cluster_node:SQLCLU01:join");
    }

    #[test]
    fn test_create_script_is_guarded() {
        let script = ClusterNode::create("SQLCLU01", Some("10.0.0.50".into())).apply_script();
        assert!(script.contains("Install-WindowsFeature -Name Failover-Clustering"));
        assert!(script.contains("if (-not (Get-Cluster -Name 'SQLCLU01'"));
        assert!(script.contains("-StaticAddress '10.0.0.50'"));
        assert!(!script.contains("Add-ClusterNode"));
    }

    #[test]
    fn test_member_that_is_down_diverges() {
        let join = ClusterNode::join("SQLCLU01");
        let down = FakeSession::new("sql02").respond(
            "Get-Cluster",
            CommandOutput::ok(r#"{"cluster":"SQLCLU01","member":"True","state":"Down"}"#),
        );
        assert!(join.needs_apply(&down).unwrap());

        let up = FakeSession::new("sql02").respond(
            "Get-Cluster",
            CommandOutput::ok(r#"{"cluster":"SQLCLU01","member":"True","state":"Up"}"#),
        );
        assert!(!join.needs_apply(&up).unwrap());
    }

    #[test]
    fn test_join_retried_until_quorate() {
        let join = ClusterNode::join("SQLCLU01").with_policy(RetryConfig::fixed(5, Duration::ZERO));
        let mut cfg = NodeConfiguration::new();
        cfg.declare("ClusterJoin", join);
        let node = TargetNode::new("sql02", NodeRole::Secondary);
        let plan = RunPlan::from_configurations(vec![(node, cfg)]).unwrap();

        let session = FakeSession::new("sql02")
            .respond_times(
                "Add-ClusterNode",
                2,
                CommandOutput::failed("Add-ClusterNode : quorum not reached"),
            )
            .respond_times(
                "ConvertTo-Json",
                3,
                CommandOutput::ok(r#"{"cluster":"SQLCLU01","member":"False","state":""}"#),
            )
            .respond(
                "Get-Cluster",
                CommandOutput::ok(r#"{"cluster":"SQLCLU01","member":"True","state":"Up"}"#),
            );

        let report = execute_node(
            &plan.nodes[0],
            &session,
            &ExecuteOptions::default(),
            &BarrierBoard::new(),
            &NoProgress,
        );

        let result = &report.results[0];
        assert_eq!(result.outcome, ExecutionOutcome::Applied);
        assert_eq!(result.attempts, 3);
        assert_eq!(session.ran("Add-ClusterNode"), 3);
    }

    #[test]
    fn test_join_gives_up_after_budget() {
        let join = ClusterNode::join("SQLCLU01").with_policy(RetryConfig::fixed(3, Duration::ZERO));
        let mut cfg = NodeConfiguration::new();
        cfg.declare("ClusterJoin", join);
        let node = TargetNode::new("sql02", NodeRole::Secondary);
        let plan = RunPlan::from_configurations(vec![(node, cfg)]).unwrap();

        let session = FakeSession::new("sql02")
            .respond("Add-ClusterNode", CommandOutput::failed("quorum not reached"));
        let report = execute_node(
            &plan.nodes[0],
            &session,
            &ExecuteOptions::default(),
            &BarrierBoard::new(),
            &NoProgress,
        );

        let result = &report.results[0];
        assert_eq!(result.attempts, 3);
        assert!(matches!(
            result.outcome.error(),
            Some(ReconcileError::PermanentFailure { message }) if message.contains("gave up after 3 attempts")
        ));
    }

    #[test]
    fn test_wait_for_cluster_is_transient_until_reachable() {
        let wait = WaitForCluster::new("SQLCLU01").with_policy(RetryConfig::fixed(3, Duration::ZERO));
        let node = TargetNode::new("sql02", NodeRole::Secondary);
        let session = FakeSession::new("sql02");
        let mut ctx = ApplyContext::new(&node, &session, false, false);

        let err = wait.apply(&mut ctx).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(wait.retry_policy().max_attempts, 3);

        let formed = FakeSession::new("sql02").respond(
            "Get-Cluster",
            CommandOutput::ok(r#"{"cluster":"SQLCLU01","member":"False","state":""}"#),
        );
        assert!(!wait.needs_apply(&formed).unwrap());
    }
}
