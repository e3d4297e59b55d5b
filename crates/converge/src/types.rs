//! Core types for desired-state reconciliation

use crate::diff::ResourceDiff;
use crate::error::ReconcileError;
use crate::wait::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Output;

/// Resource properties: an ordered key/value map
pub type Properties = BTreeMap<String, String>;

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceState {
    /// Resource exists with the given properties
    Present { properties: Properties },
    /// Resource does not exist/is not configured
    Absent,
    /// State cannot be determined
    Unknown,
}

impl ResourceState {
    /// Present with no properties
    pub fn present() -> Self {
        Self::Present {
            properties: Properties::new(),
        }
    }

    /// Present with the given properties
    pub fn present_with<K, V>(properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Present {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Look up a property of a present resource
    pub fn property(&self, key: &str) -> Option<&str> {
        match self {
            Self::Present { properties } => properties.get(key).map(String::as_str),
            _ => None,
        }
    }

    /// Whether this (current) state satisfies a desired state.
    ///
    /// A desired `Present` is satisfied when every desired property has the
    /// same value here; extra live properties are ignored. Property values
    /// compare case-insensitively, as Windows reports them inconsistently.
    pub fn satisfies(&self, desired: &ResourceState) -> bool {
        match (self, desired) {
            (Self::Present { properties: current }, Self::Present { properties: wanted }) => {
                wanted.iter().all(|(key, value)| {
                    current
                        .get(key)
                        .is_some_and(|have| have.eq_ignore_ascii_case(value))
                })
            }
            (Self::Absent, Self::Absent) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present { properties } if properties.is_empty() => write!(f, "present"),
            Self::Present { properties } => {
                let parts: Vec<String> = properties
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                write!(f, "present ({})", parts.join(", "))
            }
            Self::Absent => write!(f, "absent"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Role of a node in the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// First machine in the operator-supplied list
    Primary,
    /// Every other machine
    Secondary,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A machine targeted by the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetNode {
    /// Network address or computer name
    pub name: String,
    pub role: NodeRole,
    /// Node-specific attributes (drive policy, cluster name, ...)
    #[serde(default)]
    pub attributes: Properties,
}

impl TargetNode {
    pub fn new(name: impl Into<String>, role: NodeRole) -> Self {
        Self {
            name: name.into(),
            role,
            attributes: Properties::new(),
        }
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Build nodes from an operator-supplied machine list.
    ///
    /// The first machine is always Primary; the rest are Secondary.
    pub fn from_machine_list<S: AsRef<str>>(machines: &[S]) -> Vec<Self> {
        machines
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let role = if i == 0 {
                    NodeRole::Primary
                } else {
                    NodeRole::Secondary
                };
                Self::new(name.as_ref(), role)
            })
            .collect()
    }

    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }
}

/// The single installation identity, shared read-only across the run
#[derive(Clone)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Output from a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into().into_bytes(),
            stderr: Vec::new(),
            success: true,
        }
    }

    /// Failed output with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into().into_bytes(),
            success: false,
        }
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Final state of one declaration on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Already converged; nothing was applied
    Unchanged,
    /// Diverged and was converged by this run
    Applied,
    /// Could not be converged, or was not attempted
    Failed { error: ReconcileError },
    /// Not applied (dry run)
    Skipped { reason: String },
}

impl ExecutionOutcome {
    /// Unchanged, Applied, or Skipped
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Failed because a dependency or barrier blocked it
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                error: ReconcileError::PreconditionNotMet { .. }
            }
        )
    }

    pub fn error(&self) -> Option<&ReconcileError> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Short label for reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Applied => "applied",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Outcome of one declaration on one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub resource_id: String,
    pub resource_type: String,
    pub description: String,
    pub outcome: ExecutionOutcome,
    /// Probe/apply cycles used; zero when never attempted
    pub attempts: u32,
    /// Current vs desired when the resource diverged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<ResourceDiff>,
}

/// Every declaration's outcome on one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: TargetNode,
    pub results: Vec<ExecutionResult>,
}

impl NodeReport {
    pub fn new(node: TargetNode) -> Self {
        Self {
            node,
            results: Vec::new(),
        }
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for result in &self.results {
            summary.add_outcome(&result.outcome);
        }
        summary
    }

    /// Look up a result by resource identity
    pub fn result(&self, resource_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.resource_id == resource_id)
    }
}

/// The per-run report: every resource's final state per node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for node in &self.nodes {
            summary.merge(&node.summary());
        }
        summary
    }

    /// Check if no declaration failed on any node
    pub fn is_success(&self) -> bool {
        self.summary().is_success()
    }

    /// Process exit code for the run
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_success())
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node.name == name)
    }

    /// Iterate over every failed (node, result) pair
    pub fn failures(&self) -> impl Iterator<Item = (&TargetNode, &ExecutionResult)> {
        self.nodes.iter().flat_map(|n| {
            n.results
                .iter()
                .filter(|r| !r.outcome.is_success())
                .map(move |r| (&n.node, r))
        })
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub unchanged: usize,
    pub applied: usize,
    pub skipped: usize,
    /// Failed while attempted
    pub failed: usize,
    /// Not attempted because a precondition failed
    pub blocked: usize,
}

impl ExecuteSummary {
    /// Total number of declarations processed
    pub fn total(&self) -> usize {
        self.unchanged + self.applied + self.skipped + self.failed + self.blocked
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.unchanged += other.unchanged;
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.blocked += other.blocked;
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Unchanged => self.unchanged += 1,
            ExecutionOutcome::Applied => self.applied += 1,
            ExecutionOutcome::Skipped { .. } => self.skipped += 1,
            o if o.is_blocked() => self.blocked += 1,
            ExecutionOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// What happens on a node after one of its declarations fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Block only dependents of the failure; keep going with independent branches
    #[default]
    ContinueIndependent,
    /// Stop the node: every remaining declaration becomes `PreconditionNotMet`
    AbortNode,
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Probe only, don't apply
    pub dry_run: bool,
    /// Verbose output
    pub verbose: bool,
    pub failure_policy: FailurePolicy,
    /// How long a declaration waits for an awaited barrier
    pub barrier_wait: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbose: false,
            failure_policy: FailurePolicy::default(),
            barrier_wait: RetryConfig::cluster_wait(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies_is_subset_match() {
        let current = ResourceState::present_with([
            ("drive_letter", "E"),
            ("label", "SQLData"),
            ("size_gb", "512"),
        ]);
        let desired = ResourceState::present_with([("drive_letter", "E"), ("label", "sqldata")]);
        assert!(current.satisfies(&desired));

        let relabel = ResourceState::present_with([("label", "Logs")]);
        assert!(!current.satisfies(&relabel));
        assert!(!ResourceState::Absent.satisfies(&desired));
        assert!(ResourceState::Absent.satisfies(&ResourceState::Absent));
        assert!(!ResourceState::Unknown.satisfies(&ResourceState::Absent));
    }

    #[test]
    fn test_machine_list_roles() {
        let nodes = TargetNode::from_machine_list(&["sql01", "sql02", "sql03"]);
        assert_eq!(nodes[0].role, NodeRole::Primary);
        assert!(nodes[1..].iter().all(|n| n.role == NodeRole::Secondary));
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = Credential::new("CONTOSO\\svc-sql", "hunter2");
        let shown = format!("{cred:?}");
        assert!(shown.contains("svc-sql"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_summary_separates_blocked_from_failed() {
        let mut summary = ExecuteSummary::default();
        summary.add_outcome(&ExecutionOutcome::Applied);
        summary.add_outcome(&ExecutionOutcome::Unchanged);
        summary.add_outcome(&ExecutionOutcome::Failed {
            error: ReconcileError::permanent("boom"),
        });
        summary.add_outcome(&ExecutionOutcome::Failed {
            error: ReconcileError::precondition("b", "a failed"),
        });

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_report_exit_code() {
        let mut node = NodeReport::new(TargetNode::new("sql01", NodeRole::Primary));
        node.results.push(ExecutionResult {
            resource_id: "disk:E:".into(),
            resource_type: "disk".into(),
            description: "Disk E:".into(),
            outcome: ExecutionOutcome::Applied,
            attempts: 1,
            diff: None,
        });
        let mut report = RunReport { nodes: vec![node] };
        assert_eq!(report.exit_code(), 0);

        report.nodes[0].results[0].outcome = ExecutionOutcome::Failed {
            error: ReconcileError::permanent("format failed"),
        };
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failures().count(), 1);
    }
}
