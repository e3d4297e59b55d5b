//! Apply context and provider traits
//!
//! These traits keep the engine independent of how nodes are reached
//! (remote shell, agent, test double) and of how progress is shown.

use crate::error::{ReconcileError, Result};
use crate::types::{CommandOutput, Credential, ExecutionResult, NodeReport, TargetNode};
use std::path::Path;
use std::time::Duration;

/// An open management session to one node
///
/// Implement this trait to run probe and apply scripts on a machine.
/// Transport failures should surface as [`ReconcileError::UnreachableNode`].
pub trait Session: Send + Sync {
    /// Name of the node this session talks to
    fn node(&self) -> &str;

    /// Run a script on the node
    fn run(&self, script: &str) -> Result<CommandOutput>;

    /// Run a script and capture stdout
    fn run_capture(&self, script: &str) -> Result<String> {
        let output = self.run(script)?;
        if !output.success {
            return Err(ReconcileError::permanent(format!(
                "command failed on {}: {}",
                self.node(),
                output.stderr_str().trim()
            )));
        }
        Ok(output.stdout_str())
    }

    /// Copy a local file to a path on the node
    fn copy_to(&self, local: &Path, remote: &str) -> Result<()>;
}

/// Opens sessions to nodes
pub trait Transport: Send + Sync {
    /// Open a session to `node` under `credential`
    fn open_session(&self, node: &TargetNode, credential: &Credential)
    -> Result<Box<dyn Session>>;
}

/// Progress callback for fleet execution
///
/// Nodes run concurrently, so implementations must be thread-safe.
pub trait ProgressCallback: Send + Sync {
    /// Called when a node's executor starts
    fn on_node_start(&self, node: &TargetNode, count: usize);

    /// Called when starting a single declaration
    fn on_resource_start(&self, node: &str, id: &str, description: &str);

    /// Called before a declaration is retried
    fn on_retry(
        &self,
        node: &str,
        id: &str,
        attempt: u32,
        max_attempts: u32,
        error: &ReconcileError,
        delay: Duration,
    );

    /// Called when a declaration reaches its final state
    fn on_resource_complete(&self, node: &str, result: &ExecutionResult);

    /// Called when a node's executor finishes
    fn on_node_complete(&self, report: &NodeReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_node_start(&self, _node: &TargetNode, _count: usize) {}
    fn on_resource_start(&self, _node: &str, _id: &str, _description: &str) {}
    fn on_retry(&self, _: &str, _: &str, _: u32, _: u32, _: &ReconcileError, _: Duration) {}
    fn on_resource_complete(&self, _node: &str, _result: &ExecutionResult) {}
    fn on_node_complete(&self, _report: &NodeReport) {}
}

/// Context passed to resource apply operations
pub struct ApplyContext<'a> {
    /// Whether this is a dry run (no actual changes)
    pub dry_run: bool,
    /// Whether to output verbose information
    pub verbose: bool,
    /// Node being converged
    pub node: &'a TargetNode,
    /// Session to that node
    pub session: &'a dyn Session,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(node: &'a TargetNode, session: &'a dyn Session, dry_run: bool, verbose: bool) -> Self {
        Self {
            dry_run,
            verbose,
            node,
            session,
        }
    }

    /// Run a script on the node, failing on a non-zero exit
    pub fn run(&self, script: &str) -> Result<String> {
        self.session.run_capture(script)
    }
}
