//! Desired-state reconciliation for machine fleets
//!
//! `converge` takes a set of [`Configuration`]s, instantiates them for each
//! [`TargetNode`], orders the resulting declarations into a [`RunPlan`], and
//! drives every node toward its declared state in parallel.
//!
//! # Core concepts
//!
//! - **Resource**: one thing on a node with a probe and an apply
//!   (a disk, a service, cluster membership)
//! - **Declaration**: a resource plus its dependencies and barriers
//! - **RunPlan**: every node's declarations in dependency order, checked for
//!   cycles and dangling references before anything is contacted
//! - **Barrier**: a named point one node publishes and others await
//! - **RunReport**: every declaration's final outcome, per node
//!
//! # Example
//!
//! ```ignore
//! use converge::{fleet, ExecuteOptions, NoProgress, RunPlan, TargetNode};
//!
//! let nodes = TargetNode::from_machine_list(&["sql01", "sql02"]);
//! let plan = RunPlan::build(nodes, &[&storage, &cluster])?;
//! let report = fleet::run(&plan, &transport, &credential, &ExecuteOptions::default(), &NoProgress)?;
//! std::process::exit(report.exit_code().into());
//! ```

pub mod barrier;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod fleet;
pub mod graph;
pub mod planner;
pub mod resource;
pub mod types;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use barrier::{BarrierBoard, BarrierStatus, BarrierWait};
pub use context::{ApplyContext, NoProgress, ProgressCallback, Session, Transport};
pub use diff::{DiffSummary, ResourceDiff};
pub use error::{ErrorCategory, ReconcileError, Result};
pub use executor::{Phase, execute_node};
pub use planner::{
    Barrier, Configuration, DeclarationId, NodeConfiguration, NodePlan, PlannedDeclaration,
    ResourceDeclaration, RunPlan,
};
pub use resource::{BoxedResource, Resource};
pub use types::{
    CommandOutput, Credential, ExecuteOptions, ExecuteSummary, ExecutionOutcome, ExecutionResult,
    FailurePolicy, NodeReport, NodeRole, Properties, ResourceState, RunReport, TargetNode,
};
pub use wait::{RetryCallback, RetryConfig, fixed_delay, poll_until, with_retry};
