//! Resource trait for declarative state management
//!
//! A Resource is something on a node that is in some state and can be
//! changed to reach a desired state: a disk, a service, a firewall rule,
//! cluster membership.

use crate::context::{ApplyContext, Session};
use crate::error::Result;
use crate::types::ResourceState;
use crate::wait::RetryConfig;
use std::fmt;

/// Core trait for declarative resources
///
/// Every resource provides:
/// - Identity (id, description, type)
/// - Probe (current state, read from the node)
/// - An idempotency predicate (is the current state good enough?)
/// - Apply (mutate the node toward the desired state)
/// - A retry policy for slow convergence
///
/// # Example
///
/// ```ignore
/// use converge::{ApplyContext, Resource, ResourceState, Result, Session};
///
/// #[derive(Debug)]
/// struct Marker { path: String }
///
/// impl Resource for Marker {
///     fn id(&self) -> String { format!("marker:{}", self.path) }
///     fn description(&self) -> String { format!("Marker file {}", self.path) }
///     fn resource_type(&self) -> &'static str { "marker" }
///
///     fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
///         let script = format!("Test-Path '{}'", self.path);
///         if session.run_capture(&script)?.trim() == "True" {
///             Ok(ResourceState::present())
///         } else {
///             Ok(ResourceState::Absent)
///         }
///     }
///
///     fn desired_state(&self) -> ResourceState { ResourceState::present() }
///
///     fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
///         ctx.run(&format!("New-Item -ItemType File '{}'", self.path))?;
///         Ok(())
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Identity key for idempotency comparisons
    ///
    /// Two declarations with the same id manage the same thing, e.g.
    /// - "disk:E:" for a formatted volume
    /// - "firewall_rule:SQL Server" for a named rule
    /// - "cluster_node:SQLCLU01:join" for cluster membership
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type category, used for grouping and filtering
    fn resource_type(&self) -> &'static str;

    /// Probe the node for the current state of this resource
    fn current_state(&self, session: &dyn Session) -> Result<ResourceState>;

    /// Desired state, derived from configuration
    fn desired_state(&self) -> ResourceState;

    /// Whether `current` is good enough for `desired`
    ///
    /// Default: every desired property must be present with the same value.
    fn is_converged(&self, current: &ResourceState, desired: &ResourceState) -> bool {
        current.satisfies(desired)
    }

    /// Probe and check whether changes are needed
    fn needs_apply(&self, session: &dyn Session) -> Result<bool> {
        let current = self.current_state(session)?;
        Ok(!self.is_converged(&current, &self.desired_state()))
    }

    /// Apply changes to reach the desired state
    ///
    /// Only called after a probe found the resource diverged. Return a
    /// transient failure when the node is not ready yet.
    fn apply(&self, ctx: &mut ApplyContext) -> Result<()>;

    /// Retry budget for probe/apply cycles
    fn retry_policy(&self) -> RetryConfig {
        RetryConfig::no_retry()
    }
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;
