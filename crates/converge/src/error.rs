//! Error taxonomy for reconciliation runs.
//!
//! Errors are categorized so the executor can decide whether to retry,
//! whether a failure stays local to one node, and whether the whole run
//! has to stop before any node is touched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The remote transport could not reach the node
    Unreachable,
    /// A dependency or barrier did not converge
    Precondition,
    /// Retryable failure (disk not yet visible, cluster not yet quorate)
    Transient,
    /// Non-retryable apply or probe failure
    Permanent,
    /// The declaration graph itself is broken (cycle, dangling reference)
    Authoring,
    /// Pre-flight input validation failed
    Validation,
}

impl ErrorCategory {
    /// Whether the executor should spend retry budget on this category.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether this category aborts the run before any node is contacted.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Authoring | Self::Validation)
    }

    /// Short user-facing description of the category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unreachable => "Node unreachable",
            Self::Precondition => "Precondition not met",
            Self::Transient => "Transient failure",
            Self::Permanent => "Permanent failure",
            Self::Authoring => "Configuration authoring error",
            Self::Validation => "Validation failure",
        }
    }
}

/// Errors produced while planning or reconciling a fleet.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileError {
    /// The remote transport could not connect to the node
    #[error("node {node} is unreachable: {message}")]
    UnreachableNode {
        /// Name of the node
        node: String,
        /// Transport-level detail
        message: String,
    },

    /// A dependency failed, or an awaited barrier was never reached
    #[error("precondition not met for {resource}: {reason}")]
    PreconditionNotMet {
        /// Identity of the blocked resource
        resource: String,
        /// Which dependency or barrier blocked it
        reason: String,
    },

    /// Retryable failure, consumed by the retry budget
    #[error("transient failure: {message}")]
    TransientFailure {
        /// What was not ready yet
        message: String,
    },

    /// Non-retryable failure
    #[error("permanent failure: {message}")]
    PermanentFailure {
        /// What went wrong
        message: String,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Declarations on the cycle, first one repeated at the end
        cycle: Vec<String>,
    },

    /// A declaration refers to something that does not exist in the plan
    #[error("unresolved reference from {from}: {reference}")]
    UnresolvedReference {
        /// Declaration holding the reference
        from: String,
        /// The reference that could not be resolved
        reference: String,
    },

    /// Pre-flight validation failed; every problem found is listed
    #[error("validation failed: {}", problems.join("; "))]
    ValidationFailure {
        /// All problems found, in check order
        problems: Vec<String>,
    },
}

impl ReconcileError {
    /// Build a transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientFailure {
            message: message.into(),
        }
    }

    /// Build a permanent failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::PermanentFailure {
            message: message.into(),
        }
    }

    /// Build an unreachable-node error.
    pub fn unreachable(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnreachableNode {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Build a precondition error for a blocked resource.
    pub fn precondition(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PreconditionNotMet {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnreachableNode { .. } => ErrorCategory::Unreachable,
            Self::PreconditionNotMet { .. } => ErrorCategory::Precondition,
            Self::TransientFailure { .. } => ErrorCategory::Transient,
            Self::PermanentFailure { .. } => ErrorCategory::Permanent,
            Self::CycleDetected { .. } | Self::UnresolvedReference { .. } => {
                ErrorCategory::Authoring
            }
            Self::ValidationFailure { .. } => ErrorCategory::Validation,
        }
    }

    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error aborts the run before any node is touched.
    pub fn is_fatal_for_run(&self) -> bool {
        self.category().is_fatal_for_run()
    }

    /// Treat a failed command as retryable.
    ///
    /// For actions a peer may not be ready for yet, like joining a cluster
    /// that has no quorum. Other categories are returned unchanged.
    pub fn into_transient(self) -> Self {
        match self {
            Self::PermanentFailure { message } => Self::TransientFailure { message },
            other => other,
        }
    }

    /// Escalate a transient failure once the retry budget is spent.
    ///
    /// Non-transient errors are returned unchanged.
    pub fn escalate(self, attempts: u32) -> Self {
        match self {
            Self::TransientFailure { message } => Self::PermanentFailure {
                message: format!("gave up after {attempts} attempts: {message}"),
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for ReconcileError {
    fn from(err: std::io::Error) -> Self {
        Self::permanent(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(format!("malformed probe output: {err}"))
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
