//! Diff computation for resources

use crate::resource::Resource;
use crate::types::ResourceState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A diff between current and desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Unique identifier of the resource
    pub resource_id: String,
    /// Type of the resource
    pub resource_type: String,
    /// Human-readable description
    pub description: String,
    /// Current state
    pub current: ResourceState,
    /// Desired state
    pub desired: ResourceState,
}

impl ResourceDiff {
    /// Create a diff from a probed state, returning None if converged
    pub fn from_states(resource: &dyn Resource, current: &ResourceState) -> Option<Self> {
        let desired = resource.desired_state();
        if resource.is_converged(current, &desired) {
            return None;
        }

        Some(Self {
            resource_id: resource.id(),
            resource_type: resource.resource_type().to_string(),
            description: resource.description(),
            current: current.clone(),
            desired,
        })
    }

    /// Check if this diff represents an addition
    pub fn is_addition(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Absent, ResourceState::Present { .. })
        )
    }

    /// Check if this diff represents a removal
    pub fn is_removal(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Present { .. }, ResourceState::Absent)
        )
    }

    /// Desired properties whose live value differs, as (key, current, desired)
    pub fn changed_properties(&self) -> Vec<(String, Option<String>, String)> {
        let ResourceState::Present { properties: wanted } = &self.desired else {
            return Vec::new();
        };
        wanted
            .iter()
            .filter_map(|(key, value)| {
                let have = self.current.property(key);
                if have.is_some_and(|h| h.eq_ignore_ascii_case(value)) {
                    None
                } else {
                    Some((key.clone(), have.map(str::to_string), value.clone()))
                }
            })
            .collect()
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify
    pub modifications: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs<'a>(diffs: impl IntoIterator<Item = &'a ResourceDiff>) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            if diff.is_addition() {
                summary.additions += 1;
            } else if diff.is_removal() {
                summary.removals += 1;
            } else {
                summary.modifications += 1;
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by resource type
pub fn group_by_type<'a>(
    diffs: impl IntoIterator<Item = &'a ResourceDiff>,
) -> BTreeMap<String, Vec<&'a ResourceDiff>> {
    let mut groups: BTreeMap<String, Vec<&ResourceDiff>> = BTreeMap::new();
    for diff in diffs {
        groups
            .entry(diff.resource_type.clone())
            .or_default()
            .push(diff);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(current: ResourceState, desired: ResourceState) -> ResourceDiff {
        ResourceDiff {
            resource_id: "disk:E:".into(),
            resource_type: "disk".into(),
            description: "Disk E:".into(),
            current,
            desired,
        }
    }

    #[test]
    fn test_changed_properties() {
        let d = diff(
            ResourceState::present_with([("label", "New Volume"), ("file_system", "NTFS")]),
            ResourceState::present_with([("label", "SQLData"), ("file_system", "NTFS")]),
        );
        assert_eq!(
            d.changed_properties(),
            [(
                "label".to_string(),
                Some("New Volume".to_string()),
                "SQLData".to_string()
            )]
        );
        assert!(!d.is_addition());
    }

    #[test]
    fn test_summary_and_grouping() {
        let added = diff(
            ResourceState::Absent,
            ResourceState::present_with([("label", "SQLData")]),
        );
        let mut removed = diff(ResourceState::present(), ResourceState::Absent);
        removed.resource_type = "firewall_rule".into();

        let diffs = [added, removed];
        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.removals, 1);
        assert!(summary.has_changes());

        let groups = group_by_type(&diffs);
        assert_eq!(groups.keys().collect::<Vec<_>>(), ["disk", "firewall_rule"]);
    }
}
