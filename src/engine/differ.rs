//! Diff display - what the probes found against what is declared

use colored::Colorize;
use converge::diff::group_by_type;
use converge::{DiffSummary, ResourceDiff, RunReport};

use super::planner::{matches_filter, parse_target};

/// Diffs recorded in a report, per node, narrowed by an optional target
pub fn collect_diffs<'a>(
    report: &'a RunReport,
    target: Option<&str>,
) -> Vec<(&'a str, Vec<&'a ResourceDiff>)> {
    let (type_filter, name) = target.map(parse_target).unwrap_or_default();
    report
        .nodes
        .iter()
        .map(|node| {
            let diffs = node
                .results
                .iter()
                .filter_map(|r| r.diff.as_ref())
                .filter(|d| {
                    matches_filter(
                        &d.resource_type,
                        &d.resource_id,
                        type_filter.as_deref(),
                        name.as_deref(),
                    )
                })
                .collect();
            (node.node.name.as_str(), diffs)
        })
        .collect()
}

fn type_name(resource_type: &str) -> &str {
    match resource_type {
        "disk" => "Disks",
        "wait_for_disk" => "Disks (attach)",
        "optical_drive" => "Optical drive",
        "time_zone" => "Time zone",
        "power_plan" => "Power plan",
        "firewall_rule" => "Firewall rules",
        "directory_copy" => "Installation media",
        "sql_instance" => "SQL Server",
        "windows_service" => "Services",
        "registry_value" => "Registry",
        "cluster_node" => "Failover cluster",
        "wait_for_cluster" => "Failover cluster (reachable)",
        "ag_replica" => "Availability group",
        "pause" => "Pauses",
        _ => resource_type,
    }
}

/// Display one node's diffs in a box, grouped by resource type
pub fn display_diff(node: &str, diffs: &[&ResourceDiff]) {
    if diffs.is_empty() {
        println!();
        println!("  {} {} is converged", "✓".green(), node.bold());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        node.bold()
    );
    println!("│");

    for (resource_type, type_diffs) in group_by_type(diffs.iter().copied()) {
        println!("│ {}", type_name(&resource_type).bold());

        for diff in type_diffs {
            let symbol = if diff.is_addition() {
                "+".green()
            } else if diff.is_removal() {
                "-".red()
            } else {
                "~".yellow()
            };
            println!("│   {} {}", symbol, diff.description);

            for (key, current, desired) in diff.changed_properties() {
                println!(
                    "│       {:<18} {}",
                    key.dimmed(),
                    format!("{} → {desired}", current.as_deref().unwrap_or("(none)")).dimmed()
                );
            }
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs.iter().copied());
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} to create, {} to modify)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{ExecutionOutcome, ExecutionResult, NodeReport, NodeRole, ResourceState, TargetNode};

    fn result(id: &str, resource_type: &str, diff: bool) -> ExecutionResult {
        ExecutionResult {
            resource_id: id.into(),
            resource_type: resource_type.into(),
            description: id.into(),
            outcome: ExecutionOutcome::Skipped {
                reason: "dry run".into(),
            },
            attempts: 1,
            diff: diff.then(|| ResourceDiff {
                resource_id: id.into(),
                resource_type: resource_type.into(),
                description: id.into(),
                current: ResourceState::Absent,
                desired: ResourceState::present(),
            }),
        }
    }

    fn report() -> RunReport {
        let mut node = NodeReport::new(TargetNode::new("sql01", NodeRole::Primary));
        node.results.push(result("disk:E:", "disk", true));
        node.results.push(result("disk:F:", "disk", false));
        node.results.push(result("cluster_node:C1:create", "cluster_node", true));
        RunReport { nodes: vec![node] }
    }

    #[test]
    fn test_collect_skips_converged_results() {
        let report = report();
        let diffs = collect_diffs(&report, None);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].0, "sql01");
        assert_eq!(diffs[0].1.len(), 2);
    }

    #[test]
    fn test_collect_honours_target() {
        let report = report();
        let diffs = collect_diffs(&report, Some("cluster"));
        let ids: Vec<&str> = diffs[0].1.iter().map(|d| d.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["cluster_node:C1:create"]);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name("ag_replica"), "Availability group");
        assert_eq!(type_name("custom"), "custom");
    }
}
