//! Execution planner - deployment config to run plan, plus target filters

use colored::Colorize;
use converge::{Configuration, PlannedDeclaration, RunPlan};

use crate::config::DeploymentConfig;
use crate::configurations::{for_deployment, target_nodes};

/// Compile the deployment into an ordered, cycle-checked plan
pub fn build_plan(config: &DeploymentConfig) -> converge::Result<RunPlan> {
    let configurations = for_deployment(config);
    let refs: Vec<&dyn Configuration> = configurations.iter().map(Box::as_ref).collect();
    RunPlan::build(target_nodes(config), &refs)
}

/// Parse a target string like "disks.SQLData" into (resource_type, name)
pub fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = target.split('.').collect();
    match parts.len() {
        1 => (Some(parts[0].to_string()), None),
        2 => (Some(parts[0].to_string()), Some(parts[1].to_string())),
        _ => (None, Some(target.to_string())),
    }
}

/// Check if a resource matches the filter
pub fn matches_filter(
    resource_type: &str,
    resource_id: &str,
    type_filter: Option<&str>,
    name: Option<&str>,
) -> bool {
    if let Some(rt) = type_filter {
        let matches_type = match rt {
            "disks" | "storage" => {
                matches!(resource_type, "disk" | "wait_for_disk" | "optical_drive")
            }
            "cluster" => matches!(resource_type, "cluster_node" | "wait_for_cluster"),
            "ag" => resource_type == "ag_replica",
            "firewall" => resource_type == "firewall_rule",
            "server" => matches!(resource_type, "time_zone" | "power_plan" | "firewall_rule"),
            "sql" | "install" => matches!(
                resource_type,
                "sql_instance" | "directory_copy" | "windows_service" | "registry_value"
            ),
            _ => resource_type == rt,
        };
        if !matches_type {
            return false;
        }
    }

    if let Some(n) = name
        && !resource_id.to_lowercase().contains(&n.to_lowercase())
    {
        return false;
    }

    true
}

/// Print every node's declarations in execution order
pub fn display_plan(plan: &RunPlan, target: Option<&str>) {
    let (type_filter, name) = target.map(parse_target).unwrap_or_default();

    for node in &plan.nodes {
        let declarations: Vec<PlannedDeclaration> = node
            .describe()
            .into_iter()
            .filter(|d| {
                matches_filter(&d.resource_type, &d.resource_id, type_filter.as_deref(), name.as_deref())
            })
            .collect();

        println!();
        println!(
            "{} {} {}",
            node.node.name.bold(),
            format!("({})", node.node.role).dimmed(),
            format!("{} declarations", declarations.len()).dimmed()
        );

        for (i, d) in declarations.iter().enumerate() {
            println!("  {:>3}. {:<24} {}", i + 1, d.name, d.description.dimmed());
            if !d.depends_on.is_empty() {
                let label = if d.after_change { "only if changed" } else { "after" };
                println!("       {} {}", label.dimmed(), d.depends_on.join(", "));
            }
            for barrier in &d.awaits {
                println!("       {} {}", "awaits".yellow(), barrier);
            }
            if let Some(barrier) = &d.publishes {
                println!("       {} {}", "publishes".green(), barrier);
            }
        }
    }
}
