//! Pre-flight validation
//!
//! Every check runs; problems are collected and reported together as one
//! `ValidationFailure` before any plan is built or node contacted.

use converge::ReconcileError;
use regex::Regex;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use crate::config::DeploymentConfig;
use crate::layout::DriveLayout;

/// NetBIOS computer name: 1-15 characters, letters, digits and hyphens
static NETBIOS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,14}$").expect("NetBIOS pattern is valid")
});

/// A node address: a NetBIOS name, optionally followed by a DNS suffix
static NODE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,14}(\.[A-Za-z0-9-]+)*$")
        .expect("node address pattern is valid")
});

/// Collect every problem with `config`.
///
/// `password` is the value of the configured password variable, if set.
pub fn check(config: &DeploymentConfig, password: Option<&str>) -> Vec<String> {
    let mut problems = Vec::new();
    check_nodes(config, &mut problems);
    check_credential(config, password, &mut problems);
    check_install(config, &mut problems);
    check_storage(config, &mut problems);
    check_server(config, &mut problems);
    check_cluster(config, &mut problems);
    problems
}

/// Run every check and fail once with all problems
pub fn preflight(config: &DeploymentConfig, password: Option<&str>) -> converge::Result<()> {
    let problems = check(config, password);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::ValidationFailure { problems })
    }
}

fn check_nodes(config: &DeploymentConfig, problems: &mut Vec<String>) {
    if config.nodes.is_empty() {
        problems.push("no target nodes given".to_string());
        return;
    }

    let mut seen = HashSet::new();
    for node in &config.nodes {
        if !NODE_ADDRESS.is_match(&node.name) {
            problems.push(format!("'{}' is not a valid computer name", node.name));
        }
        if !seen.insert(node.name.to_lowercase()) {
            problems.push(format!("node '{}' is listed more than once", node.name));
        }
        if let Some(count) = node.drive_count
            && !DriveLayout::SUPPORTED.contains(&count)
        {
            problems.push(format!(
                "node '{}': drive count {count} is not supported (use 1 or 5)",
                node.name
            ));
        }
    }
}

fn check_credential(config: &DeploymentConfig, password: Option<&str>, problems: &mut Vec<String>) {
    if config.credential.user.as_deref().is_none_or(str::is_empty) {
        problems.push("no installation account given (--user)".to_string());
    }
    if password.is_none_or(str::is_empty) {
        problems.push(format!(
            "password variable {} is not set",
            config.credential.password_env
        ));
    }
}

fn check_install(config: &DeploymentConfig, problems: &mut Vec<String>) {
    if config.skip_install {
        return;
    }

    match &config.install.source {
        None => problems.push("no install source given (--install-source)".to_string()),
        Some(source) if !source.is_dir() => {
            problems.push(format!("install source {} does not exist", source.display()));
        }
        Some(source) if !source.join("setup.exe").is_file() => {
            problems.push(format!(
                "install source {} has no setup.exe",
                source.display()
            ));
        }
        Some(_) => {}
    }

    if config
        .install
        .sysadmin_group
        .as_deref()
        .is_none_or(str::is_empty)
    {
        problems.push("no sysadmin group given (--sysadmin-group)".to_string());
    }
    if config.install.instance.is_empty() {
        problems.push("instance name is empty".to_string());
    }
}

fn check_storage(config: &DeploymentConfig, problems: &mut Vec<String>) {
    if config.skip_drive_config {
        return;
    }
    if !DriveLayout::SUPPORTED.contains(&config.storage.drive_count) {
        problems.push(format!(
            "drive count {} is not supported (use 1 or 5)",
            config.storage.drive_count
        ));
    }
    if !config.storage.optical_drive_letter.is_ascii_alphabetic() {
        problems.push(format!(
            "optical drive letter '{}' is not a drive letter",
            config.storage.optical_drive_letter
        ));
    }
}

fn check_server(config: &DeploymentConfig, problems: &mut Vec<String>) {
    if config.server.time_zone.trim().is_empty() {
        problems.push("time zone is empty".to_string());
    }
    if config.server.firewall_ports.contains(&0) {
        problems.push("firewall port 0 is not valid".to_string());
    }
}

fn check_cluster(config: &DeploymentConfig, problems: &mut Vec<String>) {
    if !config.wants_cluster() {
        return;
    }

    match config.cluster.name.as_deref() {
        None | Some("") => problems.push("no cluster name given (--cluster-name)".to_string()),
        Some(name) if !NETBIOS_NAME.is_match(name) => {
            problems.push(format!("cluster name '{name}' is not a valid NetBIOS name"));
        }
        Some(_) => {}
    }
    if let Some(ip) = &config.cluster.ip
        && ip.parse::<Ipv4Addr>().is_err()
    {
        problems.push(format!("cluster IP '{ip}' is not an IPv4 address"));
    }

    let ag = &config.availability_group;
    if !ag.enabled {
        return;
    }
    if ag.name.as_deref().is_none_or(str::is_empty) {
        problems.push("no availability group name given (--ag-name)".to_string());
    }
    match ag.listener_name.as_deref() {
        None | Some("") => {
            problems.push("no listener name given (--listener-name)".to_string());
        }
        Some(name) if !NETBIOS_NAME.is_match(name) => {
            problems.push(format!("listener name '{name}' is not a valid NetBIOS name"));
        }
        Some(_) => {}
    }
    if ag.listener_port == 0 {
        problems.push("listener port 0 is not valid".to_string());
    }
    if let Some(ip) = &ag.listener_ip
        && ip.parse::<Ipv4Addr>().is_err()
    {
        problems.push(format!("listener IP '{ip}' is not an IPv4 address"));
    }
    if config.nodes.len() < 2 {
        problems.push("an availability group needs at least two nodes".to_string());
    }
}
