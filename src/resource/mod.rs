//! Windows and SQL Server resources
//!
//! Every resource probes its node with a PowerShell script that prints one
//! compressed JSON object (or nothing when the thing is missing), and
//! applies with a script built from its desired properties.

use converge::{Properties, ReconcileError, ResourceState, Result, Session};
use serde_json::Value;

pub mod ag_replica;
pub mod cluster;
pub mod directory_copy;
pub mod disk;
pub mod firewall_rule;
pub mod pause;
pub mod power_plan;
pub mod registry_value;
pub mod sql_instance;
pub mod time_zone;
pub mod windows_service;

pub use ag_replica::{AgReplica, Listener, ReplicaRole};
pub use cluster::{ClusterNode, WaitForCluster};
pub use directory_copy::DirectoryCopy;
pub use disk::{Disk, OpticalDrive, WaitForDisk};
pub use firewall_rule::FirewallRule;
pub use pause::Pause;
pub use power_plan::PowerPlan;
pub use registry_value::RegistryValue;
pub use sql_instance::SqlInstance;
pub use time_zone::TimeZone;
pub use windows_service::{StartupType, WindowsService};

/// Quote a string as a PowerShell single-quoted literal
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Run a probe script and read its JSON object as properties.
///
/// Empty output means the resource is absent.
pub fn probe_properties(session: &dyn Session, script: &str) -> Result<ResourceState> {
    let stdout = session.run_capture(script)?;
    parse_properties(stdout.trim())
}

/// Parse probe output into a resource state
pub fn parse_properties(output: &str) -> Result<ResourceState> {
    if output.is_empty() {
        return Ok(ResourceState::Absent);
    }

    let value: Value = serde_json::from_str(output)?;
    let Value::Object(map) = value else {
        return Err(ReconcileError::permanent(format!(
            "probe printed {output}, expected a JSON object"
        )));
    };

    let properties: Properties = map
        .into_iter()
        .filter_map(|(key, value)| property_text(value).map(|text| (key, text)))
        .collect();
    Ok(ResourceState::Present { properties })
}

fn property_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ps_quote_escapes_single_quotes() {
        assert_eq!(ps_quote("SQL Server"), "'SQL Server'");
        assert_eq!(ps_quote("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_parse_properties() {
        let state =
            parse_properties(r#"{"label":"SQLData","size":536870912000,"healthy":true,"path":null}"#)
                .unwrap();
        assert_eq!(state.property("label"), Some("SQLData"));
        assert_eq!(state.property("size"), Some("536870912000"));
        assert_eq!(state.property("healthy"), Some("true"));
        assert_eq!(state.property("path"), None);
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert_eq!(parse_properties("").unwrap(), ResourceState::Absent);
        assert!(parse_properties("[1,2]").is_err());
        assert!(parse_properties("not json").is_err());
    }
}
