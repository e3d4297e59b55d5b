//! Deployment configurations
//!
//! Each configuration declares its resources for every node it applies to.
//! They are instantiated in a fixed order (storage, server, install,
//! cluster, availability group) so later ones can depend on declarations
//! made by earlier ones through their names.

use converge::{Configuration, ReconcileError, Result, TargetNode};

use crate::config::DeploymentConfig;

pub mod availability_group;
pub mod cluster;
pub mod install;
pub mod server;
pub mod storage;

pub use availability_group::AvailabilityGroupConfiguration;
pub use cluster::ClusterConfiguration;
pub use install::InstallConfiguration;
pub use server::ServerConfiguration;
pub use storage::StorageConfiguration;

/// Published by the primary once the cluster exists
pub const CLUSTER_CREATED: &str = "cluster-created";
/// Published by the primary once the availability group exists
pub const AG_CREATED: &str = "ag-created";

const DRIVE_COUNT: &str = "drive_count";
const OPTICAL_DRIVE: &str = "optical_drive";

/// Per-node settings, carried on the node as attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub drive_count: u8,
    pub optical_drive: bool,
}

impl NodeSpec {
    /// Read the settings back from a node's attributes
    pub fn of(node: &TargetNode) -> Result<Self> {
        let attribute = |key: &str| {
            node.attributes.get(key).ok_or_else(|| {
                ReconcileError::permanent(format!("node {} has no {key} attribute", node.name))
            })
        };
        let drive_count = attribute(DRIVE_COUNT)?.parse().map_err(|_| {
            ReconcileError::permanent(format!("node {}: bad drive count", node.name))
        })?;
        let optical_drive = attribute(OPTICAL_DRIVE)? == "true";
        Ok(Self {
            drive_count,
            optical_drive,
        })
    }
}

/// Target nodes in operator order, the first one Primary
pub fn target_nodes(config: &DeploymentConfig) -> Vec<TargetNode> {
    let names: Vec<&str> = config.nodes.iter().map(|n| n.name.as_str()).collect();
    TargetNode::from_machine_list(&names)
        .into_iter()
        .zip(&config.nodes)
        .map(|(node, entry)| {
            let drive_count = config.drive_count_for(&entry.name);
            node.with_attribute(DRIVE_COUNT, drive_count.to_string())
                .with_attribute(OPTICAL_DRIVE, entry.optical_drive.to_string())
        })
        .collect()
}

/// Every configuration the deployment asks for, in declaration order
pub fn for_deployment(config: &DeploymentConfig) -> Vec<Box<dyn Configuration>> {
    let mut configurations: Vec<Box<dyn Configuration>> = Vec::new();
    if !config.skip_drive_config {
        configurations.push(Box::new(StorageConfiguration::from_config(config)));
    }
    configurations.push(Box::new(ServerConfiguration::from_config(config)));
    if !config.skip_install {
        configurations.push(Box::new(InstallConfiguration::from_config(config)));
    }
    if let Some(cluster) = ClusterConfiguration::from_config(config) {
        configurations.push(Box::new(cluster));
    }
    if let Some(ag) = AvailabilityGroupConfiguration::from_config(config) {
        configurations.push(Box::new(ag));
    }
    configurations
}
