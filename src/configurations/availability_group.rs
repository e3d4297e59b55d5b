//! Availability group configuration
//!
//! Runs after the cluster and SQL Server are in place on a node. The primary
//! creates the group and listener and publishes `ag-created`; secondaries
//! wait for it, then add themselves.

use converge::{Barrier, Configuration, NodeConfiguration, Result, RetryConfig, TargetNode};

use super::AG_CREATED;
use super::cluster::CLUSTER_READY;
use crate::config::DeploymentConfig;
use crate::resource::{AgReplica, Listener, ReplicaRole};

#[derive(Debug, Clone)]
pub struct AvailabilityGroupConfiguration {
    pub name: String,
    pub instance: String,
    pub listener: Listener,
    pub endpoint_port: u16,
    pub service_account: Option<String>,
    /// Node the group is created on
    pub primary: String,
    pub policy: RetryConfig,
}

impl AvailabilityGroupConfiguration {
    /// `None` unless an availability group was asked for
    pub fn from_config(config: &DeploymentConfig) -> Option<Self> {
        let ag = &config.availability_group;
        if !ag.enabled {
            return None;
        }
        Some(Self {
            name: ag.name.clone().unwrap_or_default(),
            instance: config.install.instance.clone(),
            listener: Listener {
                name: ag.listener_name.clone().unwrap_or_default(),
                port: ag.listener_port,
                ip: ag.listener_ip.clone(),
            },
            endpoint_port: ag.endpoint_port,
            service_account: config.install.service_account.clone(),
            primary: config.nodes.first().map(|n| n.name.clone()).unwrap_or_default(),
            policy: config.retry.cluster.to_retry_config(),
        })
    }

    fn replica(&self, role: ReplicaRole) -> AgReplica {
        AgReplica::new(&self.name, &self.instance, role)
            .with_endpoint_port(self.endpoint_port)
            .with_service_account(self.service_account.clone())
            .with_policy(self.policy.clone())
    }
}

impl Configuration for AvailabilityGroupConfiguration {
    fn name(&self) -> &str {
        "availability_group"
    }

    fn declare(&self, node: &TargetNode, out: &mut NodeConfiguration) -> Result<()> {
        let (name, membership) = if node.is_primary() {
            ("AgPrimary", "ClusterCreate")
        } else {
            ("AgSecondary", "ClusterJoin")
        };
        let cluster = out
            .find(CLUSTER_READY)
            .map_or_else(|| out.require(name, membership), Ok)?;
        // Absent when SQL Server is already installed
        let install = out.find("SqlInstall");

        if node.is_primary() {
            let role = ReplicaRole::Primary {
                listener: self.listener.clone(),
            };
            out.declare(name, self.replica(role))
                .depends_on(cluster)
                .depends_on_all(install)
                .publishes(Barrier::new(AG_CREATED));
        } else {
            let role = ReplicaRole::Secondary {
                primary: self.primary.clone(),
            };
            out.declare(name, self.replica(role))
                .depends_on(cluster)
                .depends_on_all(install)
                .awaits(Barrier::new(AG_CREATED));
        }
        Ok(())
    }
}
