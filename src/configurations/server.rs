//! Server configuration - time zone, power plan and firewall

use converge::{Configuration, NodeConfiguration, Result, TargetNode};

use crate::config::DeploymentConfig;
use crate::resource::{FirewallRule, PowerPlan, TimeZone};

#[derive(Debug, Clone)]
pub struct ServerConfiguration {
    pub time_zone: String,
    pub power_plan: String,
    pub sql_ports: Vec<u16>,
    /// Mirroring endpoint port, when an availability group is built
    pub endpoint_port: Option<u16>,
}

impl ServerConfiguration {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        let ag = &config.availability_group;
        let mut sql_ports = config.server.firewall_ports.clone();
        if ag.enabled {
            sql_ports.push(ag.listener_port);
        }
        Self {
            time_zone: config.server.time_zone.clone(),
            power_plan: config.server.power_plan.clone(),
            sql_ports,
            endpoint_port: ag.enabled.then_some(ag.endpoint_port),
        }
    }
}

impl Configuration for ServerConfiguration {
    fn name(&self) -> &str {
        "server"
    }

    fn declare(&self, _node: &TargetNode, out: &mut NodeConfiguration) -> Result<()> {
        out.declare("TimeZone", TimeZone::new(&self.time_zone));
        out.declare("PowerPlan", PowerPlan::new(&self.power_plan));
        out.declare(
            "Firewall_SQLServer",
            FirewallRule::tcp_inbound("SQL Server", self.sql_ports.iter().copied()),
        );
        if let Some(port) = self.endpoint_port {
            out.declare(
                "Firewall_HADR",
                FirewallRule::tcp_inbound("SQL Server HADR endpoint", [port]),
            );
        }
        Ok(())
    }
}
