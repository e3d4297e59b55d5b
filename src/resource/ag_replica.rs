//! Availability group replica resource
//!
//! Every replica needs HADR enabled, a mirroring endpoint and CONNECT on it
//! for the service account. The primary then creates the group and its
//! listener; a secondary is added from the primary and joins.

use converge::{
    ApplyContext, ReconcileError, Resource, ResourceState, Result, RetryConfig, Session,
};

use super::{probe_properties, ps_quote};
use super::sql_instance::sql_target;

const ENDPOINT_NAME: &str = "hadr_endpoint";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub port: u16,
    /// Static address; DHCP when unset
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaRole {
    Primary { listener: Listener },
    /// Joined from the named primary node
    Secondary { primary: String },
}

#[derive(Debug, Clone)]
pub struct AgReplica {
    pub ag_name: String,
    pub instance: String,
    pub role: ReplicaRole,
    pub endpoint_port: u16,
    pub service_account: Option<String>,
    pub policy: RetryConfig,
}

impl AgReplica {
    pub fn new(ag_name: impl Into<String>, instance: impl Into<String>, role: ReplicaRole) -> Self {
        Self {
            ag_name: ag_name.into(),
            instance: instance.into(),
            role,
            endpoint_port: 5022,
            service_account: None,
            policy: RetryConfig::cluster_wait(),
        }
    }

    pub fn with_endpoint_port(mut self, port: u16) -> Self {
        self.endpoint_port = port;
        self
    }

    pub fn with_service_account(mut self, account: Option<String>) -> Self {
        self.service_account = account;
        self
    }

    pub fn with_policy(mut self, policy: RetryConfig) -> Self {
        self.policy = policy;
        self
    }

    fn role_name(&self) -> &'static str {
        match self.role {
            ReplicaRole::Primary { .. } => "Primary",
            ReplicaRole::Secondary { .. } => "Secondary",
        }
    }

    /// HADR, endpoint and endpoint permission; shared by both roles
    fn replica_prelude(&self) -> String {
        let grant = self
            .service_account
            .as_deref()
            .map(|account| {
                format!(
                    "Grant-DbaAgPermission -SqlInstance $inst -Login {} -Type Endpoint -Permission Connect -Confirm:$false | Out-Null\n",
                    ps_quote(account)
                )
            })
            .unwrap_or_default();
        format!(
            "$inst = {target}\n\
             if (-not (Connect-DbaInstance -SqlInstance $inst).IsHadrEnabled) {{ Enable-DbaAgHadr -SqlInstance $inst -Force -Confirm:$false | Out-Null }}\n\
             if (-not (Get-DbaEndpoint -SqlInstance $inst -Type DatabaseMirroring)) {{\n\
             \x20   New-DbaEndpoint -SqlInstance $inst -Name {endpoint} -Type DatabaseMirroring -Port {port} -Confirm:$false | Start-DbaEndpoint | Out-Null\n\
             }}\n\
             {grant}",
            target = sql_target(&self.instance),
            endpoint = ps_quote(ENDPOINT_NAME),
            port = self.endpoint_port,
        )
    }

    fn apply_script(&self) -> String {
        let ag = ps_quote(&self.ag_name);
        let body = match &self.role {
            ReplicaRole::Primary { listener } => {
                let address = match &listener.ip {
                    Some(ip) => format!("-IPAddress {}", ps_quote(ip)),
                    None => "-Dhcp".to_string(),
                };
                format!(
                    "if (-not (Get-DbaAvailabilityGroup -SqlInstance $inst -AvailabilityGroup {ag})) {{\n\
                     \x20   New-DbaAvailabilityGroup -Primary $inst -Name {ag} -ClusterType Wsfc -SeedingMode Automatic -Confirm:$false | Out-Null\n\
                     }}\n\
                     if (-not (Get-DbaAgListener -SqlInstance $inst -AvailabilityGroup {ag})) {{\n\
                     \x20   Add-DbaAgListener -SqlInstance $inst -AvailabilityGroup {ag} -Name {name} -Port {port} {address} -Confirm:$false | Out-Null\n\
                     }}",
                    name = ps_quote(&listener.name),
                    port = listener.port,
                )
            }
            ReplicaRole::Secondary { primary } => format!(
                "$group = Get-DbaAvailabilityGroup -SqlInstance {primary} -AvailabilityGroup {ag}\n\
                 if (-not ($group.AvailabilityReplicas | Where-Object Name -eq $inst)) {{\n\
                 \x20   Add-DbaAgReplica -SqlInstance $inst -InputObject $group -SeedingMode Automatic -Confirm:$false | Out-Null\n\
                 }}\n\
                 if (-not (Get-DbaAvailabilityGroup -SqlInstance $inst -AvailabilityGroup {ag})) {{\n\
                 \x20   Join-DbaAvailabilityGroup -SqlInstance $inst -AvailabilityGroup {ag} -Confirm:$false | Out-Null\n\
                 }}\n\
                 Grant-DbaAgPermission -SqlInstance $inst -AvailabilityGroup {ag} -Type AvailabilityGroup -Permission CreateAnyDatabase -Confirm:$false | Out-Null",
                primary = ps_quote(primary),
            ),
        };
        format!("{}{body}", self.replica_prelude())
    }
}

impl Resource for AgReplica {
    fn id(&self) -> String {
        format!("ag_replica:{}:{}", self.ag_name, self.role_name().to_lowercase())
    }

    fn description(&self) -> String {
        match &self.role {
            ReplicaRole::Primary { listener } => format!(
                "Availability group {} with listener {}:{}",
                self.ag_name, listener.name, listener.port
            ),
            ReplicaRole::Secondary { primary } => {
                format!("Join availability group {} from {primary}", self.ag_name)
            }
        }
    }

    fn resource_type(&self) -> &'static str {
        "ag_replica"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        let ag = ps_quote(&self.ag_name);
        probe_properties(
            session,
            &format!(
                "$inst = {target}\n\
                 $server = Connect-DbaInstance -SqlInstance $inst\n\
                 $group = Get-DbaAvailabilityGroup -SqlInstance $inst -AvailabilityGroup {ag}\n\
                 [pscustomobject]@{{\n\
                 \x20   hadr = [string]$server.IsHadrEnabled\n\
                 \x20   endpoint = [string][bool](Get-DbaEndpoint -SqlInstance $inst -Type DatabaseMirroring)\n\
                 \x20   role = [string]$group.LocalReplicaRole\n\
                 \x20   listener = (Get-DbaAgListener -SqlInstance $inst -AvailabilityGroup {ag} | Select-Object -First 1).Name\n\
                 }} | ConvertTo-Json -Compress",
                target = sql_target(&self.instance),
            ),
        )
    }

    fn desired_state(&self) -> ResourceState {
        let mut properties = vec![
            ("hadr", "True".to_string()),
            ("endpoint", "True".to_string()),
            ("role", self.role_name().to_string()),
        ];
        if let ReplicaRole::Primary { listener } = &self.role {
            properties.push(("listener", listener.name.clone()));
        }
        ResourceState::present_with(properties)
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(&self.apply_script())
            .map_err(ReconcileError::into_transient)?;
        Ok(())
    }

    fn retry_policy(&self) -> RetryConfig {
        self.policy.clone()
    }
}
