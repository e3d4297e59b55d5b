//! Inbound firewall rule resource

use converge::{ApplyContext, Resource, ResourceState, Result, Session};

use super::{probe_properties, ps_quote};

/// An enabled inbound allow rule for a set of TCP ports
#[derive(Debug, Clone)]
pub struct FirewallRule {
    pub name: String,
    pub ports: Vec<u16>,
}

impl FirewallRule {
    pub fn tcp_inbound(name: impl Into<String>, ports: impl IntoIterator<Item = u16>) -> Self {
        let mut ports: Vec<u16> = ports.into_iter().collect();
        ports.sort_unstable();
        ports.dedup();
        Self {
            name: name.into(),
            ports,
        }
    }

    fn port_list(&self) -> String {
        self.ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Resource for FirewallRule {
    fn id(&self) -> String {
        format!("firewall_rule:{}", self.name)
    }

    fn description(&self) -> String {
        format!("Firewall rule {} (TCP {})", self.name, self.port_list())
    }

    fn resource_type(&self) -> &'static str {
        "firewall_rule"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(
            session,
            &format!(
                "$r = Get-NetFirewallRule -DisplayName {} -ErrorAction SilentlyContinue | Select-Object -First 1\n\
                 if ($r) {{\n\
                 \x20   $p = $r | Get-NetFirewallPortFilter\n\
                 \x20   [pscustomobject]@{{ enabled = [string]$r.Enabled; direction = [string]$r.Direction; action = [string]$r.Action; protocol = [string]$p.Protocol; local_port = (@($p.LocalPort) | Sort-Object {{ [int]$_ }}) -join ',' }} | ConvertTo-Json -Compress\n\
                 }}",
                ps_quote(&self.name)
            ),
        )
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([
            ("enabled", "True".to_string()),
            ("direction", "Inbound".to_string()),
            ("action", "Allow".to_string()),
            ("protocol", "TCP".to_string()),
            ("local_port", self.port_list()),
        ])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        let name = ps_quote(&self.name);
        let ports = self.port_list();
        ctx.run(&format!(
            "if (Get-NetFirewallRule -DisplayName {name} -ErrorAction SilentlyContinue) {{\n\
             \x20   Set-NetFirewallRule -DisplayName {name} -Enabled True -Direction Inbound -Action Allow -Protocol TCP -LocalPort {ports}\n\
             }} else {{\n\
             \x20   New-NetFirewallRule -DisplayName {name} -Enabled True -Direction Inbound -Action Allow -Protocol TCP -LocalPort {ports} | Out-Null\n\
             }}"
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::testing::FakeSession;
    use converge::CommandOutput;

    #[test]
    fn test_ports_are_normalized() {
        let rule = FirewallRule::tcp_inbound("SQL Server", [5022, 1433, 1433]);
        assert_eq!(rule.port_list(), "1433,5022");
        assert_eq!(rule.id(), "firewall_rule:SQL Server");
    }

    #[test]
    fn test_disabled_rule_diverges() {
        let rule = FirewallRule::tcp_inbound("SQL Server", [1433]);
        let disabled = FakeSession::new("sql01").respond(
            "Get-NetFirewallRule",
            CommandOutput::ok(
                r#"{"enabled":"False","direction":"Inbound","action":"Allow","protocol":"TCP","local_port":"1433"}"#,
            ),
        );
        assert!(rule.needs_apply(&disabled).unwrap());

        let enabled = FakeSession::new("sql01").respond(
            "Get-NetFirewallRule",
            CommandOutput::ok(
                r#"{"enabled":"True","direction":"Inbound","action":"Allow","protocol":"TCP","local_port":"1433"}"#,
            ),
        );
        assert!(!rule.needs_apply(&enabled).unwrap());
    }
}
