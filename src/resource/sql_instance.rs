//! SQL Server instance resource
//!
//! Installation itself is dbatools' `Install-DbaInstance` running against the
//! media already copied to the node. The probe only asks the registry
//! whether the instance is registered.

use converge::{ApplyContext, Resource, ResourceState, Result, Session};

use super::{probe_properties, ps_quote};
use crate::layout::SqlPaths;

const INSTANCE_NAMES_KEY: &str = r"HKLM:\SOFTWARE\Microsoft\Microsoft SQL Server\Instance Names\SQL";

/// PowerShell expression naming `instance` on the local node
pub fn sql_target(instance: &str) -> String {
    if instance.eq_ignore_ascii_case("MSSQLSERVER") {
        "$env:COMPUTERNAME".to_string()
    } else {
        format!("\"$env:COMPUTERNAME\\{instance}\"")
    }
}

#[derive(Debug, Clone)]
pub struct SqlInstance {
    pub instance: String,
    /// Major release, e.g. `2022`
    pub version: String,
    /// Install media directory on the node
    pub media_path: String,
    pub features: Vec<String>,
    pub collation: String,
    pub sysadmin_group: String,
    pub service_account: Option<String>,
    /// Data, log, tempdb and backup directories; installer defaults if unset
    pub paths: Option<SqlPaths>,
}

impl SqlInstance {
    fn install_script(&self) -> String {
        let mut args = vec![
            format!("-SqlInstance {}", sql_target(&self.instance)),
            format!("-Version {}", self.version),
            format!("-Path {}", ps_quote(&self.media_path)),
            format!("-InstanceName {}", ps_quote(&self.instance)),
            format!(
                "-Feature {}",
                self.features
                    .iter()
                    .map(|f| ps_quote(f))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            format!("-SqlCollation {}", ps_quote(&self.collation)),
            format!("-AdminAccount {}", ps_quote(&self.sysadmin_group)),
            "-PerformVolumeMaintenanceTasks".to_string(),
            "-Confirm:$false".to_string(),
        ];

        let mut config = Vec::new();
        if let Some(paths) = &self.paths {
            args.push(format!("-DataPath {}", ps_quote(&paths.data)));
            args.push(format!("-LogPath {}", ps_quote(&paths.log)));
            args.push(format!("-TempPath {}", ps_quote(&paths.tempdb)));
            args.push(format!("-BackupPath {}", ps_quote(&paths.backup)));
            config.push(format!("SQLTEMPDBLOGDIR = {}", ps_quote(&paths.tempdb_log)));
        }
        if let Some(account) = &self.service_account {
            config.push(format!("SQLSVCACCOUNT = {}", ps_quote(account)));
            config.push(format!("AGTSVCACCOUNT = {}", ps_quote(account)));
        }
        if !config.is_empty() {
            args.push(format!("-Configuration @{{ {} }}", config.join("; ")));
        }

        format!(
            "$result = Install-DbaInstance {}\n\
             if (-not $result.Successful) {{ throw \"Install-DbaInstance failed: $($result.Notes -join '; ')\" }}",
            args.join(" ")
        )
    }
}

impl Resource for SqlInstance {
    fn id(&self) -> String {
        format!("sql_instance:{}", self.instance)
    }

    fn description(&self) -> String {
        format!("SQL Server {} instance {}", self.version, self.instance)
    }

    fn resource_type(&self) -> &'static str {
        "sql_instance"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        let instance = ps_quote(&self.instance);
        probe_properties(
            session,
            &format!(
                "$names = Get-ItemProperty -Path {key} -ErrorAction SilentlyContinue\n\
                 if ($names -and $names.{instance}) {{\n\
                 \x20   $setup = Get-ItemProperty -Path \"HKLM:\\SOFTWARE\\Microsoft\\Microsoft SQL Server\\$($names.{instance})\\Setup\"\n\
                 \x20   [pscustomobject]@{{ instance = {instance}; build = [string]$setup.Version; edition = [string]$setup.Edition }} | ConvertTo-Json -Compress\n\
                 }}",
                key = ps_quote(INSTANCE_NAMES_KEY),
            ),
        )
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([("instance", self.instance.as_str())])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(&self.install_script())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DriveLayout;
    use converge::testing::FakeSession;
    use converge::CommandOutput;

    fn instance() -> SqlInstance {
        SqlInstance {
            instance: "MSSQLSERVER".into(),
            version: "2022".into(),
            media_path: r"C:\SQLInstall".into(),
            features: vec!["Engine".into()],
            collation: "SQL_Latin1_General_CP1_CI_AS".into(),
            sysadmin_group: r"CONTOSO\SQL Admins".into(),
            service_account: None,
            paths: DriveLayout::for_policy(5, false).and_then(|l| l.sql_paths()),
        }
    }

    #[test]
    fn test_sql_target() {
        assert_eq!(sql_target("MSSQLSERVER"), "$env:COMPUTERNAME");
        assert_eq!(sql_target("SALES"), "\"$env:COMPUTERNAME\\SALES\"");
    }

    #[test]
    fn test_install_script_uses_layout_paths() {
        let script = instance().install_script();
        assert!(script.contains("-Version 2022"));
        assert!(script.contains(r"-DataPath 'D:\MSSQL\Data'"));
        assert!(script.contains(r"SQLTEMPDBLOGDIR = 'G:\MSSQL\TempDBLog'"));
        assert!(script.contains(r"-AdminAccount 'CONTOSO\SQL Admins'"));
        assert!(!script.contains("SQLSVCACCOUNT"));
    }

    #[test]
    fn test_registered_instance_is_converged() {
        let sql = instance();
        let session = FakeSession::new("sql01").respond(
            "Instance Names",
            CommandOutput::ok(r#"{"instance":"MSSQLSERVER","build":"16.0.1000.6","edition":"Developer Edition"}"#),
        );
        assert!(!sql.needs_apply(&session).unwrap());
        assert!(sql.needs_apply(&FakeSession::new("sql02")).unwrap());
    }
}
