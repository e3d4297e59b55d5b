//! Install configuration - media copy, SQL Server, agent and install marker

use converge::{Configuration, DeclarationId, NodeConfiguration, Result, TargetNode};
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::config::DeploymentConfig;
use crate::layout::DriveLayout;
use crate::resource::{DirectoryCopy, RegistryValue, SqlInstance, StartupType, WindowsService};

use super::NodeSpec;

/// Registry key holding the install marker
pub const MARKER_KEY: &str = r"HKLM:\SOFTWARE\sqlfleet";

#[derive(Debug)]
pub struct InstallConfiguration {
    pub source: PathBuf,
    pub media_path: String,
    pub version: String,
    pub instance: String,
    pub features: Vec<String>,
    pub collation: String,
    pub sysadmin_group: String,
    pub service_account: Option<String>,
    pub agent_startup: StartupType,
    pub azure: bool,
    /// Place SQL directories on the data drives
    pub use_drive_layout: bool,
    /// Recorded on first install only
    pub install_date: String,
    media: OnceLock<Result<DirectoryCopy>>,
}

impl InstallConfiguration {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        let install = &config.install;
        Self {
            source: install.source.clone().unwrap_or_default(),
            media_path: install.media_path.clone(),
            version: install.version.clone(),
            instance: install.instance.clone(),
            features: install.features.clone(),
            collation: install.collation.clone(),
            sysadmin_group: install.sysadmin_group.clone().unwrap_or_default(),
            service_account: install.service_account.clone(),
            agent_startup: install.agent_startup,
            azure: config.storage.azure,
            use_drive_layout: !config.skip_drive_config,
            install_date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            media: OnceLock::new(),
        }
    }

    /// The media manifest, walked once for every node
    fn media(&self) -> Result<DirectoryCopy> {
        self.media
            .get_or_init(|| DirectoryCopy::from_local(&self.source, &self.media_path))
            .clone()
    }

    fn agent_service(&self) -> String {
        if self.instance.eq_ignore_ascii_case("MSSQLSERVER") {
            "SQLSERVERAGENT".to_string()
        } else {
            format!("SQLAgent${}", self.instance)
        }
    }
}

impl Configuration for InstallConfiguration {
    fn name(&self) -> &str {
        "install"
    }

    fn declare(&self, node: &TargetNode, out: &mut NodeConfiguration) -> Result<()> {
        let layout = if self.use_drive_layout {
            DriveLayout::for_policy(NodeSpec::of(node)?.drive_count, self.azure)
        } else {
            None
        };
        let disks: Vec<DeclarationId> = layout
            .iter()
            .flat_map(|l| &l.drives)
            .filter_map(|d| out.find(&d.declaration_name()))
            .collect();

        let media = out.declare("InstallMedia", self.media()?).id();

        let sql = SqlInstance {
            instance: self.instance.clone(),
            version: self.version.clone(),
            media_path: self.media_path.clone(),
            features: self.features.clone(),
            collation: self.collation.clone(),
            sysadmin_group: self.sysadmin_group.clone(),
            service_account: self.service_account.clone(),
            paths: layout.as_ref().and_then(DriveLayout::sql_paths),
        };
        let install = out
            .declare("SqlInstall", sql)
            .depends_on(media)
            .depends_on_all(disks)
            .id();

        out.declare(
            "SqlAgent",
            WindowsService::with_startup(self.agent_service(), self.agent_startup),
        )
            .depends_on(install);
        out.declare(
            "InstallMarker_Version",
            RegistryValue::new(MARKER_KEY, "Version", &self.version),
        )
        .depends_on(install);
        out.declare(
            "InstallMarker_Date",
            RegistryValue::new(MARKER_KEY, "InstallDate", &self.install_date).write_once(),
        )
        .depends_on(install);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurations::{StorageConfiguration, target_nodes, tests as fixtures};
    use converge::{Configuration, RunPlan};

    #[test]
    fn test_install_waits_for_media_and_disks() {
        let media = fixtures::media();
        let config = fixtures::deployment(media.path());
        let storage = StorageConfiguration::from_config(&config);
        let install = InstallConfiguration::from_config(&config);

        let plan = RunPlan::build(target_nodes(&config), &[&storage, &install]).unwrap();
        let declarations = plan.nodes[0].describe();
        let sql = declarations.iter().find(|d| d.name == "SqlInstall").unwrap();

        assert_eq!(sql.depends_on[0], "InstallMedia");
        assert_eq!(sql.depends_on.len(), 6);
        assert!(sql.depends_on.contains(&"Disk_TempDBLog".to_string()));
    }

    #[test]
    fn test_without_drive_config_uses_installer_defaults() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.skip_drive_config = true;
        let install = InstallConfiguration::from_config(&config);

        let plan = RunPlan::build(target_nodes(&config), &[&install]).unwrap();
        let names: Vec<String> = plan.nodes[0].describe().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "InstallMedia",
                "SqlInstall",
                "SqlAgent",
                "InstallMarker_Version",
                "InstallMarker_Date"
            ]
        );
    }

    #[test]
    fn test_named_instance_agent() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.install.instance = "SALES".into();
        let install = InstallConfiguration::from_config(&config);
        assert_eq!(install.agent_service(), "SQLAgent$SALES");
        assert_eq!(install.name(), "install");
    }

    #[test]
    fn test_disabled_agent_is_declared_stopped() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.skip_drive_config = true;
        config.install.agent_startup = StartupType::Disabled;
        let install = InstallConfiguration::from_config(&config);

        let plan = RunPlan::build(target_nodes(&config), &[&install]).unwrap();
        let agent = plan.nodes[0]
            .describe()
            .into_iter()
            .find(|d| d.name == "SqlAgent")
            .unwrap();
        assert_eq!(agent.desired.property("startup"), Some("Disabled"));
        assert_eq!(agent.desired.property("status"), Some("Stopped"));
    }

    #[test]
    fn test_missing_media_fails_declaration() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.install.source = Some(media.path().join("gone"));
        config.skip_drive_config = true;
        let install = InstallConfiguration::from_config(&config);

        assert!(RunPlan::build(target_nodes(&config), &[&install]).is_err());
    }
}
