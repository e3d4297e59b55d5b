//! Deployment configuration
//!
//! Loaded from TOML or JSON (chosen by extension). Every section has
//! defaults, so a file only needs the parts that differ, and CLI flags are
//! merged on top.

use anyhow::{Context, Result};
use converge::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cli::DeployArgs;
use crate::resource::StartupType;

/// Power plan scheme GUID for "High performance"
pub const HIGH_PERFORMANCE_PLAN: &str = "8c5e7fda-e8bf-4a96-9a85-a6e23a8c635c";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported config format '{0}' (expected .toml or .json)")]
    UnsupportedFormat(String),
}

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

/// Default config location: `<config dir>/sqlfleet/deploy.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sqlfleet").join("deploy.toml"))
}

/// Expand `~` and environment variables in a path
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path).into_owned());
    PathBuf::from(expanded)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub nodes: Vec<NodeEntry>,
    pub credential: CredentialConfig,
    pub install: InstallConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub availability_group: AvailabilityGroupConfig,
    pub retry: RetryPolicies,
    /// Fixed pause after the cluster and AG are pushed
    pub pause_after_cluster_secs: u64,
    pub skip_drive_config: bool,
    pub skip_install: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            credential: CredentialConfig::default(),
            install: InstallConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            cluster: ClusterConfig::default(),
            availability_group: AvailabilityGroupConfig::default(),
            retry: RetryPolicies::default(),
            pause_after_cluster_secs: 300,
            skip_drive_config: false,
            skip_install: false,
        }
    }
}

/// One target machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    /// Overrides `storage.drive_count` for this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_count: Option<u8>,
    /// Whether the node has an optical drive to move out of the way
    #[serde(default = "default_true")]
    pub optical_drive: bool,
}

impl NodeEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            drive_count: None,
            optical_drive: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Installation account, e.g. `CONTOSO\svc-sqlinstall`
    pub user: Option<String>,
    /// Environment variable holding the password
    pub password_env: String,
    /// WinRM authentication mechanism, e.g. `Credssp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            user: None,
            password_env: "SQLFLEET_PASSWORD".to_string(),
            authentication: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Local folder holding the SQL Server media (setup.exe)
    pub source: Option<PathBuf>,
    /// Folder on each node the media is copied to
    pub media_path: String,
    pub version: String,
    pub instance: String,
    pub sysadmin_group: Option<String>,
    pub collation: String,
    pub features: Vec<String>,
    /// Service account for the engine and agent; virtual accounts when unset
    pub service_account: Option<String>,
    /// Agent start mode; `disabled` also keeps it stopped
    pub agent_startup: StartupType,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            source: None,
            media_path: r"C:\SQLInstall".to_string(),
            version: "2022".to_string(),
            instance: "MSSQLSERVER".to_string(),
            sysadmin_group: None,
            collation: "SQL_Latin1_General_CP1_CI_AS".to_string(),
            features: vec!["Engine".to_string()],
            service_account: None,
            agent_startup: StartupType::Automatic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 1 (single SQL volume) or 5 (data, logs, tempdb, tempdb log, backup)
    pub drive_count: u8,
    /// Azure VMs carry a temp disk on D:, so every letter moves up by one
    pub azure: bool,
    pub allocation_unit_kb: u32,
    /// Letter the optical drive is moved to
    pub optical_drive_letter: char,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            drive_count: 5,
            azure: false,
            allocation_unit_kb: 64,
            optical_drive_letter: 'Z',
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub time_zone: String,
    /// Power scheme GUID
    pub power_plan: String,
    /// Inbound TCP ports opened for SQL Server
    pub firewall_ports: Vec<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            time_zone: "UTC".to_string(),
            power_plan: HIGH_PERFORMANCE_PLAN.to_string(),
            firewall_ports: vec![1433],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityGroupConfig {
    pub enabled: bool,
    pub name: Option<String>,
    pub listener_name: Option<String>,
    pub listener_port: u16,
    pub listener_ip: Option<String>,
    pub endpoint_port: u16,
}

impl Default for AvailabilityGroupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: None,
            listener_name: None,
            listener_port: 1433,
            listener_ip: None,
            endpoint_port: 5022,
        }
    }
}

/// A fixed-interval wait, as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    pub attempts: u32,
    pub interval_secs: u64,
}

impl WaitPolicy {
    pub fn to_retry_config(self) -> RetryConfig {
        RetryConfig::fixed(self.attempts, Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    /// Waiting for an attached disk to appear
    pub disk: WaitPolicy,
    /// Waiting for the cluster to form
    pub cluster: WaitPolicy,
    /// Waiting on another node's barrier
    pub barrier: WaitPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        let cluster = WaitPolicy {
            attempts: 60,
            interval_secs: 10,
        };
        Self {
            disk: WaitPolicy {
                attempts: 60,
                interval_secs: 60,
            },
            cluster,
            barrier: cluster,
        }
    }
}

impl DeploymentConfig {
    /// Load a config file, format chosen by extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content, format)
            .with_context(|| format!("Invalid deployment config {}", path.display()))
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    /// Load the given file, or the default file if it exists, or defaults
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(&expand_path(path));
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                log::debug!("loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Apply CLI flags on top of file values
    pub fn merge_args(&mut self, args: &DeployArgs) {
        if let Some(nodes) = &args.nodes {
            self.nodes = nodes.iter().map(NodeEntry::new).collect();
        }
        if let Some(source) = &args.install_source {
            self.install.source = Some(expand_path(source));
        }
        if let Some(user) = &args.user {
            self.credential.user = Some(user.clone());
        }
        if let Some(var) = &args.password_env {
            self.credential.password_env = var.clone();
        }
        if let Some(group) = &args.sysadmin_group {
            self.install.sysadmin_group = Some(group.clone());
        }
        if let Some(count) = args.drive_count {
            self.storage.drive_count = count;
        }
        if let Some(name) = &args.cluster_name {
            self.cluster.name = Some(name.clone());
        }
        if let Some(ip) = &args.cluster_ip {
            self.cluster.ip = Some(ip.clone());
        }
        if let Some(name) = &args.ag_name {
            self.availability_group.name = Some(name.clone());
        }
        if let Some(name) = &args.listener_name {
            self.availability_group.listener_name = Some(name.clone());
        }
        if let Some(port) = args.listener_port {
            self.availability_group.listener_port = port;
        }
        self.skip_drive_config |= args.skip_drive_config;
        self.skip_install |= args.skip_install;
        self.storage.azure |= args.azure;
        self.availability_group.enabled |= args.availability_group;
    }

    /// Whether a cluster is part of this deployment
    pub fn wants_cluster(&self) -> bool {
        self.availability_group.enabled || self.cluster.name.is_some()
    }

    /// Drive count for one node, honouring per-node overrides
    pub fn drive_count_for(&self, node: &str) -> u8 {
        self.nodes
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(node))
            .and_then(|n| n.drive_count)
            .unwrap_or(self.storage.drive_count)
    }
}
