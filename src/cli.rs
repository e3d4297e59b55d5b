use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sqlfleet")]
#[command(version)]
#[command(about = "Declarative SQL Server fleet deployment", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate, plan and converge every node
    Apply(ApplyArgs),

    /// Show each node's ordered declarations without contacting any node
    Plan(PlanArgs),

    /// Probe every declaration and show what apply would change
    Status(StatusArgs),

    /// Run pre-flight checks only
    Validate(DeployArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared deployment flags
// ============================================================================

/// Flags that describe the deployment; each overrides the config file
#[derive(Args, Debug, Clone, Default)]
pub struct DeployArgs {
    /// Deployment config file (.toml or .json)
    #[arg(short, long, env = "SQLFLEET_CONFIG")]
    pub config: Option<String>,

    /// Target machines; the first is the primary
    #[arg(short, long, value_delimiter = ',')]
    pub nodes: Option<Vec<String>>,

    /// Local folder with the SQL Server installation media
    #[arg(long)]
    pub install_source: Option<String>,

    /// Installation account (DOMAIN\user)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Environment variable holding the installation password
    #[arg(long)]
    pub password_env: Option<String>,

    /// Group granted sysadmin on the instance
    #[arg(long)]
    pub sysadmin_group: Option<String>,

    /// Leave disks alone
    #[arg(long)]
    pub skip_drive_config: bool,

    /// Skip copying media and installing SQL Server
    #[arg(long)]
    pub skip_install: bool,

    /// Build a failover cluster and availability group
    #[arg(long)]
    pub availability_group: bool,

    /// Azure VM layout (temp disk on D:)
    #[arg(long)]
    pub azure: bool,

    /// Data disks per node: 1 or 5
    #[arg(long)]
    pub drive_count: Option<u8>,

    #[arg(long)]
    pub cluster_name: Option<String>,

    #[arg(long)]
    pub cluster_ip: Option<String>,

    #[arg(long)]
    pub ag_name: Option<String>,

    #[arg(long)]
    pub listener_name: Option<String>,

    #[arg(long)]
    pub listener_port: Option<u16>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub deploy: DeployArgs,

    /// Probe only; report what would change
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Stop a node at its first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Write the run report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub deploy: DeployArgs,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,

    /// Only show resources of this type, or whose id contains this text
    #[arg(short, long)]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub deploy: DeployArgs,

    /// Only show resources of this type, or whose id contains this text
    #[arg(short, long)]
    pub target: Option<String>,
}
