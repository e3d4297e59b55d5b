//! Windows service resource - start mode and running state

use converge::{ApplyContext, Resource, ResourceState, Result, Session};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{probe_properties, ps_quote};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupType {
    #[default]
    Automatic,
    Manual,
    Disabled,
}

impl fmt::Display for StartupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "Automatic"),
            Self::Manual => write!(f, "Manual"),
            Self::Disabled => write!(f, "Disabled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// An installed Windows service held in a start mode and state
#[derive(Debug, Clone)]
pub struct WindowsService {
    pub name: String,
    pub startup: StartupType,
    pub state: ServiceState,
}

impl WindowsService {
    pub fn new(name: impl Into<String>, startup: StartupType, state: ServiceState) -> Self {
        Self {
            name: name.into(),
            startup,
            state,
        }
    }

    /// Running unless the start mode is `Disabled`, in which case stopped
    pub fn with_startup(name: impl Into<String>, startup: StartupType) -> Self {
        let state = match startup {
            StartupType::Disabled => ServiceState::Stopped,
            StartupType::Automatic | StartupType::Manual => ServiceState::Running,
        };
        Self::new(name, startup, state)
    }
}

impl Resource for WindowsService {
    fn id(&self) -> String {
        format!("windows_service:{}", self.name)
    }

    fn description(&self) -> String {
        format!("Service {} ({}, {})", self.name, self.startup, self.state)
    }

    fn resource_type(&self) -> &'static str {
        "windows_service"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(
            session,
            &format!(
                "Get-Service -Name {} -ErrorAction SilentlyContinue | ForEach-Object {{ [pscustomobject]@{{ startup = [string]$_.StartType; status = [string]$_.Status }} }} | ConvertTo-Json -Compress",
                ps_quote(&self.name)
            ),
        )
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([
            ("startup", self.startup.to_string()),
            ("status", self.state.to_string()),
        ])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        let name = ps_quote(&self.name);
        let transition = match self.state {
            ServiceState::Running => format!("Start-Service -Name {name}"),
            ServiceState::Stopped => format!("Stop-Service -Name {name} -Force"),
        };
        ctx.run(&format!(
            "Set-Service -Name {name} -StartupType {}\n{transition}",
            self.startup
        ))?;
        Ok(())
    }
}
