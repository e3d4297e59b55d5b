use converge::{ApplyContext, Resource, ResourceState, Result, Session};

use super::{probe_properties, ps_quote};

/// The system time zone, by Windows zone id
#[derive(Debug, Clone)]
pub struct TimeZone {
    pub id: String,
}

impl TimeZone {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Resource for TimeZone {
    fn id(&self) -> String {
        "time_zone".to_string()
    }

    fn description(&self) -> String {
        format!("Time zone {}", self.id)
    }

    fn resource_type(&self) -> &'static str {
        "time_zone"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        probe_properties(
            session,
            "[pscustomobject]@{ id = (Get-TimeZone).Id } | ConvertTo-Json -Compress",
        )
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([("id", self.id.as_str())])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(&format!("Set-TimeZone -Id {}", ps_quote(&self.id)))?;
        Ok(())
    }
}
