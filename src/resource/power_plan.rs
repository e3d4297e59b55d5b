use converge::{ApplyContext, ReconcileError, Resource, ResourceState, Result, Session};

/// The active power scheme, by GUID
#[derive(Debug, Clone)]
pub struct PowerPlan {
    pub guid: String,
}

impl PowerPlan {
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into().to_lowercase(),
        }
    }
}

/// Pull the scheme GUID out of `powercfg /getactivescheme` output
///
/// `Power Scheme GUID: 8c5e7fda-e8bf-4a96-9a85-a6e23a8c635c  (High performance)`
fn active_guid(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|word| word.len() == 36 && word.chars().filter(|c| *c == '-').count() == 4)
        .map(str::to_lowercase)
}

impl Resource for PowerPlan {
    fn id(&self) -> String {
        "power_plan".to_string()
    }

    fn description(&self) -> String {
        format!("Power plan {}", self.guid)
    }

    fn resource_type(&self) -> &'static str {
        "power_plan"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        let output = session.run_capture("powercfg /getactivescheme")?;
        match active_guid(&output) {
            Some(guid) => Ok(ResourceState::present_with([("guid", guid)])),
            None => Err(ReconcileError::permanent(format!(
                "unrecognized powercfg output: {}",
                output.trim()
            ))),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([("guid", self.guid.as_str())])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        ctx.run(&format!("powercfg /setactive {}", self.guid))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HIGH_PERFORMANCE_PLAN;
    use converge::testing::FakeSession;
    use converge::CommandOutput;

    #[test]
    fn test_active_guid() {
        let output = "Power Scheme GUID: 381B4222-F694-41F0-9685-FF5BB260DF2E  (Balanced)";
        assert_eq!(
            active_guid(output).as_deref(),
            Some("381b4222-f694-41f0-9685-ff5bb260df2e")
        );
        assert_eq!(active_guid("Access denied"), None);
    }

    #[test]
    fn test_balanced_node_diverges() {
        let plan = PowerPlan::new(HIGH_PERFORMANCE_PLAN);
        let session = FakeSession::new("sql01").respond(
            "getactivescheme",
            CommandOutput::ok("Power Scheme GUID: 381b4222-f694-41f0-9685-ff5bb260df2e  (Balanced)"),
        );
        assert!(plan.needs_apply(&session).unwrap());
    }
}
