//! Fixed pause - the fallback for waits with nothing to poll
//!
//! Used where a node reboots or drops its management sessions and there is
//! no readiness signal to observe. Always diverged on the first probe of a
//! run, converged once the delay has elapsed. Declare it `after_change` on
//! the step it follows so a rerun over converged nodes does not wait.

use converge::{ApplyContext, Resource, ResourceState, Result, Session, fixed_delay};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Pause {
    pub reason: String,
    pub duration: Duration,
    elapsed: Arc<AtomicBool>,
}

impl Pause {
    pub fn new(reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            reason: reason.into(),
            duration,
            elapsed: Arc::default(),
        }
    }
}

impl Resource for Pause {
    fn id(&self) -> String {
        format!("pause:{}", self.reason)
    }

    fn description(&self) -> String {
        format!("Fixed delay of {}s: {}", self.duration.as_secs(), self.reason)
    }

    fn resource_type(&self) -> &'static str {
        "pause"
    }

    fn current_state(&self, _session: &dyn Session) -> Result<ResourceState> {
        if self.elapsed.load(Ordering::SeqCst) {
            Ok(ResourceState::present())
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present()
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        fixed_delay(self.duration, &format!("{} ({})", self.reason, ctx.node.name));
        self.elapsed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::testing::FakeSession;
    use converge::{NodeRole, TargetNode};

    #[test]
    fn test_pause_converges_after_delay() {
        let pause = Pause::new("cluster settle", Duration::from_millis(5));
        let session = FakeSession::new("sql01");
        assert!(pause.needs_apply(&session).unwrap());

        let node = TargetNode::new("sql01", NodeRole::Primary);
        let mut ctx = ApplyContext::new(&node, &session, false, false);
        pause.apply(&mut ctx).unwrap();

        assert!(!pause.needs_apply(&session).unwrap());
        assert!(session.scripts().is_empty());
    }
}
