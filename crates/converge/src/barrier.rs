//! Cross-node barriers
//!
//! A primary-role declaration (cluster create, AG create) publishes a
//! barrier when it finishes; secondary declarations that await it block
//! until it is reached, fails, or the wait budget runs out.

use crate::planner::Barrier;
use crate::wait::RetryConfig;
use log::debug;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Published state of a barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierStatus {
    /// Publisher has not finished yet
    Pending,
    /// Publisher converged
    Reached,
    /// Publisher failed or was never attempted
    Failed { reason: String },
}

/// Result of waiting on a barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierWait {
    Reached,
    Failed { reason: String },
    TimedOut { waited: Duration },
}

/// Shared board of barrier states for one run
#[derive(Debug, Default)]
pub struct BarrierBoard {
    state: Mutex<HashMap<Barrier, BarrierStatus>>,
    changed: Condvar,
}

impl BarrierBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Barrier, BarrierStatus>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the final state of a barrier and wake every waiter
    pub fn publish(&self, barrier: &Barrier, status: BarrierStatus) {
        debug!("barrier {barrier} -> {status:?}");
        self.lock().insert(barrier.clone(), status);
        self.changed.notify_all();
    }

    /// Mark a barrier reached
    pub fn reach(&self, barrier: &Barrier) {
        self.publish(barrier, BarrierStatus::Reached);
    }

    /// Mark a barrier failed
    pub fn fail(&self, barrier: &Barrier, reason: impl Into<String>) {
        self.publish(
            barrier,
            BarrierStatus::Failed {
                reason: reason.into(),
            },
        );
    }

    pub fn status(&self, barrier: &Barrier) -> BarrierStatus {
        self.lock()
            .get(barrier)
            .cloned()
            .unwrap_or(BarrierStatus::Pending)
    }

    /// Block until the barrier is published or the budget runs out.
    ///
    /// The budget is the total sleep time of `policy` (60 × 10 s by
    /// default, the same as a cluster wait).
    pub fn wait(&self, barrier: &Barrier, policy: &RetryConfig) -> BarrierWait {
        let budget = policy.ceiling();
        let started = Instant::now();
        let deadline = started + budget;
        let mut state = self.lock();

        loop {
            match state.get(barrier) {
                Some(BarrierStatus::Reached) => return BarrierWait::Reached,
                Some(BarrierStatus::Failed { reason }) => {
                    return BarrierWait::Failed {
                        reason: reason.clone(),
                    };
                }
                Some(BarrierStatus::Pending) | None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return BarrierWait::TimedOut {
                    waited: now - started,
                };
            }

            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
