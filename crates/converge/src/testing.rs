//! Test doubles for resources, sessions and transports
//!
//! Available to this crate's tests and, with the `testing` feature, to
//! downstream crates.

use crate::context::{ApplyContext, Session, Transport};
use crate::error::{ReconcileError, Result};
use crate::resource::Resource;
use crate::types::{CommandOutput, Credential, ResourceState, TargetNode};
use crate::wait::RetryConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, ordered record of `node:resource:event` lines
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::default()
}

/// Snapshot of an event log
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// How a [`FakeResource`] behaves
#[derive(Debug, Clone)]
pub enum FakeMode {
    /// Always probes converged
    Converged,
    /// Diverged until applied once
    ConvergesOnApply,
    /// Converged from probe `n + 1` on; apply reports not-ready until then
    ReadyAfterProbes(u32),
    /// Never converges; apply always reports not-ready
    NeverReady,
    /// Diverged; apply fails with the given error
    ApplyFails(ReconcileError),
}

/// A resource whose behaviour is scripted, with call counters
#[derive(Debug, Clone)]
pub struct FakeResource {
    id: String,
    mode: FakeMode,
    policy: RetryConfig,
    applied: Arc<AtomicBool>,
    pub probes: Arc<AtomicU32>,
    pub applies: Arc<AtomicU32>,
    log: Option<EventLog>,
}

impl FakeResource {
    pub fn new(id: impl Into<String>, mode: FakeMode) -> Self {
        Self {
            id: id.into(),
            mode,
            policy: RetryConfig::no_retry(),
            applied: Arc::default(),
            probes: Arc::default(),
            applies: Arc::default(),
            log: None,
        }
    }

    pub fn converged(id: impl Into<String>) -> Self {
        Self::new(id, FakeMode::Converged)
    }

    pub fn converges_on_apply(id: impl Into<String>) -> Self {
        Self::new(id, FakeMode::ConvergesOnApply)
    }

    pub fn ready_after_probes(id: impl Into<String>, probes: u32) -> Self {
        Self::new(id, FakeMode::ReadyAfterProbes(probes))
    }

    pub fn never_ready(id: impl Into<String>) -> Self {
        Self::new(id, FakeMode::NeverReady)
    }

    pub fn apply_fails(id: impl Into<String>, error: ReconcileError) -> Self {
        Self::new(id, FakeMode::ApplyFails(error))
    }

    pub fn with_policy(mut self, policy: RetryConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Record probe and apply events into `log`
    pub fn logging_to(mut self, log: &EventLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    fn record(&self, node: &str, event: &str) {
        if let Some(log) = &self.log {
            log.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("{node}:{}:{event}", self.id));
        }
    }

    fn is_ready(&self, probe: u32) -> bool {
        match &self.mode {
            FakeMode::Converged => true,
            FakeMode::ConvergesOnApply => self.applied.load(Ordering::SeqCst),
            FakeMode::ReadyAfterProbes(n) => probe > *n,
            FakeMode::NeverReady | FakeMode::ApplyFails(_) => false,
        }
    }
}

impl Resource for FakeResource {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn description(&self) -> String {
        format!("Fake {}", self.id)
    }

    fn resource_type(&self) -> &'static str {
        "fake"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        let probe = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(session.node(), "probe");
        if self.is_ready(probe) {
            Ok(ResourceState::present_with([("ready", "true")]))
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([("ready", "true")])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.record(&ctx.node.name, "apply");
        match &self.mode {
            FakeMode::ApplyFails(error) => Err(error.clone()),
            FakeMode::NeverReady => Err(ReconcileError::transient(format!("{} not ready", self.id))),
            FakeMode::ConvergesOnApply => {
                self.applied.store(true, Ordering::SeqCst);
                Ok(())
            }
            FakeMode::Converged | FakeMode::ReadyAfterProbes(_) => Ok(()),
        }
    }

    fn retry_policy(&self) -> RetryConfig {
        self.policy.clone()
    }
}

/// A session that answers scripts from a table of canned responses
///
/// Responses match on a substring of the script; the first match wins and
/// unmatched scripts succeed with empty output. Limited responses stop
/// matching once used up.
#[derive(Debug)]
struct Response {
    pattern: String,
    output: CommandOutput,
    /// Matches left before this response falls through; `None` is unlimited
    remaining: Option<AtomicU32>,
}

impl Response {
    fn answers(&self, script: &str) -> bool {
        if !script.contains(self.pattern.as_str()) {
            return false;
        }
        self.remaining.as_ref().is_none_or(|left| {
            left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeSession {
    node: String,
    responses: Vec<Response>,
    scripts: Mutex<Vec<String>>,
    copies: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeSession {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ..Default::default()
        }
    }

    /// Answer scripts containing `pattern` with `output`
    pub fn respond(mut self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.push(Response {
            pattern: pattern.into(),
            output,
            remaining: None,
        });
        self
    }

    /// Answer the first `times` scripts containing `pattern` with `output`,
    /// then fall through to later responses
    pub fn respond_times(
        mut self,
        pattern: impl Into<String>,
        times: u32,
        output: CommandOutput,
    ) -> Self {
        self.responses.push(Response {
            pattern: pattern.into(),
            output,
            remaining: Some(AtomicU32::new(times)),
        });
        self
    }

    /// Every script run so far, in order
    pub fn scripts(&self) -> Vec<String> {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Scripts run so far that contain `needle`
    pub fn ran(&self, needle: &str) -> usize {
        self.scripts().iter().filter(|s| s.contains(needle)).count()
    }

    pub fn copies(&self) -> Vec<(PathBuf, String)> {
        self.copies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Session for FakeSession {
    fn node(&self) -> &str {
        &self.node
    }

    fn run(&self, script: &str) -> Result<CommandOutput> {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(script.to_string());
        let output = self
            .responses
            .iter()
            .find(|response| response.answers(script))
            .map(|response| response.output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        Ok(output)
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        self.copies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }
}

/// A transport handing out [`FakeSession`]s
#[derive(Debug, Default)]
pub struct FakeTransport {
    unreachable: HashSet<String>,
    opened: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse sessions to `node`
    pub fn unreachable(mut self, node: impl Into<String>) -> Self {
        self.unreachable.insert(node.into());
        self
    }

    /// Number of sessions opened, successful or not
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn open_session(
        &self,
        node: &TargetNode,
        _credential: &Credential,
    ) -> Result<Box<dyn Session>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.contains(&node.name) {
            return Err(ReconcileError::unreachable(
                &node.name,
                "connection refused",
            ));
        }
        Ok(Box::new(FakeSession::new(&node.name)))
    }
}
