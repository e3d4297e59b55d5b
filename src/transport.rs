//! PowerShell remoting transport
//!
//! Each script runs through a local `pwsh` that opens a WinRM session to the
//! node under the installation credential. The password reaches `pwsh`
//! through its environment, never its command line.

use anyhow::{Result, bail};
use converge::{CommandOutput, Credential, ReconcileError, Session, TargetNode, Transport};
use log::{debug, trace};
use std::path::Path;

use crate::resource::ps_quote;
use crate::runner;

const PASSWORD_VAR: &str = "SQLFLEET_REMOTE_PASSWORD";
const UNREACHABLE_MARKER: &str = "sqlfleet-unreachable:";

/// Opens PowerShell remoting sessions through a local `pwsh`
#[derive(Debug, Clone)]
pub struct PsRemotingTransport {
    program: String,
    authentication: Option<String>,
}

impl PsRemotingTransport {
    /// Find a local PowerShell 7 (`pwsh`), falling back to Windows PowerShell
    pub fn detect() -> Result<Self> {
        let program = ["pwsh", "powershell"]
            .into_iter()
            .find(|p| runner::command_exists(p));
        let Some(program) = program else {
            bail!("PowerShell not found: install pwsh to reach Windows nodes");
        };
        if let Ok(version) = runner::run_capture(
            program,
            &["-NoProfile", "-Command", "$PSVersionTable.PSVersion.ToString()"],
        ) {
            debug!("using {program} {version}");
        }
        Ok(Self::new(program))
    }

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            authentication: None,
        }
    }

    /// WinRM authentication mechanism, e.g. `Credssp` for double-hop installs
    pub fn with_authentication(mut self, mechanism: impl Into<String>) -> Self {
        self.authentication = Some(mechanism.into());
        self
    }
}

impl Transport for PsRemotingTransport {
    fn open_session(
        &self,
        node: &TargetNode,
        credential: &Credential,
    ) -> converge::Result<Box<dyn Session>> {
        let session = PsRemotingSession {
            node: node.name.clone(),
            program: self.program.clone(),
            authentication: self.authentication.clone(),
            credential: credential.clone(),
        };

        let probe = session.run("$env:COMPUTERNAME")?;
        if !probe.success {
            return Err(ReconcileError::unreachable(
                &node.name,
                probe.stderr_str().trim(),
            ));
        }
        debug!("{}: session open ({})", node.name, probe.stdout_str().trim());
        Ok(Box::new(session))
    }
}

/// One node, reached through `pwsh` per script
struct PsRemotingSession {
    node: String,
    program: String,
    authentication: Option<String>,
    credential: Credential,
}

impl PsRemotingSession {
    /// Wrap `body` so it runs locally with an open `$session` to the node
    fn wrap(&self, body: &str) -> String {
        let auth = self
            .authentication
            .as_deref()
            .map(|a| format!(" -Authentication {a}"))
            .unwrap_or_default();
        format!(
            "$ErrorActionPreference = 'Stop'\n\
             $password = ConvertTo-SecureString $env:{PASSWORD_VAR} -AsPlainText -Force\n\
             $credential = [System.Management.Automation.PSCredential]::new({user}, $password)\n\
             try {{\n\
             \x20   $session = New-PSSession -ComputerName {node} -Credential $credential{auth}\n\
             }} catch {{\n\
             \x20   [Console]::Error.WriteLine(\"{UNREACHABLE_MARKER} $($_.Exception.Message)\")\n\
             \x20   exit 2\n\
             }}\n\
             try {{\n\
             {body}\n\
             }} finally {{\n\
             \x20   Remove-PSSession $session\n\
             }}\n",
            user = ps_quote(&self.credential.user),
            node = ps_quote(&self.node),
        )
    }

    fn invoke(&self, wrapped: &str) -> converge::Result<CommandOutput> {
        trace!("{}: {wrapped}", self.node);
        let output = runner::run_with_stdin(
            &self.program,
            &["-NoProfile", "-NonInteractive", "-Command", "-"],
            wrapped,
            &[(PASSWORD_VAR, self.credential.password.as_str())],
        )
        .map_err(|e| ReconcileError::permanent(format!("{e:#}")))?;
        classify(&self.node, CommandOutput::from(output))
    }
}

/// Turn a remoting failure into `UnreachableNode`; pass anything else through
fn classify(node: &str, output: CommandOutput) -> converge::Result<CommandOutput> {
    let stderr = output.stderr_str();
    if let Some(pos) = stderr.find(UNREACHABLE_MARKER) {
        let message = stderr[pos + UNREACHABLE_MARKER.len()..].trim();
        return Err(ReconcileError::unreachable(node, message));
    }
    Ok(output)
}

impl Session for PsRemotingSession {
    fn node(&self) -> &str {
        &self.node
    }

    fn run(&self, script: &str) -> converge::Result<CommandOutput> {
        let body = format!(
            "Invoke-Command -Session $session -ScriptBlock {{\n\
             $ErrorActionPreference = 'Stop'\n\
             {script}\n\
             }}"
        );
        self.invoke(&self.wrap(&body))
    }

    fn copy_to(&self, local: &Path, remote: &str) -> converge::Result<()> {
        let body = format!(
            "Invoke-Command -Session $session -ScriptBlock {{\n\
             \x20   param($target)\n\
             \x20   New-Item -ItemType Directory -Force -Path (Split-Path -Parent $target) | Out-Null\n\
             }} -ArgumentList {remote}\n\
             Copy-Item -LiteralPath {local} -Destination {remote} -ToSession $session -Recurse -Force",
            local = ps_quote(&local.to_string_lossy()),
            remote = ps_quote(remote),
        );
        let output = self.invoke(&self.wrap(&body))?;
        if output.success {
            Ok(())
        } else {
            Err(ReconcileError::permanent(format!(
                "copy of {} to {}:{remote} failed: {}",
                local.display(),
                self.node,
                output.stderr_str().trim()
            )))
        }
    }
}
