//! Subprocess stdio runner.
//!
//! Owns exactly one child process for one `(alias, transport)` pair and
//! speaks the JSON-line protocol over its stdin/stdout: one JSON object
//! per line in each direction, strictly one request in flight.
//!
//! Failure classification:
//! - spawn failure, handshake failure, EOF, malformed JSON: startup error,
//!   the process cannot be trusted without a restart
//! - no reply within the deadline: call timeout, the process may simply
//!   be slow and can be asked again

use crate::runner::allowlist::is_command_allowed;
use crate::runner::backoff::BackoffSchedule;
use crate::runner::Runner;
use crate::types::{
    Error, Result, RunnerId, RunnerStatus, RuntimeConfig, ToolRequest, ToolSpec, TRANSPORT_STDIO,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// One line read from the child, or the reason there was none.
enum ReadOutcome {
    Line(String),
    TimedOut,
    Eof,
}

/// Manages one child tool process and its line protocol.
pub struct StdioRunner {
    spec: Arc<ToolSpec>,
    command: String,
    allow_commands: Option<Vec<String>>,
    runtime: RuntimeConfig,
    backoff: BackoffSchedule,
    runner_id: RunnerId,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    /// Bytes of the current response line consumed so far. Survives a
    /// timed out read so the next attempt resumes the same line instead
    /// of starting in the middle of it.
    pending: Vec<u8>,
    restarts: u32,
    started_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for StdioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioRunner")
            .field("alias", &self.spec.alias)
            .field("command", &self.command)
            .field("runner_id", &self.runner_id)
            .field("running", &self.child.is_some())
            .field("restarts", &self.restarts)
            .finish()
    }
}

impl StdioRunner {
    /// Build a runner for a stdio tool spec.
    ///
    /// Fails with `ToolUnavailable` before any process work if the spec
    /// names another transport or has no command.
    pub fn new(
        spec: Arc<ToolSpec>,
        allow_commands: Option<Vec<String>>,
        runtime: RuntimeConfig,
    ) -> Result<Self> {
        if spec.transport != TRANSPORT_STDIO {
            return Err(Error::tool_unavailable(format!(
                "unsupported transport {} for {}",
                spec.transport, spec.alias
            )));
        }
        let command = spec.command.clone().ok_or_else(|| {
            Error::tool_unavailable(format!("no command configured for {}", spec.alias))
        })?;

        let backoff = BackoffSchedule::from_config(&runtime.retry);
        Ok(Self {
            spec,
            command,
            allow_commands,
            runtime,
            backoff,
            runner_id: RunnerId::new(),
            child: None,
            stdin: None,
            stdout: None,
            pending: Vec::new(),
            restarts: 0,
            started_at: None,
        })
    }

    fn spawn_child(&mut self) -> Result<()> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Tool env overlays the inherited process environment.
        for (key, value) in &self.spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::startup(format!("failed to spawn {}: {e}", self.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::startup("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::startup("failed to capture child stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            let alias = self.spec.alias.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(alias = %alias, "tool stderr: {line}");
                }
            });
        }

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        // leftover bytes from a previous child must not pollute the
        // fresh stream
        self.pending.clear();
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Health probe exchanged before the child is trusted with real
    /// requests. Every failure here is a startup error.
    async fn handshake(&mut self) -> Result<()> {
        let payload = ToolRequest::new("health", serde_json::Map::new()).wire_payload();
        self.write_line(&payload).await?;

        match self.read_line_within(self.runtime.startup_timeout).await? {
            ReadOutcome::Line(line) => {
                serde_json::from_str::<Value>(&line).map_err(|e| {
                    Error::startup(format!("invalid handshake response from {}: {e}", self.spec.alias))
                })?;
                Ok(())
            }
            ReadOutcome::TimedOut => Err(Error::startup(format!(
                "handshake with {} timed out after {:?}",
                self.spec.alias, self.runtime.startup_timeout
            ))),
            ReadOutcome::Eof => Err(Error::startup(format!(
                "{} exited during handshake",
                self.spec.alias
            ))),
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    async fn write_line(&mut self, payload: &Value) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::startup("child stdin unavailable"))?;

        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::startup(format!("failed to write to child stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::startup(format!("failed to flush child stdin: {e}")))?;
        Ok(())
    }

    async fn read_line_within(&mut self, deadline: Duration) -> Result<ReadOutcome> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::startup("child stdout unavailable"))?;

        // read_until appends into the persistent buffer as bytes arrive,
        // so an expired deadline keeps the partial line for the next
        // read; read_line would drop it on cancellation.
        match tokio::time::timeout(deadline, stdout.read_until(b'\n', &mut self.pending)).await {
            Err(_) => Ok(ReadOutcome::TimedOut),
            Ok(Err(e)) => Err(Error::startup(format!(
                "failed to read from child stdout: {e}"
            ))),
            Ok(Ok(_)) => {
                if self.pending.last() != Some(&b'\n') {
                    // EOF; a line the child never terminated is dead
                    self.pending.clear();
                    return Ok(ReadOutcome::Eof);
                }
                let bytes = std::mem::take(&mut self.pending);
                let line = String::from_utf8(bytes).map_err(|e| {
                    Error::startup(format!("invalid UTF-8 from {}: {e}", self.spec.alias))
                })?;
                Ok(ReadOutcome::Line(line.trim_end().to_string()))
            }
        }
    }
}

#[async_trait]
impl Runner for StdioRunner {
    /// Spawn the child and perform the health handshake. Idempotent while
    /// the current child is healthy.
    async fn start(&mut self) -> Result<()> {
        // Allowlist is checked before anything else so a refused command
        // can never spawn or consume restart budget.
        if !is_command_allowed(&self.command, self.allow_commands.as_deref()) {
            return Err(Error::startup(format!(
                "command not allowed: {}",
                self.command
            )));
        }

        if self.is_healthy() {
            return Ok(());
        }

        if self.restarts > self.runtime.max_restarts {
            return Err(Error::startup(format!(
                "exceeded restart budget for {} ({} restarts)",
                self.spec.alias, self.runtime.max_restarts
            )));
        }
        self.restarts += 1;

        self.spawn_child()?;

        match self.handshake().await {
            Ok(()) => {
                debug!(
                    alias = %self.spec.alias,
                    runner_id = %self.runner_id,
                    restarts = self.restarts,
                    "tool process ready"
                );
                Ok(())
            }
            Err(err) => {
                // Tear down the half-started child before surfacing.
                self.stop().await;
                Err(err)
            }
        }
    }

    /// One request/response exchange. The caller owns retry policy.
    async fn request(&mut self, payload: &Value, timeout: Duration) -> Result<Value> {
        if !self.is_healthy() {
            return Err(Error::startup(format!(
                "runner for {} is not running",
                self.spec.alias
            )));
        }

        self.write_line(payload).await?;

        match self.read_line_within(timeout).await? {
            ReadOutcome::Line(line) => serde_json::from_str(&line).map_err(|e| {
                Error::startup(format!("invalid JSON from {}: {e}", self.spec.alias))
            }),
            ReadOutcome::TimedOut => Err(Error::call_timeout(format!(
                "no response from {} within {:?}",
                self.spec.alias, timeout
            ))),
            ReadOutcome::Eof => Err(Error::startup(format!(
                "{} closed stdout mid-call",
                self.spec.alias
            ))),
        }
    }

    /// Request with retry. Timeouts back off and re-ask the same process;
    /// startup failures restart it first. When attempts run out after a
    /// restart cycle, the original startup error is surfaced so callers
    /// see the root cause.
    async fn call_with_retry(
        &mut self,
        payload: &Value,
        timeout: Duration,
        attempts: u32,
    ) -> Result<Value> {
        let attempts = attempts.max(1);
        let mut original_startup: Option<Error> = None;

        for attempt in 1..=attempts {
            match self.request(payload, timeout).await {
                Ok(value) => return Ok(value),
                Err(err @ Error::CallTimeout(_)) => {
                    if attempt == attempts {
                        return Err(err);
                    }
                    let delay = self.backoff.delay_for(attempt);
                    debug!(
                        alias = %self.spec.alias,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "call timed out, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err @ Error::Startup(_)) => {
                    if original_startup.is_none() {
                        original_startup = Some(err);
                    }
                    if attempt == attempts {
                        break;
                    }
                    // A broken pipe cannot recover by re-asking; replace
                    // the process before the next attempt.
                    self.stop().await;
                    if let Err(restart_err) = self.start().await {
                        warn!(
                            alias = %self.spec.alias,
                            error = %restart_err,
                            "restart failed during retry"
                        );
                        break;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(original_startup
            .unwrap_or_else(|| Error::startup(format!("{} call attempts exhausted", self.spec.alias))))
    }

    /// Terminate the child: graceful signal, short wait, then force kill.
    /// Always clears internal state. Idempotent.
    async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate_gracefully(&mut child);
            match tokio::time::timeout(self.runtime.stop_grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(alias = %self.spec.alias, "graceful stop timed out, killing");
                    let _ = child.kill().await;
                }
            }
        }
        self.stdin = None;
        self.stdout = None;
        self.pending.clear();
        self.started_at = None;
    }

    /// True iff a child exists and has not exited.
    fn is_healthy(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Point-in-time status for introspection.
    fn status(&mut self) -> RunnerStatus {
        RunnerStatus {
            alias: self.spec.alias.clone(),
            transport: self.spec.transport.clone(),
            runner_id: self.runner_id.clone(),
            healthy: self.is_healthy(),
            restarts: self.restarts,
            started_at: self.started_at,
        }
    }
}

/// Best effort graceful termination: SIGTERM on unix, direct kill elsewhere.
fn terminate_gracefully(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                return;
            }
        }
        let _ = child.start_kill();
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

impl Drop for StdioRunner {
    fn drop(&mut self) {
        // Best effort cleanup for runners dropped without stop().
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}
