//! Actor wrapper around a [`Runner`].
//!
//! Every runner is owned by exactly one task. Callers hold a cloneable
//! [`RunnerHandle`] and talk to the task over a bounded command channel,
//! so request serialization per runner is structural: there is no lock
//! to hold across an await, and a slow tool call simply queues the next
//! command behind it.
//!
//! Status is published through a `watch` channel after every command,
//! which keeps [`RunnerHandle::status`] non-blocking even while the
//! task is mid-call.

use crate::runner::Runner;
use crate::types::{Error, Result, RunnerStatus};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Commands accepted by a runner task.
#[derive(Debug)]
pub enum RunnerCommand {
    /// Spawn and handshake the child if needed.
    Start { reply: oneshot::Sender<Result<()>> },
    /// One tool call, retried per the runner's policy.
    Call {
        payload: Value,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// Terminate the child. Always succeeds.
    Stop { reply: oneshot::Sender<()> },
}

/// Backpressure bound for queued commands per runner.
const COMMAND_BUFFER: usize = 32;

/// Cloneable handle to a runner task.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    alias: String,
    transport: String,
    tx: mpsc::Sender<RunnerCommand>,
    status_rx: watch::Receiver<RunnerStatus>,
}

impl RunnerHandle {
    /// Move `runner` into its own task and return the handle to it.
    ///
    /// `attempts` is the per-call retry budget forwarded to
    /// [`Runner::call_with_retry`].
    pub fn spawn(mut runner: Box<dyn Runner>, attempts: u32) -> Self {
        let initial = runner.status();
        let alias = initial.alias.clone();
        let transport = initial.transport.clone();

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(initial);
        tokio::spawn(run_actor(runner, rx, status_tx, attempts));

        Self {
            alias,
            transport,
            tx,
            status_rx,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Ask the task to start its runner.
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RunnerCommand::Start { reply })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// One tool call through the task, with the runner's retry policy.
    pub async fn call(&self, payload: Value, timeout: Duration) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RunnerCommand::Call {
                payload,
                timeout,
                reply,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Stop the runner's child process. Waits for the task to confirm.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RunnerCommand::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Last published status. Never blocks; may lag a command in flight.
    pub fn status(&self) -> RunnerStatus {
        self.status_rx.borrow().clone()
    }

    /// Healthy per the last published status.
    pub fn is_healthy(&self) -> bool {
        self.status_rx.borrow().healthy
    }

    fn gone(&self) -> Error {
        Error::startup(format!("runner task for {} is gone", self.alias))
    }
}

/// Task body: drain commands until every handle is dropped, then make
/// sure the child is down.
async fn run_actor(
    mut runner: Box<dyn Runner>,
    mut rx: mpsc::Receiver<RunnerCommand>,
    status_tx: watch::Sender<RunnerStatus>,
    attempts: u32,
) {
    while let Some(command) = rx.recv().await {
        match command {
            RunnerCommand::Start { reply } => {
                let result = runner.start().await;
                status_tx.send_replace(runner.status());
                let _ = reply.send(result);
            }
            RunnerCommand::Call {
                payload,
                timeout,
                reply,
            } => {
                let result = runner.call_with_retry(&payload, timeout, attempts).await;
                status_tx.send_replace(runner.status());
                let _ = reply.send(result);
            }
            RunnerCommand::Stop { reply } => {
                runner.stop().await;
                status_tx.send_replace(runner.status());
                let _ = reply.send(());
            }
        }
    }

    debug!(alias = %status_tx.borrow().alias, "runner task shutting down");
    runner.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunnerId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// In-memory runner whose observable effects live in shared counters.
    #[derive(Debug, Clone)]
    struct ScriptedRunner {
        alias: String,
        healthy: Arc<AtomicBool>,
        starts: Arc<AtomicU32>,
        calls: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
        fail_calls: bool,
    }

    impl ScriptedRunner {
        fn new(alias: &str) -> Self {
            Self {
                alias: alias.to_string(),
                healthy: Arc::new(AtomicBool::new(false)),
                starts: Arc::new(AtomicU32::new(0)),
                calls: Arc::new(AtomicU32::new(0)),
                stops: Arc::new(AtomicU32::new(0)),
                fail_calls: false,
            }
        }
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn start(&mut self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.healthy.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn request(&mut self, payload: &Value, _timeout: Duration) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_calls {
                return Err(Error::call_timeout("scripted timeout"));
            }
            Ok(serde_json::json!({ "result": payload["method"] }))
        }

        async fn call_with_retry(
            &mut self,
            payload: &Value,
            timeout: Duration,
            _attempts: u32,
        ) -> Result<Value> {
            self.request(payload, timeout).await
        }

        async fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.healthy.store(false, Ordering::SeqCst);
        }

        fn is_healthy(&mut self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn status(&mut self) -> RunnerStatus {
            RunnerStatus {
                alias: self.alias.clone(),
                transport: "stdio".to_string(),
                runner_id: RunnerId::new(),
                healthy: self.is_healthy(),
                restarts: self.starts.load(Ordering::SeqCst),
                started_at: None,
            }
        }
    }

    #[tokio::test]
    async fn test_start_and_call_through_handle() {
        let runner = ScriptedRunner::new("echo");
        let calls = runner.calls.clone();
        let handle = RunnerHandle::spawn(Box::new(runner), 3);

        handle.start().await.unwrap();
        let value = handle
            .call(
                serde_json::json!({"method": "ping", "params": {}}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(value["result"], "ping");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_follows_commands() {
        let runner = ScriptedRunner::new("echo");
        let handle = RunnerHandle::spawn(Box::new(runner), 3);

        assert!(!handle.is_healthy());
        handle.start().await.unwrap();
        assert!(handle.is_healthy());
        assert_eq!(handle.status().restarts, 1);

        handle.stop().await;
        assert!(!handle.is_healthy());
    }

    #[tokio::test]
    async fn test_cloned_handles_share_one_runner() {
        let runner = ScriptedRunner::new("echo");
        let calls = runner.calls.clone();
        let handle = RunnerHandle::spawn(Box::new(runner), 3);
        let other = handle.clone();

        handle.start().await.unwrap();
        let payload = serde_json::json!({"method": "ping", "params": {}});
        handle.call(payload.clone(), Duration::from_secs(1)).await.unwrap();
        other.call(payload, Duration::from_secs(1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(other.alias(), "echo");
    }

    #[tokio::test]
    async fn test_call_errors_pass_through() {
        let mut runner = ScriptedRunner::new("echo");
        runner.fail_calls = true;
        let handle = RunnerHandle::spawn(Box::new(runner), 3);

        handle.start().await.unwrap();
        let err = handle
            .call(
                serde_json::json!({"method": "ping", "params": {}}),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CallTimeout(_)));
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_the_runner() {
        let runner = ScriptedRunner::new("echo");
        let stops = runner.stops.clone();
        let handle = RunnerHandle::spawn(Box::new(runner), 3);

        handle.start().await.unwrap();
        drop(handle);

        // the task notices channel closure asynchronously
        for _ in 0..50 {
            if stops.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("runner task never stopped its runner");
    }
}
