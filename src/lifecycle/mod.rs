//! Tool lifecycle management.
//!
//! The lifecycle manager is the single entry point for invoking a tool
//! by alias. It owns the runner table and circuit breaker table
//! exclusively; callers never touch a runner or circuit directly.
//!
//! `call` is the trust boundary: every classified failure (and,
//! defensively, anything unclassified) is converted into a structured
//! [`ToolResponse`] with `ok = false`. The one exception is alias
//! resolution itself, which stays a hard error so misconfigured callers
//! fail loudly instead of retrying a tool that does not exist.

mod circuit;

pub use circuit::{CircuitBreaker, CircuitState};

use crate::metrics::MetricsSink;
use crate::registry::Registry;
use crate::runner::{Runner, RunnerHandle, StdioRunner};
use crate::types::{
    CallId, Config, Error, Result, RunnerStatus, RuntimeConfig, ToolRequest, ToolResponse,
    ToolSpec,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};

/// Runner table key. One live runner per key at any time.
type RunnerKey = (String, String);

/// Constructor for runners, keyed off the spec's transport.
///
/// Injected so embedders can add transports and tests can substitute
/// scripted runners; the default builds a [`StdioRunner`].
pub type RunnerFactory = Box<
    dyn Fn(Arc<ToolSpec>, Option<Vec<String>>, RuntimeConfig) -> Result<Box<dyn Runner>>
        + Send
        + Sync,
>;

/// Orchestrates runners keyed by `(alias, transport)`, wrapping every
/// call with breaker checks, param validation, and metrics.
pub struct LifecycleManager {
    registry: Arc<dyn Registry>,
    runtime: RuntimeConfig,
    allow_commands: Option<Vec<String>>,
    breaker: CircuitBreaker,
    metrics: Arc<dyn MetricsSink>,
    runners: RwLock<HashMap<RunnerKey, RunnerHandle>>,
    /// Per-key creation locks so concurrent first calls build one runner.
    creation_slots: Mutex<HashMap<RunnerKey, Arc<tokio::sync::Mutex<()>>>>,
    factory: RunnerFactory,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        config: &Config,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            runtime: config.runtime.clone(),
            allow_commands: config.allow_commands.clone(),
            breaker: CircuitBreaker::new(config.runtime.breaker.clone()),
            metrics,
            runners: RwLock::new(HashMap::new()),
            creation_slots: Mutex::new(HashMap::new()),
            factory: Box::new(|spec, allow, runtime| {
                let runner: Box<dyn Runner> = Box::new(StdioRunner::new(spec, allow, runtime)?);
                Ok(runner)
            }),
        }
    }

    /// Replace how runners are constructed.
    pub fn with_runner_factory(mut self, factory: RunnerFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Invoke a tool by alias.
    ///
    /// Returns `Err` only for an unknown alias; every other failure
    /// comes back as `ok = false` with the error message and transport
    /// metadata attached.
    #[instrument(
        name = "tool_call",
        skip(self, request),
        fields(call_id = %CallId::new(), method = %request.method)
    )]
    pub async fn call(&self, alias: &str, request: ToolRequest) -> Result<ToolResponse> {
        let spec = self.registry.get(alias)?;

        self.metrics.incr_counter("tool_call_total", &[("alias", alias)]);

        if !self.breaker.allow(alias) {
            debug!(alias, "circuit open, shedding call");
            self.metrics
                .incr_counter("circuit_rejected_total", &[("alias", alias)]);
            return Ok(tag(ToolResponse::failure("circuit open"), &spec));
        }

        // Params that fail the schema never reach the runner and are not
        // a breaker failure; the tool did nothing wrong.
        let params = Value::Object(request.params.clone());
        if let Err(err) = self.registry.validate_params(alias, &params) {
            debug!(alias, error = %err, "rejecting call params");
            let message = match err {
                Error::Validation(msg) => msg,
                other => other.to_string(),
            };
            return Ok(tag(ToolResponse::failure(message), &spec));
        }

        let timeout = spec.call_timeout(request.timeout_s);
        let started = Instant::now();
        let outcome = match self.ensure_runner(&spec).await {
            Ok(handle) => handle.call(request.wire_payload(), timeout).await,
            Err(err) => Err(err),
        };
        let elapsed = started.elapsed();
        self.metrics
            .observe_duration("tool_call_duration", elapsed, &[("alias", alias)]);

        match outcome {
            Ok(raw) => {
                self.breaker.record_success(alias);
                Ok(tag(ToolResponse::success(unwrap_result_key(raw)), &spec)
                    .with_metric("duration_ms", elapsed.as_millis() as u64))
            }
            Err(err) if err.is_classified_failure() => {
                debug!(alias, error = %err, "tool call failed");
                self.breaker.record_failure(alias);
                self.metrics
                    .incr_counter("tool_call_failure_total", &[("alias", alias)]);
                Ok(tag(ToolResponse::failure(err.to_string()), &spec)
                    .with_metric("duration_ms", elapsed.as_millis() as u64))
            }
            Err(err) => {
                error!(alias, error = %err, "unexpected error during tool call");
                self.breaker.record_failure(alias);
                self.metrics
                    .incr_counter("tool_call_failure_total", &[("alias", alias)]);
                Ok(tag(ToolResponse::failure("unexpected error"), &spec))
            }
        }
    }

    /// Start a tool's runner without calling it.
    pub async fn start_tool(&self, alias: &str) -> Result<()> {
        let spec = self.registry.get(alias)?;
        self.ensure_runner(&spec).await.map(|_| ())
    }

    /// Stop and forget every runner for an alias.
    pub async fn stop_tool(&self, alias: &str) {
        let handles: Vec<RunnerHandle> = {
            let mut runners = self.runners.write().await;
            let keys: Vec<RunnerKey> = runners
                .keys()
                .filter(|key| key.0 == alias)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| runners.remove(&key))
                .collect()
        };
        futures::future::join_all(handles.iter().map(|handle| handle.stop())).await;
    }

    /// Concurrently stop every live runner and clear the table.
    pub async fn stop_all(&self) {
        let handles: Vec<RunnerHandle> = {
            let mut runners = self.runners.write().await;
            runners.drain().map(|(_, handle)| handle).collect()
        };
        info!(count = handles.len(), "stopping all runners");
        futures::future::join_all(handles.iter().map(|handle| handle.stop())).await;
    }

    /// Snapshot of every live runner, sorted by key.
    pub async fn status(&self) -> Vec<RunnerStatus> {
        let runners = self.runners.read().await;
        let mut statuses: Vec<RunnerStatus> =
            runners.values().map(|handle| handle.status()).collect();
        statuses.sort_by(|a, b| (&a.alias, &a.transport).cmp(&(&b.alias, &b.transport)));
        statuses
    }

    /// Look up the live runner for this spec, or build and start one.
    ///
    /// A handle that reports unhealthy is replaced with a fresh
    /// instance. A runner whose start fails is never inserted, so the
    /// next call gets a clean attempt; shedding repeated start failures
    /// is the breaker's job, not the table's.
    async fn ensure_runner(&self, spec: &Arc<ToolSpec>) -> Result<RunnerHandle> {
        let key = (spec.alias.clone(), spec.transport.clone());

        if let Some(handle) = self.live_handle(&key).await {
            return Ok(handle);
        }

        let slot = self.slot(&key);
        let _guard = slot.lock().await;

        // someone else may have built it while we waited on the slot
        if let Some(handle) = self.live_handle(&key).await {
            return Ok(handle);
        }

        let runner = (self.factory)(
            spec.clone(),
            self.allow_commands.clone(),
            self.runtime.clone(),
        )?;
        let handle = RunnerHandle::spawn(runner, self.runtime.retry.attempts);
        handle.start().await?;

        let mut runners = self.runners.write().await;
        runners.insert(key, handle.clone());
        Ok(handle)
    }

    async fn live_handle(&self, key: &RunnerKey) -> Option<RunnerHandle> {
        let runners = self.runners.read().await;
        runners
            .get(key)
            .filter(|handle| handle.is_healthy())
            .cloned()
    }

    fn slot(&self, key: &RunnerKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self
            .creation_slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(key.clone()).or_default().clone()
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("runtime", &self.runtime)
            .field("allow_commands", &self.allow_commands)
            .finish()
    }
}

fn tag(response: ToolResponse, spec: &ToolSpec) -> ToolResponse {
    response.with_metric("transport", spec.transport.as_str())
}

/// A `result` key, if present, is the payload; a response object
/// without one yields null. Non-object responses pass through whole.
fn unwrap_result_key(raw: Value) -> Value {
    match raw {
        Value::Object(mut map) => map.remove("result").unwrap_or(Value::Null),
        other => other,
    }
}
