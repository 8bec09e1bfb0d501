//! Tool process runners.
//!
//! A runner owns one child process and the request/response protocol to
//! it. `StdioRunner` is the only transport implementation; the actor in
//! [`actor`] wraps any [`Runner`] in a task so per-runner serialization
//! is structural rather than a locking convention.

mod actor;
mod allowlist;
mod backoff;
mod stdio;

pub use actor::{RunnerCommand, RunnerHandle};
pub use allowlist::{is_command_allowed, normalize_command_name};
pub use backoff::BackoffSchedule;
pub use stdio::StdioRunner;

use crate::types::{Result, RunnerStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One supervised tool process.
///
/// All methods take `&mut self`: a runner tolerates exactly one request
/// in flight, and the owning actor task is the single caller.
#[async_trait]
pub trait Runner: Send + std::fmt::Debug {
    /// Spawn and handshake the child if it is not already healthy.
    async fn start(&mut self) -> Result<()>;

    /// One request/response exchange with no retry policy.
    async fn request(&mut self, payload: &Value, timeout: Duration) -> Result<Value>;

    /// Request with timeout backoff and restart-on-startup-failure.
    async fn call_with_retry(
        &mut self,
        payload: &Value,
        timeout: Duration,
        attempts: u32,
    ) -> Result<Value>;

    /// Terminate the child and clear state. Idempotent.
    async fn stop(&mut self);

    /// True iff a child exists and has not exited.
    fn is_healthy(&mut self) -> bool;

    /// Introspection snapshot.
    fn status(&mut self) -> RunnerStatus;
}
