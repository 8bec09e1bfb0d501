//! Request/response contract between callers and the tool runtime.
//!
//! `ToolRequest` and `ToolResponse` are the only shapes that cross the
//! runtime boundary. The wire framing toward child processes is built
//! from these but is not these: see `runner::stdio` for the line
//! protocol.

use crate::types::ids::RunnerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Method name forwarded to the tool process.
    pub method: String,

    /// Method parameters, forwarded verbatim.
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Per-call timeout override in seconds. Falls back to the spec's
    /// `timeout_s` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
}

impl ToolRequest {
    pub fn new(method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            params,
            timeout_s: None,
        }
    }

    pub fn with_timeout(mut self, timeout_s: f64) -> Self {
        self.timeout_s = Some(timeout_s);
        self
    }

    /// Wire payload for this request: `{"method":...,"params":{...}}`.
    ///
    /// The timeout never crosses the wire; it only shapes how long the
    /// runner waits for the reply line.
    pub fn wire_payload(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("method".to_string(), Value::String(self.method.clone()));
        obj.insert("params".to_string(), Value::Object(self.params.clone()));
        Value::Object(obj)
    }
}

/// Uniform tool invocation outcome.
///
/// Exactly one of `result`/`error` is meaningful, gated by `ok`. Errors
/// never cross the runtime boundary as exceptions; they arrive here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,

    /// Tool-provided payload, opaque to the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Call metadata: at minimum the transport used, usually also
    /// latency and attempt counts.
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

impl ToolResponse {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            metrics: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
            metrics: Map::new(),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }
}

/// Point-in-time snapshot of one live runner, keyed by `(alias, transport)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub alias: String,
    pub transport: String,
    pub runner_id: RunnerId,
    pub healthy: bool,
    /// Respawns consumed from the restart budget so far.
    pub restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}
