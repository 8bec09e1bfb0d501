//! Tool bus facade.
//!
//! The one narrow surface agent adapters consume. It builds requests,
//! forwards them to the lifecycle manager, and exposes registry reads;
//! it holds no state of its own.

use crate::lifecycle::LifecycleManager;
use crate::metrics::MetricsSink;
use crate::registry::{Registry, ToolRegistry};
use crate::types::{Config, Result, RunnerStatus, ToolRequest, ToolResponse, ToolSpec};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Stateless front door over registry and lifecycle.
#[derive(Clone)]
pub struct ToolBus {
    registry: Arc<dyn Registry>,
    lifecycle: Arc<LifecycleManager>,
}

impl std::fmt::Debug for ToolBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBus")
            .field("tools", &self.registry.list())
            .finish()
    }
}

impl ToolBus {
    pub fn new(registry: Arc<dyn Registry>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            registry,
            lifecycle,
        }
    }

    /// Assemble registry, lifecycle, and bus from a loaded config.
    pub fn from_config(config: &Config, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let registry = Arc::new(ToolRegistry::from_config(config)?);
        let lifecycle = Arc::new(LifecycleManager::new(registry.clone(), config, metrics));
        Ok(Self::new(registry, lifecycle))
    }

    /// Invoke `method` on the tool behind `alias`.
    pub async fn call(
        &self,
        alias: &str,
        method: &str,
        params: Map<String, Value>,
        timeout_s: Option<f64>,
    ) -> Result<ToolResponse> {
        let mut request = ToolRequest::new(method, params);
        if let Some(timeout_s) = timeout_s {
            request = request.with_timeout(timeout_s);
        }
        self.lifecycle.call(alias, request).await
    }

    /// All registered aliases, sorted.
    pub fn list_tools(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Spec for one alias, for adapters that surface capabilities or
    /// schemas to their planner.
    pub fn tool(&self, alias: &str) -> Result<Arc<ToolSpec>> {
        self.registry.get(alias)
    }

    /// Cloneable single-tool handle. Fails now, not at call time, if
    /// the alias is unknown.
    pub fn handle(&self, alias: &str) -> Result<ToolHandle> {
        self.registry.get(alias)?;
        Ok(ToolHandle {
            alias: alias.to_string(),
            lifecycle: self.lifecycle.clone(),
        })
    }

    /// Live runner snapshots.
    pub async fn status(&self) -> Vec<RunnerStatus> {
        self.lifecycle.status().await
    }

    /// Stop every runner. Call before the process exits.
    pub async fn shutdown(&self) {
        self.lifecycle.stop_all().await;
    }
}

/// One tool, pre-resolved. What langchain-style adapters hold.
#[derive(Debug, Clone)]
pub struct ToolHandle {
    alias: String,
    lifecycle: Arc<LifecycleManager>,
}

impl ToolHandle {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub async fn call(&self, method: &str, params: Map<String, Value>) -> Result<ToolResponse> {
        self.lifecycle
            .call(&self.alias, ToolRequest::new(method, params))
            .await
    }
}
