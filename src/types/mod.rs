//! Core types for the valet runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (CallId, RunnerId)
//! - **Errors**: Runtime error taxonomy with thiserror derives
//! - **Config**: Tool table, allowlist, pools, and supervision knobs
//! - **Messages**: The ToolRequest/ToolResponse caller contract

mod config;
mod errors;
mod ids;
mod messages;

pub use config::{
    BreakerConfig, Config, PoolConfig, RetryConfig, RuntimeConfig, ToolSpec,
    DEFAULT_CONFIG_FILENAME, ENV_CONFIG_PATH, TRANSPORT_STDIO,
};
pub use errors::{Error, Result};
pub use ids::{CallId, RunnerId};
pub use messages::{RunnerStatus, ToolRequest, ToolResponse};
