//! Runtime error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. The
//! classified variants (startup, call timeout, tool unavailable, circuit
//! open) are the failure taxonomy the lifecycle manager translates into
//! structured `ToolResponse` values; the rest cover registry and config
//! plumbing.

use thiserror::Error;

/// Runtime result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the valet runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Process could not be spawned, the handshake failed, or protocol
    /// framing broke. The child must be considered dead.
    #[error("startup error: {0}")]
    Startup(String),

    /// Process is alive but did not answer within the deadline.
    #[error("call timeout: {0}")]
    CallTimeout(String),

    /// Transport unsupported or the spec cannot be executed.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Breaker is shedding load for this alias. Display is the exact
    /// string callers see in `ToolResponse.error`.
    #[error("circuit open")]
    CircuitOpen { alias: String },

    /// Alias is not present in the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Spec version does not satisfy the requested requirement.
    #[error("version mismatch: {0}")]
    VersionMismatch(String),

    /// Request or schema validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Config loading or interpretation failure.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    pub fn call_timeout(msg: impl Into<String>) -> Self {
        Self::CallTimeout(msg.into())
    }

    pub fn tool_unavailable(msg: impl Into<String>) -> Self {
        Self::ToolUnavailable(msg.into())
    }

    pub fn circuit_open(alias: impl Into<String>) -> Self {
        Self::CircuitOpen {
            alias: alias.into(),
        }
    }

    pub fn unknown_tool(alias: impl Into<String>) -> Self {
        Self::UnknownTool(alias.into())
    }

    pub fn version_mismatch(msg: impl Into<String>) -> Self {
        Self::VersionMismatch(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the failure kinds that feed the circuit breaker.
    pub fn is_classified_failure(&self) -> bool {
        matches!(
            self,
            Self::Startup(_) | Self::CallTimeout(_) | Self::ToolUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_display_is_exact() {
        let err = Error::circuit_open("crypto");
        assert_eq!(err.to_string(), "circuit open");
    }

    #[test]
    fn test_startup_message_is_preserved() {
        let err = Error::startup("command not allowed: /bin/rogue");
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_classified_failures() {
        assert!(Error::startup("x").is_classified_failure());
        assert!(Error::call_timeout("x").is_classified_failure());
        assert!(Error::tool_unavailable("x").is_classified_failure());
        assert!(!Error::unknown_tool("x").is_classified_failure());
        assert!(!Error::circuit_open("x").is_classified_failure());
    }
}
