//! # Valet Core - Tool Execution Runtime
//!
//! Runtime for agent frameworks that need to call external tool
//! processes reliably:
//! - Subprocess runners speaking a JSON-line protocol over stdio
//! - Startup handshake, restart budget, and command allowlist
//! - Retry with backoff for slow tools, restart for broken ones
//! - Per-tool circuit breaker to shed load from failing tools
//! - Declarative TOML tool registry with atomic reload
//!
//! ## Architecture
//!
//! Every runner is owned by one task; callers go through the lifecycle
//! manager, which applies the cross-cutting reliability concerns:
//! ```text
//!                   ┌───────────────────────────────┐
//!   adapter calls → │           Tool Bus            │
//!                   └───────────────┬───────────────┘
//!                   ┌───────────────▼───────────────┐
//!                   │       Lifecycle Manager       │
//!                   │  (breaker, validation, metrics)
//!                   └───────┬───────────────┬───────┘
//!                      ┌────▼────┐     ┌────▼────┐
//!                      │ runner  │ ... │ runner  │
//!                      │  task   │     │  task   │
//!                      └────┬────┘     └────┬────┘
//!                     child process    child process
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod bus;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod runner;
pub mod types;

// Internal utilities
pub mod observability;

pub use bus::ToolBus;
pub use types::{Config, Error, Result};
