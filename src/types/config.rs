//! Configuration structures.
//!
//! Tool tables are declarative TOML. Each `[tools.<alias>]` entry is
//! deep-merged with the shared `[defaults]` table (entry wins key by key,
//! env maps are merged rather than replaced) before being decoded into an
//! immutable [`ToolSpec`].

use crate::types::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const ENV_CONFIG_PATH: &str = "VALET_CONFIG";

/// Config filename probed in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "valet.toml";

/// The only transport this runtime implements.
pub const TRANSPORT_STDIO: &str = "stdio";

/// Static description of one tool. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolSpec {
    /// Unique key for registry, runner table, and circuit state.
    pub alias: String,

    /// Human-readable tool name.
    pub name: String,

    /// Semantic version of the tool, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Transport used to reach the tool. Only `"stdio"` is executable;
    /// anything else is kept verbatim and refused at runner creation.
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Executable to spawn. Required for the stdio transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overlay, merged over the parent process environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Advertised capability tags, surfaced by `list_tools`.
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Named pool this tool belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// Per-call timeout in seconds unless the request overrides it.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,

    /// Optional JSON Schema validated against request params before the
    /// call reaches the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<serde_json::Value>,
}

impl ToolSpec {
    /// Per-call timeout as a `Duration`, honoring a request override.
    ///
    /// Overrides arrive from untrusted request JSON, so this is total
    /// for any float: NaN and non-positive values collapse to
    /// `Duration::ZERO`, values a `Duration` cannot hold saturate to
    /// `Duration::MAX`.
    pub fn call_timeout(&self, override_s: Option<f64>) -> Duration {
        let seconds = override_s.unwrap_or(self.timeout_s);
        if seconds.is_nan() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

impl Default for ToolSpec {
    fn default() -> Self {
        Self {
            alias: String::new(),
            name: String::new(),
            version: None,
            transport: default_transport(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            capabilities: Vec::new(),
            working_dir: None,
            pool: None,
            timeout_s: default_timeout_s(),
            params_schema: None,
        }
    }
}

fn default_transport() -> String {
    TRANSPORT_STDIO.to_string()
}

fn default_timeout_s() -> f64 {
    30.0
}

/// Named pool definition. Parsed and validated as data; the runtime does
/// not pool connections yet. Omitted fields take the `Default` values.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PoolConfig {
    pub max_active: u32,
    pub min_idle: u32,
    pub idle_ttl_s: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 4,
            min_idle: 0,
            idle_ttl_s: 30.0,
        }
    }
}

/// Retry/backoff knobs for `call_with_retry`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryConfig {
    /// Total attempts per call, first try included.
    pub attempts: u32,

    /// First backoff delay; doubles per retry.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub base_delay: Duration,

    /// Backoff ceiling before jitter.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub max_delay: Duration,

    /// Upper bound of the random jitter added to every delay.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            jitter: Duration::from_millis(100),
        }
    }
}

/// Circuit breaker knobs, applied per alias.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BreakerConfig {
    /// Consecutive classified failures that open the circuit.
    pub failure_threshold: u32,

    /// How long an open circuit sheds load before the next probe.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Process supervision knobs shared by all runners.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    /// Handshake deadline after spawn.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub startup_timeout: Duration,

    /// Respawns tolerated per runner before it is refused outright.
    pub max_restarts: u32,

    /// Grace period between SIGTERM and force kill on stop.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub stop_grace: Duration,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            max_restarts: 2,
            stop_grace: Duration::from_secs(3),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Root runtime configuration.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct Config {
    /// Tool table after defaults merging, keyed by alias.
    pub tools: HashMap<String, ToolSpec>,

    /// Commands permitted to spawn. `None` permits everything; an empty
    /// list denies everything.
    pub allow_commands: Option<Vec<String>>,

    /// Named pool definitions referenced by `ToolSpec.pool`.
    pub pools: HashMap<String, PoolConfig>,

    pub runtime: RuntimeConfig,
}

/// File-shaped view before defaults merging. Tool entries stay raw TOML
/// tables so the `[defaults]` merge can happen key by key.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    tools: HashMap<String, toml::Table>,

    #[serde(default)]
    allow_commands: Option<Vec<String>>,

    #[serde(default)]
    pools: HashMap<String, PoolConfig>,

    #[serde(default)]
    defaults: Option<toml::Table>,

    #[serde(default)]
    runtime: Option<RuntimeConfig>,
}

impl Config {
    /// Parse config from a TOML string. `origin` names the source in
    /// error messages (a path, or "inline" in tests).
    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self> {
        let raw_config: RawConfig = toml::from_str(raw)
            .map_err(|e| Error::config(format!("failed to parse {origin}: {e}")))?;
        Self::from_raw(raw_config, origin)
    }

    /// Load config from a file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw, &path.display().to_string())
    }

    /// Resolve and load the active config.
    ///
    /// Order: explicit path, then `VALET_CONFIG`, then `./valet.toml`.
    /// An explicitly named file must exist; the probed fallbacks may be
    /// absent, in which case the built-in defaults apply.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(from_env) = std::env::var(ENV_CONFIG_PATH) {
            return Self::load(PathBuf::from(from_env));
        }
        let probed = PathBuf::from(DEFAULT_CONFIG_FILENAME);
        if probed.exists() {
            return Self::load(probed);
        }
        tracing::debug!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    fn from_raw(raw: RawConfig, origin: &str) -> Result<Self> {
        let defaults = raw.defaults.unwrap_or_default();
        let mut tools = HashMap::with_capacity(raw.tools.len());
        for (alias, entry) in raw.tools {
            let merged = merge_tool_entry(&defaults, entry, &alias);
            let spec: ToolSpec = toml::Value::Table(merged).try_into().map_err(|e| {
                Error::config(format!("invalid tool entry [tools.{alias}] in {origin}: {e}"))
            })?;
            tools.insert(alias, spec);
        }

        for (alias, spec) in &tools {
            if let Some(pool) = &spec.pool {
                if !raw.pools.contains_key(pool) {
                    return Err(Error::config(format!(
                        "tool {alias} references undefined pool {pool} in {origin}"
                    )));
                }
            }
        }

        Ok(Self {
            tools,
            allow_commands: raw.allow_commands,
            pools: raw.pools,
            runtime: raw.runtime.unwrap_or_default(),
        })
    }
}

/// Merge one tool entry over the shared defaults table.
///
/// Entry wins on every top-level key except `env`, which is merged key by
/// key (entry wins per key). The alias always comes from the table key.
fn merge_tool_entry(defaults: &toml::Table, entry: toml::Table, alias: &str) -> toml::Table {
    let mut env = defaults
        .get("env")
        .and_then(|v| v.as_table())
        .cloned()
        .unwrap_or_default();
    if let Some(entry_env) = entry.get("env").and_then(|v| v.as_table()) {
        for (key, value) in entry_env {
            env.insert(key.clone(), value.clone());
        }
    }

    let mut merged = defaults.clone();
    for (key, value) in entry {
        merged.insert(key, value);
    }
    merged.insert("env".to_string(), toml::Value::Table(env));
    merged.insert("alias".to_string(), toml::Value::String(alias.to_string()));
    merged
}
