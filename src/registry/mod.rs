//! Tool registry.
//!
//! Maps alias to [`ToolSpec`] behind an atomically swappable snapshot.
//! Readers clone an `Arc` of the whole table and resolve against that,
//! so a concurrent [`Registry::reload`] can never expose a half-merged
//! view: a lookup sees the old table or the new one, nothing in
//! between.
//!
//! Params schemas are compiled once here, at load time, so the call
//! path only runs an already-built validator.

mod discovery;

pub use discovery::discover_plugins;

use crate::types::{Config, Error, Result, ToolSpec};
use semver::{Version, VersionReq};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Read surface the lifecycle manager and tool bus resolve tools
/// through.
pub trait Registry: Send + Sync {
    /// Resolve an alias. Unknown aliases are a hard error, the one
    /// failure the runtime does not convert into a response.
    fn get(&self, alias: &str) -> Result<Arc<ToolSpec>>;

    /// Resolve an alias and require its declared version to satisfy a
    /// semver requirement. Fails closed: no declared version, an
    /// unparseable version, and a non-matching version are all errors.
    fn get_versioned(&self, alias: &str, requirement: &str) -> Result<Arc<ToolSpec>>;

    /// All registered aliases, sorted.
    fn list(&self) -> Vec<String>;

    /// Check `params` against the alias's schema, if it declares one.
    fn validate_params(&self, alias: &str, params: &Value) -> Result<()>;

    /// Replace the whole table with one built from `config`.
    fn reload(&self, config: &Config) -> Result<()>;
}

/// One loaded tool: its spec plus the compiled params validator.
#[derive(Clone)]
struct RegisteredTool {
    spec: Arc<ToolSpec>,
    params_validator: Option<Arc<jsonschema::Validator>>,
}

impl RegisteredTool {
    fn compile(spec: ToolSpec) -> Result<Self> {
        let params_validator = match &spec.params_schema {
            Some(schema) => {
                let validator = jsonschema::validator_for(schema).map_err(|e| {
                    Error::config(format!("invalid params_schema for {}: {e}", spec.alias))
                })?;
                Some(Arc::new(validator))
            }
            None => None,
        };
        Ok(Self {
            spec: Arc::new(spec),
            params_validator,
        })
    }
}

type Snapshot = Arc<HashMap<String, RegisteredTool>>;

/// Config-backed [`Registry`] with snapshot-swap reload.
pub struct ToolRegistry {
    snapshot: RwLock<Snapshot>,
}

impl ToolRegistry {
    /// Build the registry from a loaded config, compiling every params
    /// schema. A malformed schema fails the whole load.
    pub fn from_config(config: &Config) -> Result<Self> {
        let table = build_table(config)?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(table)),
        })
    }

    /// Merge discovered plugin specs into the live table.
    ///
    /// Already-registered aliases win over discovered ones, and a
    /// discovered tool that fails to compile is skipped; a bad plugin
    /// manifest must not take down a running host. Returns how many
    /// tools were merged.
    pub fn merge_discovered(&self, specs: Vec<ToolSpec>) -> usize {
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut table = (**snapshot).clone();

        let mut merged = 0;
        for spec in specs {
            let alias = spec.alias.clone();
            if table.contains_key(&alias) {
                warn!(alias = %alias, "discovered tool shadowed by existing entry");
                continue;
            }
            match RegisteredTool::compile(spec) {
                Ok(tool) => {
                    table.insert(alias, tool);
                    merged += 1;
                }
                Err(err) => {
                    warn!(alias = %alias, error = %err, "skipping discovered tool");
                }
            }
        }

        *snapshot = Arc::new(table);
        merged
    }

    fn current(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("aliases", &self.list())
            .finish()
    }
}

impl Registry for ToolRegistry {
    fn get(&self, alias: &str) -> Result<Arc<ToolSpec>> {
        self.current()
            .get(alias)
            .map(|tool| tool.spec.clone())
            .ok_or_else(|| Error::unknown_tool(alias))
    }

    fn get_versioned(&self, alias: &str, requirement: &str) -> Result<Arc<ToolSpec>> {
        let spec = self.get(alias)?;
        let requirement_parsed = VersionReq::parse(requirement).map_err(|e| {
            Error::version_mismatch(format!("invalid version requirement {requirement}: {e}"))
        })?;

        let declared = spec.version.as_deref().ok_or_else(|| {
            Error::version_mismatch(format!(
                "{alias} declares no version but {requirement} was required"
            ))
        })?;
        let version = Version::parse(declared).map_err(|e| {
            Error::version_mismatch(format!("{alias} has unparseable version {declared}: {e}"))
        })?;

        if requirement_parsed.matches(&version) {
            Ok(spec)
        } else {
            Err(Error::version_mismatch(format!(
                "{alias} is {declared}, required {requirement}"
            )))
        }
    }

    fn list(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.current().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    fn validate_params(&self, alias: &str, params: &Value) -> Result<()> {
        let snapshot = self.current();
        let Some(validator) = snapshot
            .get(alias)
            .and_then(|tool| tool.params_validator.as_deref())
        else {
            return Ok(());
        };

        validator.validate(params).map_err(|err| {
            Error::validation(format!("tool call validation failed for {alias}: {err}"))
        })
    }

    fn reload(&self, config: &Config) -> Result<()> {
        let table = build_table(config)?;
        info!(tools = table.len(), "registry reloaded");
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *snapshot = Arc::new(table);
        Ok(())
    }
}

fn build_table(config: &Config) -> Result<HashMap<String, RegisteredTool>> {
    let mut table = HashMap::with_capacity(config.tools.len());
    for (alias, spec) in &config.tools {
        table.insert(alias.clone(), RegisteredTool::compile(spec.clone())?);
    }
    Ok(table)
}
