//! Plugin manifest discovery.
//!
//! A plugin drops a `*.toml` manifest with the same `[tools.<alias>]`
//! schema as the main config into a well-known directory. Manifests are
//! read in sorted filename order so alias collisions resolve the same
//! way on every host: the first loaded entry wins.

use crate::types::{Config, Result, ToolSpec};
use std::path::Path;
use tracing::{debug, warn};

/// Scan `dir` for tool manifests and return their specs in load order.
///
/// An unreadable or invalid manifest is logged and skipped rather than
/// failing the scan; only a missing or unreadable directory is an
/// error.
pub fn discover_plugins(dir: &Path) -> Result<Vec<ToolSpec>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut specs = Vec::new();
    for path in &paths {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable manifest");
                continue;
            }
        };
        match Config::from_toml_str(&raw, &path.display().to_string()) {
            Ok(manifest) => {
                debug!(
                    path = %path.display(),
                    tools = manifest.tools.len(),
                    "loaded plugin manifest"
                );
                let mut tools: Vec<ToolSpec> = manifest.tools.into_values().collect();
                tools.sort_by(|a, b| a.alias.cmp(&b.alias));
                specs.extend(tools);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping invalid manifest");
            }
        }
    }
    Ok(specs)
}
