//! Valet command line - inspect and exercise a tool config.
//!
//! One-shot commands over the same runtime the library embeds:
//! - `list`: registered tools
//! - `call`: invoke a tool method and print the response
//! - `status`: start each tool's runner and report health
//! - `schema`: JSON schema of the config file

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use valet_core::bus::ToolBus;
use valet_core::lifecycle::LifecycleManager;
use valet_core::metrics::NoopMetrics;
use valet_core::registry::{discover_plugins, ToolRegistry};
use valet_core::Config;

#[derive(Parser, Debug)]
#[command(name = "valet")]
#[command(about = "Tool execution runtime for agent frameworks", long_about = None)]
struct Cli {
    /// Config file path (overrides VALET_CONFIG and ./valet.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of plugin tool manifests to merge
    #[arg(long)]
    plugins: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered tools
    List,

    /// Call a tool method and print the response
    Call {
        /// Tool alias
        alias: String,

        /// Method name
        method: String,

        /// Params as a JSON object string
        #[arg(long, default_value = "{}")]
        params: String,

        /// Per-call timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Start each tool's runner and report health
    Status {
        /// Check a single alias instead of all tools
        alias: Option<String>,
    },

    /// Print the JSON schema of the config file
    Schema,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    valet_core::observability::init_tracing();

    // schema needs no config, and should work even with a broken one
    if let Commands::Schema = cli.command {
        let schema = schemars::schema_for!(Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = Config::resolve(cli.config.as_deref())?;
    let registry = Arc::new(ToolRegistry::from_config(&config)?);
    if let Some(dir) = &cli.plugins {
        let merged = registry.merge_discovered(discover_plugins(dir)?);
        tracing::info!(merged, dir = %dir.display(), "merged plugin manifests");
    }
    let lifecycle = Arc::new(LifecycleManager::new(
        registry.clone(),
        &config,
        Arc::new(NoopMetrics),
    ));
    let bus = ToolBus::new(registry, lifecycle.clone());

    match cli.command {
        Commands::List => {
            let mut tools = Vec::new();
            for alias in bus.list_tools() {
                let spec = bus.tool(&alias)?;
                tools.push(json!({
                    "alias": alias,
                    "name": spec.name,
                    "version": spec.version,
                    "transport": spec.transport,
                    "capabilities": spec.capabilities,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }

        Commands::Call {
            alias,
            method,
            params,
            timeout,
        } => {
            let params: Map<String, Value> = serde_json::from_str(&params)?;
            let outcome = tokio::select! {
                outcome = bus.call(&alias, &method, params, timeout) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("interrupted, stopping runners");
                    bus.shutdown().await;
                    std::process::exit(130);
                }
            };
            let response = match outcome {
                Ok(response) => response,
                Err(err) => {
                    bus.shutdown().await;
                    return Err(err.into());
                }
            };

            println!("{}", serde_json::to_string_pretty(&response)?);
            bus.shutdown().await;
            if !response.ok {
                std::process::exit(1);
            }
        }

        Commands::Status { alias } => {
            let aliases = match alias {
                Some(alias) => vec![alias],
                None => bus.list_tools(),
            };
            let mut checks = Vec::new();
            for alias in &aliases {
                let outcome = lifecycle.start_tool(alias).await;
                checks.push(json!({
                    "alias": alias,
                    "ok": outcome.is_ok(),
                    "error": outcome.err().map(|e| e.to_string()),
                }));
            }
            let report = json!({
                "checks": checks,
                "runners": lifecycle.status().await,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            bus.shutdown().await;
        }

        // handled before the runtime was built
        Commands::Schema => {}
    }

    Ok(())
}
