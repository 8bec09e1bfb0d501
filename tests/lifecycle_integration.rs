//! End-to-end tests: config TOML in, `ToolBus` calls against the real
//! `valet-echo` binary out, covering the success path, breaker opening,
//! allowlist refusal, and registry reload.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use valet_core::lifecycle::LifecycleManager;
use valet_core::metrics::NoopMetrics;
use valet_core::registry::{Registry, ToolRegistry};
use valet_core::types::Error;
use valet_core::{Config, ToolBus};

const RUNTIME: &str = r#"
[runtime]
startup_timeout = "5s"
max_restarts = 2
stop_grace = "1s"

[runtime.retry]
attempts = 2
base_delay = "20ms"
max_delay = "60ms"
jitter = "0s"
"#;

/// Helper: one `[tools.<alias>]` entry pointing at the compiled
/// valet-echo binary, optionally with a fixture failure mode.
fn tool_entry(alias: &str, mode: Option<&str>) -> String {
    let mut entry = format!(
        "[tools.{alias}]\nname = \"{alias}\"\ncommand = \"{}\"\ntimeout_s = 5.0\n",
        env!("CARGO_BIN_EXE_valet-echo"),
    );
    if let Some(mode) = mode {
        entry.push_str(&format!(
            "[tools.{alias}.env]\nVALET_ECHO_MODE = \"{mode}\"\n"
        ));
    }
    entry
}

fn bus_for(toml: &str) -> ToolBus {
    let config = Config::from_toml_str(toml, "inline").unwrap();
    ToolBus::from_config(&config, Arc::new(NoopMetrics)).unwrap()
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_call_round_trips_through_a_real_process() {
    let toml = format!("{RUNTIME}\n{}", tool_entry("echo", None));
    let bus = bus_for(&toml);

    let response = bus
        .call("echo", "echo", params(json!({"value": "hi"})), None)
        .await
        .unwrap();

    assert!(response.ok, "unexpected failure: {:?}", response.error);
    assert_eq!(response.result, Some(json!({"value": "hi"})));
    assert_eq!(response.metrics.get("transport"), Some(&json!("stdio")));
    assert!(response.metrics.contains_key("duration_ms"));

    bus.shutdown().await;
}

#[tokio::test]
async fn test_startup_failures_open_the_circuit() {
    let toml = format!("{RUNTIME}\n{}", tool_entry("garbled", Some("garbage")));
    let bus = bus_for(&toml);

    for _ in 0..3 {
        let response = bus
            .call("garbled", "echo", Map::new(), None)
            .await
            .unwrap();
        assert!(!response.ok);
        assert!(response.error.as_deref().unwrap().contains("invalid handshake"));
    }

    // threshold reached: the next call is shed without spawning
    let response = bus
        .call("garbled", "echo", Map::new(), None)
        .await
        .unwrap();
    assert_eq!(response.error.as_deref(), Some("circuit open"));

    // failed starts never reach the runner table
    assert!(bus.status().await.is_empty());
    bus.shutdown().await;
}

#[tokio::test]
async fn test_empty_allowlist_refuses_every_spawn() {
    let toml = format!(
        "allow_commands = []\n{RUNTIME}\n{}",
        tool_entry("echo", None)
    );
    let bus = bus_for(&toml);

    let response = bus.call("echo", "echo", Map::new(), None).await.unwrap();
    assert!(!response.ok);
    assert!(response.error.as_deref().unwrap().contains("not allowed"));
    assert!(bus.status().await.is_empty());
}

#[tokio::test]
async fn test_reload_swaps_the_table_without_touching_live_runners() {
    let before = format!(
        "{RUNTIME}\n{}\n{}",
        tool_entry("echo", None),
        tool_entry("extra", None)
    );
    let config = Config::from_toml_str(&before, "inline").unwrap();
    let registry = Arc::new(ToolRegistry::from_config(&config).unwrap());
    let lifecycle = Arc::new(LifecycleManager::new(
        registry.clone(),
        &config,
        Arc::new(NoopMetrics),
    ));
    let bus = ToolBus::new(registry.clone(), lifecycle);

    let response = bus
        .call("echo", "echo", params(json!({"n": 1})), None)
        .await
        .unwrap();
    assert!(response.ok);

    // specs resolved before the reload stay readable afterwards
    let held = bus.tool("extra").unwrap();

    let after = format!("{RUNTIME}\n{}", tool_entry("echo", None));
    let reloaded = Config::from_toml_str(&after, "inline").unwrap();
    registry.reload(&reloaded).unwrap();

    assert_eq!(held.name, "extra");
    assert!(matches!(bus.tool("extra"), Err(Error::UnknownTool(_))));
    assert!(matches!(
        bus.call("extra", "echo", Map::new(), None).await,
        Err(Error::UnknownTool(_))
    ));
    assert_eq!(bus.list_tools(), vec!["echo"]);

    // the running echo process is unaffected
    let response = bus
        .call("echo", "echo", params(json!({"n": 2})), None)
        .await
        .unwrap();
    assert!(response.ok);
    assert_eq!(bus.status().await.len(), 1);

    bus.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_clears_runners_and_allows_fresh_calls() {
    let toml = format!("{RUNTIME}\n{}", tool_entry("echo", None));
    let bus = bus_for(&toml);

    bus.call("echo", "echo", Map::new(), None).await.unwrap();
    assert_eq!(bus.status().await.len(), 1);

    bus.shutdown().await;
    assert!(bus.status().await.is_empty());

    // a later call spawns a fresh runner
    let response = bus.call("echo", "echo", Map::new(), None).await.unwrap();
    assert!(response.ok);
    assert_eq!(bus.status().await.len(), 1);

    bus.shutdown().await;
}
