//! Runner integration tests: a real `StdioRunner` driving the
//! `valet-echo` fixture binary through handshake, retry, restart, and
//! allowlist paths.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use valet_core::runner::{Runner, StdioRunner};
use valet_core::types::{Error, RetryConfig, RuntimeConfig, ToolSpec};

/// Helper: a spec pointing at the compiled valet-echo binary, with
/// fixture modes injected through its environment.
fn echo_spec(alias: &str, env: &[(&str, &str)]) -> Arc<ToolSpec> {
    let mut env_map = HashMap::new();
    for (key, value) in env {
        env_map.insert(key.to_string(), value.to_string());
    }
    Arc::new(ToolSpec {
        alias: alias.to_string(),
        name: alias.to_string(),
        command: Some(env!("CARGO_BIN_EXE_valet-echo").to_string()),
        env: env_map,
        timeout_s: 5.0,
        ..ToolSpec::default()
    })
}

fn runtime(attempts: u32) -> RuntimeConfig {
    RuntimeConfig {
        startup_timeout: Duration::from_secs(5),
        max_restarts: 2,
        stop_grace: Duration::from_secs(1),
        retry: RetryConfig {
            attempts,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(60),
            jitter: Duration::ZERO,
        },
        breaker: Default::default(),
    }
}

#[tokio::test]
async fn test_handshake_and_echo_round_trip() {
    let mut runner = StdioRunner::new(echo_spec("echo", &[]), None, runtime(3)).unwrap();
    runner.start().await.unwrap();
    assert!(runner.is_healthy());

    let raw = runner
        .request(
            &json!({"method": "echo", "params": {"value": "hi"}}),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(raw["result"], json!({"value": "hi"}));

    runner.stop().await;
    assert!(!runner.is_healthy());
}

#[tokio::test]
async fn test_missing_reply_is_a_call_timeout() {
    let spec = echo_spec(
        "mute",
        &[("VALET_ECHO_MODE", "skip-calls"), ("VALET_ECHO_SKIP", "99")],
    );
    let mut runner = StdioRunner::new(spec, None, runtime(3)).unwrap();
    runner.start().await.unwrap();

    let err = runner
        .request(&json!({"method": "echo", "params": {}}), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CallTimeout(_)));
    // the process is alive, just slow; no restart is implied
    assert!(runner.is_healthy());

    runner.stop().await;
}

#[tokio::test]
async fn test_retry_recovers_after_skipped_replies() {
    let spec = echo_spec(
        "flaky",
        &[("VALET_ECHO_MODE", "skip-calls"), ("VALET_ECHO_SKIP", "2")],
    );
    let mut runner = StdioRunner::new(spec, None, runtime(3)).unwrap();
    runner.start().await.unwrap();

    let raw = runner
        .call_with_retry(
            &json!({"method": "echo", "params": {"n": 1}}),
            Duration::from_millis(200),
            3,
        )
        .await
        .unwrap();
    assert_eq!(raw["result"], json!({"n": 1}));
    // timeouts retry against the same process
    assert_eq!(runner.restarts(), 1);

    runner.stop().await;
}

#[tokio::test]
async fn test_final_timeout_is_returned_as_is() {
    let spec = echo_spec(
        "mute",
        &[("VALET_ECHO_MODE", "skip-calls"), ("VALET_ECHO_SKIP", "99")],
    );
    let mut runner = StdioRunner::new(spec, None, runtime(2)).unwrap();
    runner.start().await.unwrap();

    let err = runner
        .call_with_retry(
            &json!({"method": "echo", "params": {}}),
            Duration::from_millis(150),
            2,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CallTimeout(_)));

    runner.stop().await;
}

#[tokio::test]
async fn test_garbage_handshake_is_a_startup_error() {
    let spec = echo_spec("garbled", &[("VALET_ECHO_MODE", "garbage")]);
    let mut runner = StdioRunner::new(spec, None, runtime(3)).unwrap();

    let err = runner.start().await.unwrap_err();
    assert!(matches!(err, Error::Startup(_)));
    assert!(err.to_string().contains("invalid handshake"));
    assert!(!runner.is_healthy());
}

#[tokio::test]
async fn test_garbage_replies_surface_the_original_startup_error() {
    let spec = echo_spec("garbled", &[("VALET_ECHO_MODE", "garbage-calls")]);
    let mut runner = StdioRunner::new(spec, None, runtime(3)).unwrap();
    runner.start().await.unwrap();

    let err = runner
        .call_with_retry(
            &json!({"method": "echo", "params": {}}),
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap_err();

    // every attempt garbles, each non-final one restarts the process,
    // and the first attempt's error is the one surfaced
    assert!(matches!(err, Error::Startup(_)));
    assert!(err.to_string().contains("invalid JSON"));
    assert_eq!(runner.restarts(), 3);

    runner.stop().await;
}

#[tokio::test]
async fn test_dying_tool_restarts_exactly_once_per_recovery() {
    let spec = echo_spec(
        "mortal",
        &[("VALET_ECHO_MODE", "exit-after"), ("VALET_ECHO_REPLIES", "2")],
    );
    let mut runner = StdioRunner::new(spec, None, runtime(3)).unwrap();
    runner.start().await.unwrap();
    assert_eq!(runner.restarts(), 1);

    // reply budget: handshake was 1, this call is 2, then the tool exits
    let raw = runner
        .request(&json!({"method": "echo", "params": {"call": 1}}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(raw["result"], json!({"call": 1}));

    // the dead process is detected and replaced exactly once
    let raw = runner
        .call_with_retry(
            &json!({"method": "echo", "params": {"call": 2}}),
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap();
    assert_eq!(raw["result"], json!({"call": 2}));
    assert_eq!(runner.restarts(), 2);

    runner.stop().await;
}

#[tokio::test]
async fn test_restart_budget_is_exhausted_by_a_dying_tool() {
    // replies only to the handshake, so every call hits EOF
    let spec = echo_spec(
        "mortal",
        &[("VALET_ECHO_MODE", "exit-after"), ("VALET_ECHO_REPLIES", "1")],
    );
    let mut runner = StdioRunner::new(spec, None, runtime(3)).unwrap();
    runner.start().await.unwrap();
    assert_eq!(runner.restarts(), 1);

    let err = runner
        .call_with_retry(
            &json!({"method": "echo", "params": {}}),
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Startup(_)));
    assert_eq!(runner.restarts(), 3);

    // budget spent: the next retry cycle cannot restart any more
    let err = runner
        .call_with_retry(
            &json!({"method": "echo", "params": {}}),
            Duration::from_secs(2),
            3,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Startup(_)));
    assert_eq!(runner.restarts(), 3);
}

#[tokio::test]
async fn test_allowlist_matches_real_binary_by_basename() {
    let allow = Some(vec!["valet-echo".to_string()]);
    let mut runner = StdioRunner::new(echo_spec("echo", &[]), allow, runtime(3)).unwrap();

    runner.start().await.unwrap();
    assert!(runner.is_healthy());
    runner.stop().await;
}

#[tokio::test]
async fn test_allowlist_refuses_unlisted_real_binary() {
    let allow = Some(vec!["some-other-tool".to_string()]);
    let mut runner = StdioRunner::new(echo_spec("echo", &[]), allow, runtime(3)).unwrap();

    let err = runner.start().await.unwrap_err();
    assert!(err.to_string().contains("not allowed"));
    assert_eq!(runner.restarts(), 0);
}
