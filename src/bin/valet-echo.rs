//! JSON-line echo tool for integration tests and demos.
//!
//! Answers `health` with `{"result":"ok"}` and echoes `params` back for
//! any other method. Failure modes are switched through the
//! environment so tests can exercise timeout, retry, and protocol
//! error paths:
//!
//! - `VALET_ECHO_MODE=silent`: read requests, never reply
//! - `VALET_ECHO_MODE=skip-calls` with `VALET_ECHO_SKIP=N`: leave the
//!   first N non-health requests unanswered, then behave normally
//! - `VALET_ECHO_MODE=garbage`: reply with non-JSON to everything
//! - `VALET_ECHO_MODE=garbage-calls`: valid health reply, non-JSON to
//!   everything else
//! - `VALET_ECHO_MODE=exit-after` with `VALET_ECHO_REPLIES=N`: exit
//!   after the Nth reply

use serde_json::{json, Value};
use std::io::{BufRead, Write};

fn main() {
    let mode = std::env::var("VALET_ECHO_MODE").unwrap_or_default();
    let mut skip: u32 = env_number("VALET_ECHO_SKIP", 0);
    let exit_after: u32 = env_number("VALET_ECHO_REPLIES", 1);
    let mut replies: u32 = 0;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        if mode == "silent" {
            continue;
        }

        let request: Value = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(_) => {
                let _ = writeln!(out, "{}", json!({"ok": false, "error": "bad request"}));
                let _ = out.flush();
                continue;
            }
        };
        let method = request["method"].as_str().unwrap_or_default();
        let is_health = method == "health";

        if mode == "garbage" || (mode == "garbage-calls" && !is_health) {
            let _ = writeln!(out, "definitely not json");
            let _ = out.flush();
            continue;
        }
        if mode == "skip-calls" && !is_health && skip > 0 {
            skip -= 1;
            continue;
        }

        let reply = if is_health {
            json!({"result": "ok"})
        } else {
            json!({"result": request["params"]})
        };
        let _ = writeln!(out, "{reply}");
        let _ = out.flush();
        replies += 1;

        if mode == "exit-after" && replies >= exit_after {
            return;
        }
    }
}

fn env_number(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
