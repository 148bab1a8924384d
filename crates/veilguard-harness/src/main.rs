#![forbid(unsafe_code)]

//! Scenario replay tool.
//!
//! # Running
//!
//! ```sh
//! cargo run -p veilguard-harness -- tests/fixtures/print_screen.json
//! ```
//!
//! Each scenario's dispatch log is printed as JSONL on stdout, followed by a
//! summary line. The exit code is non-zero if any scenario failed.
//!
//! # Environment
//!
//! - `VEILGUARD_REPLAY_QUIET=1`: print only summary lines.
//! - `VEILGUARD_REPLAY_STORM=<pattern>:<count>:<seed>`: also run a signal
//!   storm against the landing profile (`mixed_burst:500:7`).

use std::io::{self, Write};
use std::process::ExitCode;

use serde_json::{Value, json};
use veilguard_core::testing::RecordingHost;
use veilguard_core::{GuardConfig, ProtectionGuard};
use veilguard_harness::{
    BurstPattern, Scenario, StormConfig, generate_storm, run_scenario, run_storm,
};

fn main() -> ExitCode {
    let quiet = std::env::var("VEILGUARD_REPLAY_QUIET")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;

    for path in std::env::args().skip(1) {
        match replay_file(&path, quiet, &mut out) {
            Ok(()) => {}
            Err(message) => {
                failures += 1;
                emit(&mut out, &scenario_failed(&path, &message));
            }
        }
    }

    if let Ok(spec) = std::env::var("VEILGUARD_REPLAY_STORM") {
        match parse_storm(&spec) {
            Some(config) => {
                if !run_storm_line(&config, &mut out) {
                    failures += 1;
                }
            }
            None => {
                failures += 1;
                emit(&mut out, &json!({ "event": "storm_rejected", "spec": spec }));
            }
        }
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn replay_file(path: &str, quiet: bool, out: &mut impl Write) -> Result<(), String> {
    let text = std::fs::read_to_string(path).map_err(|err| format!("read {path}: {err}"))?;
    let scenario = Scenario::from_json_str(&text).map_err(|err| err.to_string())?;
    let report = run_scenario(&scenario).map_err(|err| err.to_string())?;
    if !quiet {
        for line in &report.log {
            let _ = writeln!(out, "{line}");
        }
    }
    emit(
        out,
        &json!({
            "event": "scenario_passed",
            "name": report.name,
            "steps": report.steps_run,
            "dispatches": report.log.len(),
            "alerts": report.alerts,
        }),
    );
    Ok(())
}

fn parse_storm(spec: &str) -> Option<StormConfig> {
    let mut parts = spec.split(':');
    let name = parts.next()?;
    let count = parts.next()?.parse::<usize>().ok()?;
    let seed = parts.next().map_or(Some(1), |s| s.parse::<u64>().ok())?;
    let pattern = match name {
        "key_storm" | "keys" => BurstPattern::KeyStorm { count },
        "pointer_flood" | "pointer" => BurstPattern::PointerFlood { count },
        "touch_burst" | "touch" => BurstPattern::TouchBurst { count },
        "mixed_burst" | "mixed" => BurstPattern::MixedBurst { count },
        _ => return None,
    };
    Some(StormConfig::new(pattern, seed))
}

/// Returns whether the storm held every invariant.
fn run_storm_line(config: &StormConfig, out: &mut impl Write) -> bool {
    let storm = generate_storm(config);
    let mut guard = ProtectionGuard::new(RecordingHost::new(), GuardConfig::landing());
    if let Err(err) = guard.mount(std::time::Duration::ZERO) {
        emit(out, &json!({ "event": "storm_failed", "error": err.to_string() }));
        return false;
    }
    let summary = run_storm(&mut guard, &storm);
    let _ = writeln!(out, "{}", summary.to_jsonl(&storm));
    let clean = guard.unmount().is_ok() && guard.host().is_clean();
    clean && summary.max_overlays <= 1 && summary.phase_mismatches == 0
}

fn scenario_failed(path: &str, error: &str) -> Value {
    json!({ "event": "scenario_failed", "path": path, "error": error })
}

fn emit(out: &mut impl Write, line: &Value) {
    let _ = writeln!(out, "{line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn failure_line_escapes_paths_and_messages() {
        let mut out = Vec::new();
        emit(
            &mut out,
            &scenario_failed("fixtures/\"odd\".json", "line 1\nexpected `,`"),
        );
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.lines().count(), 1);
        let value: Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(value["event"], "scenario_failed");
        assert_eq!(value["path"], "fixtures/\"odd\".json");
        assert_eq!(value["error"], "line 1\nexpected `,`");
    }

    #[test]
    fn storm_spec_parsing() {
        assert!(parse_storm("mixed_burst:200:7").is_some());
        assert!(parse_storm("keys:10").is_some());
        assert!(parse_storm("sideways:10:1").is_none());
        assert!(parse_storm("mixed:many:1").is_none());
    }
}
