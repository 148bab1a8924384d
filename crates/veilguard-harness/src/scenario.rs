#![forbid(unsafe_code)]

//! JSON scenario replay.
//!
//! A scenario is a profile (or inline config) plus a list of steps run
//! against a [`RecordingHost`]. Every dispatch is logged as JSONL so a
//! failing run can be diffed against a known-good one.
//!
//! # Format
//!
//! ```json
//! {
//!   "name": "print screen then return",
//!   "profile": "landing",
//!   "steps": [
//!     {"op": "mount", "at_ms": 0},
//!     {"op": "signal", "at_ms": 10,
//!      "signal": {"kind": "key", "phase": "down", "key": "PrintScreen", "key_code": 44},
//!      "expect": {"phase": "active", "suppress": true}},
//!     {"op": "advance", "to_ms": 200, "expect": {"alerts": 1}},
//!     {"op": "unmount", "expect": {"clean": true}}
//!   ]
//! }
//! ```

use core::time::Duration;

use serde::{Deserialize, Serialize};
use veilguard_core::testing::RecordingHost;
use veilguard_core::{GuardConfig, Phase, ProtectionGuard, RawSignal};

/// Expectations checked after a step. Unset fields are not checked.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Expect {
    pub phase: Option<Phase>,
    pub suppress: Option<bool>,
    pub inside: Option<bool>,
    /// Total alerts shown so far.
    pub alerts: Option<usize>,
    /// Live overlay nodes in the document.
    pub overlays: Option<usize>,
    /// Live listeners in the document.
    pub listeners: Option<usize>,
    /// Host has nothing installed and no wakeup pending.
    pub clean: Option<bool>,
}

/// One scenario step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Mount {
        at_ms: u64,
    },
    /// Mount is expected to fail (already mounted or invalid config).
    MountRejected {
        at_ms: u64,
    },
    Unmount {
        #[serde(default)]
        expect: Expect,
    },
    Signal {
        at_ms: u64,
        signal: RawSignal,
        #[serde(default)]
        expect: Expect,
    },
    /// Deliver one tick at `at_ms`, whether or not a wakeup is due.
    Tick {
        at_ms: u64,
        #[serde(default)]
        expect: Expect,
    },
    /// Fire every requested wakeup up to and including `to_ms`, the way a
    /// host timer would.
    Advance {
        to_ms: u64,
        #[serde(default)]
        expect: Expect,
    },
    /// Change what the host reports.
    Host {
        #[serde(default)]
        focused: Option<bool>,
        #[serde(default)]
        fullscreen: Option<bool>,
        #[serde(default)]
        selection: Option<bool>,
        #[serde(default)]
        blur_supported: Option<bool>,
    },
    Expect {
        expect: Expect,
    },
}

/// Replayable scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Built-in profile name; ignored when `config` is set.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub config: Option<GuardConfig>,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Parse a scenario from JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ScenarioError> {
        serde_json::from_str(s).map_err(|err| ScenarioError {
            step: None,
            message: format!("parse error: {err}"),
        })
    }

    fn resolve_config(&self) -> Result<GuardConfig, ScenarioError> {
        if let Some(config) = &self.config {
            return Ok(config.clone());
        }
        let name = self.profile.as_deref().unwrap_or("landing");
        GuardConfig::profile(name).map_err(|err| ScenarioError {
            step: None,
            message: err.to_string(),
        })
    }
}

/// Scenario failure, with the zero-based step index when applicable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioError {
    pub step: Option<usize>,
    pub message: String,
}

impl core::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.step {
            Some(step) => write!(f, "step {step}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ScenarioError {}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub name: String,
    pub steps_run: usize,
    /// One JSONL line per dispatched signal.
    pub log: Vec<String>,
    pub final_phase: Phase,
    pub alerts: usize,
}

/// Run a scenario against a fresh [`RecordingHost`].
pub fn run_scenario(scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
    let config = scenario.resolve_config()?;
    let mut guard = ProtectionGuard::new(RecordingHost::new(), config);
    let mut log = Vec::new();
    let mut now = Duration::ZERO;

    for (index, step) in scenario.steps.iter().enumerate() {
        let fail = |message: String| ScenarioError {
            step: Some(index),
            message,
        };
        match step {
            Step::Mount { at_ms } => {
                now = advance_clock(now, *at_ms).map_err(&fail)?;
                guard
                    .mount(now)
                    .map_err(|err| fail(format!("mount failed: {err}")))?;
            }
            Step::MountRejected { at_ms } => {
                now = advance_clock(now, *at_ms).map_err(&fail)?;
                if guard.mount(now).is_ok() {
                    return Err(fail("mount unexpectedly succeeded".into()));
                }
            }
            Step::Unmount { expect } => {
                guard
                    .unmount()
                    .map_err(|err| fail(format!("unmount failed: {err}")))?;
                check(&guard, None, expect).map_err(&fail)?;
            }
            Step::Signal {
                at_ms,
                signal,
                expect,
            } => {
                now = advance_clock(now, *at_ms).map_err(&fail)?;
                let dispatch = guard.handle(signal, now);
                log.push(dispatch.log.to_jsonl());
                check(&guard, Some(dispatch.suppress), expect).map_err(&fail)?;
            }
            Step::Tick { at_ms, expect } => {
                now = advance_clock(now, *at_ms).map_err(&fail)?;
                guard.tick(now);
                check(&guard, None, expect).map_err(&fail)?;
            }
            Step::Advance { to_ms, expect } => {
                let target = advance_clock(now, *to_ms).map_err(&fail)?;
                now = fire_wakeups(&mut guard, now, target);
                check(&guard, None, expect).map_err(&fail)?;
            }
            Step::Host {
                focused,
                fullscreen,
                selection,
                blur_supported,
            } => {
                let host = guard.host_mut();
                apply_flag(&mut host.focused, *focused);
                apply_flag(&mut host.fullscreen, *fullscreen);
                apply_flag(&mut host.selection, *selection);
                apply_flag(&mut host.blur_supported, *blur_supported);
            }
            Step::Expect { expect } => check(&guard, None, expect).map_err(&fail)?,
        }
        tracing::trace!(scenario = %scenario.name, step = index, "scenario step done");
    }

    Ok(ScenarioReport {
        name: scenario.name.clone(),
        steps_run: scenario.steps.len(),
        log,
        final_phase: guard.state().phase,
        alerts: guard.host().alerts.len(),
    })
}

/// Tick the guard at each deadline it requests up to `target`, then set the
/// clock to `target`. Returns the new clock.
pub fn fire_wakeups(
    guard: &mut ProtectionGuard<RecordingHost>,
    mut now: Duration,
    target: Duration,
) -> Duration {
    while let Some(deadline) = guard.next_deadline()
        && deadline <= target
    {
        now = deadline.max(now);
        guard.tick(now);
    }
    target.max(now)
}

fn advance_clock(now: Duration, at_ms: u64) -> Result<Duration, String> {
    let at = Duration::from_millis(at_ms);
    if at < now {
        return Err(format!(
            "time went backwards: {at_ms}ms < {}ms",
            now.as_millis()
        ));
    }
    Ok(at)
}

fn apply_flag(slot: &mut bool, value: Option<bool>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn check(
    guard: &ProtectionGuard<RecordingHost>,
    suppress: Option<bool>,
    expect: &Expect,
) -> Result<(), String> {
    let host = guard.host();
    let mut problems = Vec::new();

    if let Some(phase) = expect.phase
        && guard.state().phase != phase
    {
        problems.push(format!("phase {:?}, expected {phase:?}", guard.state().phase));
    }
    if let Some(want) = expect.suppress {
        match suppress {
            Some(got) if got == want => {}
            Some(got) => problems.push(format!("suppress {got}, expected {want}")),
            None => problems.push("suppress checked on a step without a dispatch".into()),
        }
    }
    if let Some(inside) = expect.inside
        && guard.residency().inside != inside
    {
        problems.push(format!(
            "inside {}, expected {inside}",
            guard.residency().inside
        ));
    }
    if let Some(alerts) = expect.alerts
        && host.alerts.len() != alerts
    {
        problems.push(format!("{} alerts, expected {alerts}", host.alerts.len()));
    }
    if let Some(overlays) = expect.overlays
        && host.overlays.len() != overlays
    {
        problems.push(format!(
            "{} overlays, expected {overlays}",
            host.overlays.len()
        ));
    }
    if let Some(listeners) = expect.listeners
        && host.listeners.len() != listeners
    {
        problems.push(format!(
            "{} listeners, expected {listeners}",
            host.listeners.len()
        ));
    }
    if let Some(clean) = expect.clean
        && host.is_clean() != clean
    {
        problems.push(format!("host clean {}, expected {clean}", host.is_clean()));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_scenario_runs() {
        let scenario = Scenario::from_json_str(
            r#"{
                "name": "mount and unmount",
                "steps": [
                    {"op": "mount", "at_ms": 0},
                    {"op": "expect", "expect": {"phase": "idle", "overlays": 1}},
                    {"op": "unmount", "expect": {"clean": true}}
                ]
            }"#,
        )
        .expect("parse");
        let report = run_scenario(&scenario).expect("run");
        assert_eq!(report.steps_run, 3);
        assert_eq!(report.final_phase, Phase::Idle);
    }

    #[test]
    fn failed_expectation_names_step() {
        let scenario = Scenario::from_json_str(
            r#"{
                "name": "wrong phase",
                "steps": [
                    {"op": "mount", "at_ms": 0},
                    {"op": "expect", "expect": {"phase": "active"}}
                ]
            }"#,
        )
        .expect("parse");
        let err = run_scenario(&scenario).expect_err("must fail");
        assert_eq!(err.step, Some(1));
        assert!(err.message.contains("expected Active"), "{err}");
    }

    #[test]
    fn clock_cannot_go_backwards() {
        let scenario = Scenario::from_json_str(
            r#"{
                "name": "backwards",
                "steps": [
                    {"op": "mount", "at_ms": 100},
                    {"op": "tick", "at_ms": 50}
                ]
            }"#,
        )
        .expect("parse");
        let err = run_scenario(&scenario).expect_err("must fail");
        assert!(err.message.contains("backwards"));
    }

    #[test]
    fn unknown_profile_is_reported() {
        let scenario = Scenario {
            name: "bad profile".into(),
            profile: Some("admin".into()),
            config: None,
            steps: Vec::new(),
        };
        let err = run_scenario(&scenario).expect_err("must fail");
        assert_eq!(err.step, None);
        assert!(err.message.contains("unknown profile"));
    }
}
