#![forbid(unsafe_code)]

//! Replay and soak tooling for `veilguard-core`.
//!
//! - [`scenario`]: JSON step scripts replayed against a recording host.
//! - [`signal_storm`]: seeded random signal bursts for invariant checks.

pub mod scenario;
pub mod signal_storm;

pub use scenario::{Expect, Scenario, ScenarioError, ScenarioReport, Step, run_scenario};
pub use signal_storm::{
    BurstPattern, SignalStorm, StormConfig, StormSummary, generate_storm, run_storm,
};
pub use veilguard_core::testing::RecordingHost;
