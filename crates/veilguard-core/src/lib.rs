#![forbid(unsafe_code)]

//! `veilguard-core` is the host-agnostic capture-deterrence layer.
//!
//! Design goals:
//! - **Host-driven I/O**: the embedding environment converts platform events
//!   into [`RawSignal`]s and applies the returned [`Dispatch`].
//! - **Deterministic time**: the host passes a monotonic `Duration` to every
//!   call and ticks the guard when a requested wakeup fires. The core owns
//!   no timers.
//! - **Injectable globals**: every document/window access goes through the
//!   [`Host`] trait.
//!
//! Control flow: signal -> [`TriggerAggregator`] -> [`ProtectionController`]
//! -> [`OverlayRenderer`], with the [`MouseResidencyTracker`] feeding the
//! controller's release gate. [`ProtectionGuard`] wraps all of it for one
//! page instance.

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod overlay;
pub mod residency;
pub mod signal;
pub mod trigger;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::{AlertMessages, GuardConfig, GuardTiming, ReleasePolicy};
pub use controller::{
    ActivationCause, ControllerStats, Phase, ProtectionController, ProtectionState,
    ReleaseOutcome, ReleaseSignal, Transition,
};
pub use error::{ConfigError, GuardError, HostError};
pub use host::{Host, ListenerId, ListenerSpec, ListenerTarget, SignalRoute};
pub use lifecycle::{
    Dispatch, GuardLogEntry, GuardLogOutcome, IgnoredReason, ProtectionGuard, TeardownReport,
    TickOutcome, VIEWPORT_CONTENT, protective_stylesheet, required_listeners,
};
pub use overlay::{OverlayFrame, OverlayHandle, OverlayRenderer, OverlayStyle};
pub use residency::{
    EnterReason, LeaveReason, MouseResidency, MouseResidencyTracker, ResidencyChange,
};
pub use signal::{
    BoundaryKind, KeyPhase, KeySignal, Modifiers, PointerAction, RawSignal, RelatedTarget,
    TouchPhase,
};
pub use trigger::{
    AlertKind, AllowReason, Classification, TriggerAggregator, TriggerClass, TriggerClasses,
    TriggerEvent, TriggerKind, TriggerKinds,
};
