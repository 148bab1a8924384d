#![forbid(unsafe_code)]

//! Per-page guard lifecycle: mount, signal dispatch, ticks, teardown.
//!
//! [`ProtectionGuard`] owns the aggregator, the residency tracker and the
//! controller for one page instance, and is the only component that talks
//! to the [`Host`] about subscriptions and injected nodes.
//!
//! # Invariants
//!
//! 1. At most one overlay node with the configured id exists; mount looks it
//!    up before creating it.
//! 2. Listeners are removed one by one by the [`ListenerId`] returned at
//!    registration, never by event name, so a sibling guard's listeners
//!    survive.
//! 3. After [`ProtectionGuard::unmount`] (or drop) nothing this guard
//!    installed remains: listeners, overlay, stylesheet, viewport tag, body
//!    class, debug hook, pending wakeup.
//! 4. Signals and ticks delivered after unmount are no-ops.
//!
//! # Failure modes
//!
//! A required host operation failing during mount rolls back everything
//! installed so far and returns [`GuardError::Host`]. The debug hook is
//! optional: a failure to install it is logged and mount continues.

use core::time::Duration;

use serde::Serialize;

use crate::config::GuardConfig;
use crate::controller::{
    ActivationCause, Phase, ProtectionController, ProtectionState, ReleaseOutcome, ReleaseSignal,
    Transition,
};
use crate::error::{ConfigError, GuardError, HostError};
use crate::host::{Host, ListenerId, ListenerSpec, ListenerTarget, SignalRoute};
use crate::residency::{EnterReason, MouseResidency, MouseResidencyTracker, ResidencyChange};
use crate::signal::{BoundaryKind, KeyPhase, PointerAction, RawSignal, TouchPhase};
use crate::trigger::{
    AlertKind, AllowReason, Classification, TriggerAggregator, TriggerClasses, TriggerEvent,
    TriggerKind,
};

/// Content of the injected viewport meta tag.
pub const VIEWPORT_CONTENT: &str =
    "width=device-width, initial-scale=1, maximum-scale=1, user-scalable=no";

/// Schema tag written by [`GuardLogEntry::to_jsonl`].
pub const LOG_SCHEMA: &str = "veilguard-dispatch-v1";

const FULLSCREEN_EVENTS: [&str; 4] = [
    "fullscreenchange",
    "webkitfullscreenchange",
    "mozfullscreenchange",
    "MSFullscreenChange",
];

/// Protective stylesheet: print suppression, fullscreen backdrop darkening
/// and selection disabling under the guard's body class.
#[must_use]
pub fn protective_stylesheet(config: &GuardConfig) -> String {
    let root = &config.root_class;
    let overlay = &config.overlay_id;
    format!(
        "@media print {{\n\
         \x20 body * {{ visibility: hidden !important; }}\n\
         \x20 body::before {{\n\
         \x20   content: \"Printing and screenshots are disabled\";\n\
         \x20   visibility: visible;\n\
         \x20   display: block;\n\
         \x20   position: absolute;\n\
         \x20   top: 50%;\n\
         \x20   left: 50%;\n\
         \x20   transform: translate(-50%, -50%);\n\
         \x20   font-size: 2rem;\n\
         \x20   text-align: center;\n\
         \x20 }}\n\
         }}\n\
         :fullscreen, ::backdrop {{ background-color: rgba(0, 0, 0, 0.9) !important; }}\n\
         body.{root} * {{ user-select: none !important; -webkit-user-select: none !important; }}\n\
         body.{root} {{ -webkit-touch-callout: none; }}\n\
         #{overlay} {{ pointer-events: none !important; }}\n"
    )
}

/// Every subscription a guard with `config` registers, in capture phase.
#[must_use]
pub fn required_listeners(config: &GuardConfig) -> Vec<ListenerSpec> {
    use ListenerTarget::{Document, Window};

    let mut specs = vec![
        ListenerSpec::capture("keydown", Document, SignalRoute::Key(KeyPhase::Down)),
        ListenerSpec::capture("keyup", Document, SignalRoute::Key(KeyPhase::Up)),
        ListenerSpec::capture("blur", Window, SignalRoute::Focus(false)),
        ListenerSpec::capture("focus", Window, SignalRoute::Focus(true)),
        ListenerSpec::capture("visibilitychange", Document, SignalRoute::Visibility),
    ];

    if config.track_residency {
        specs.extend([
            ListenerSpec::capture("mousemove", Document, SignalRoute::Pointer(PointerAction::Move))
                .passive(),
            ListenerSpec::capture("mouseleave", Document, SignalRoute::Boundary(BoundaryKind::Leave)),
            ListenerSpec::capture("mouseenter", Document, SignalRoute::Boundary(BoundaryKind::Enter)),
            ListenerSpec::capture("mouseout", Window, SignalRoute::Boundary(BoundaryKind::Leave)),
            ListenerSpec::capture("mouseover", Window, SignalRoute::Boundary(BoundaryKind::Enter)),
        ]);
    }
    if config.pulse_on_click {
        specs.extend([
            ListenerSpec::capture("mousedown", Document, SignalRoute::Pointer(PointerAction::Down)),
            ListenerSpec::capture("mouseup", Document, SignalRoute::Pointer(PointerAction::Up)),
            ListenerSpec::capture("click", Document, SignalRoute::Pointer(PointerAction::Click)),
        ]);
    }
    if config.classes.contains(TriggerClasses::SCREENSHOT) {
        specs.extend([
            ListenerSpec::capture("touchstart", Document, SignalRoute::Touch(TouchPhase::Start)),
            ListenerSpec::capture("touchmove", Document, SignalRoute::Touch(TouchPhase::Move)),
            ListenerSpec::capture("touchend", Document, SignalRoute::Touch(TouchPhase::End)),
            ListenerSpec::capture("touchcancel", Document, SignalRoute::Touch(TouchPhase::Cancel)),
        ]);
    }
    if config.classes.contains(TriggerClasses::FULLSCREEN) {
        specs.extend(
            FULLSCREEN_EVENTS
                .into_iter()
                .map(|event| ListenerSpec::capture(event, Document, SignalRoute::Fullscreen)),
        );
    }
    if config.classes.contains(TriggerClasses::DOWNLOAD) {
        specs.extend([
            ListenerSpec::capture("copy", Document, SignalRoute::Copy),
            ListenerSpec::capture("contextmenu", Document, SignalRoute::ContextMenu),
        ]);
    }
    if config.classes.contains(TriggerClasses::FOCUS) {
        specs.push(ListenerSpec::capture(
            "orientationchange",
            Window,
            SignalRoute::Orientation,
        ));
    }
    specs
}

/// Deterministic reason a signal had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredReason {
    NotMounted,
    /// Boundary crossing between internal elements.
    InternalCrossing,
    Unclassified,
    /// Return signal while already idle.
    AlreadyIdle,
    /// Pointer button while click pulses are disabled.
    PulseDisabled,
    /// Pointer movement or crossing while residency tracking is disabled.
    ResidencyDisabled,
}

/// Outcome category for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardLogOutcome {
    /// Classified trigger applied.
    Triggered,
    /// Looked like a trigger but was let through.
    Allowed(AllowReason),
    /// Activation without a trigger (residency leave, pulse, debug hook).
    Activated,
    Released,
    /// Return signal held back by the residency gate.
    ReleaseHeld,
    /// Consumed with no phase change (movement, repeat activation).
    Observed,
    Ignored(IgnoredReason),
}

/// Structured log record for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GuardLogEntry {
    /// Per-guard dispatch counter; `None` for signals ignored before mount.
    pub sequence: Option<u64>,
    pub at_ms: u64,
    pub signal: &'static str,
    pub trigger: Option<TriggerKind>,
    pub alert: Option<AlertKind>,
    pub suppress: bool,
    pub phase: Phase,
    pub inside: bool,
    pub transition: Option<Transition>,
    pub outcome: GuardLogOutcome,
}

impl GuardLogEntry {
    /// Format as a JSONL line for structured logging.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.insert("schema".to_owned(), LOG_SCHEMA.into());
                serde_json::Value::Object(map).to_string()
            }
            Ok(other) => other.to_string(),
            Err(err) => format!(r#"{{"schema":"{LOG_SCHEMA}","error":"{err}"}}"#),
        }
    }
}

/// Result of handling one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispatch {
    pub trigger: Option<TriggerEvent>,
    /// The host must `preventDefault` + `stopPropagation` the platform event.
    pub suppress: bool,
    pub residency: Option<ResidencyChange>,
    pub transition: Option<Transition>,
    pub log: GuardLogEntry,
}

/// Result of one timer tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub residency: Option<ResidencyChange>,
    pub transition: Option<Transition>,
}

/// What a teardown removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub listeners_removed: usize,
    pub overlay_removed: bool,
    pub style_removed: bool,
    pub viewport_removed: bool,
    pub debug_hook_removed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Installed {
    style: bool,
    viewport: bool,
    root_class: bool,
    debug_hook: bool,
}

/// Protection layer for one mounted page instance.
#[derive(Debug)]
pub struct ProtectionGuard<H: Host> {
    host: H,
    config: GuardConfig,
    aggregator: TriggerAggregator,
    residency: MouseResidencyTracker,
    controller: ProtectionController,
    listeners: Vec<(ListenerId, ListenerSpec)>,
    installed: Installed,
    mounted: bool,
    scheduled: Option<Duration>,
    next_sequence: u64,
}

impl<H: Host> ProtectionGuard<H> {
    /// Build an unmounted guard. The config is validated at mount.
    pub fn new(host: H, config: GuardConfig) -> Self {
        Self {
            aggregator: TriggerAggregator::new(config.aggregator()),
            residency: MouseResidencyTracker::new(config.residency()),
            controller: ProtectionController::new(&config),
            host,
            config,
            listeners: Vec::new(),
            installed: Installed::default(),
            mounted: false,
            scheduled: None,
            next_sequence: 1,
        }
    }

    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        self.mounted
    }

    #[must_use]
    pub const fn config(&self) -> &GuardConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> ProtectionState {
        self.controller.state()
    }

    #[must_use]
    pub const fn residency(&self) -> MouseResidency {
        self.residency.residency()
    }

    #[must_use]
    pub const fn controller(&self) -> &ProtectionController {
        &self.controller
    }

    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Registered subscriptions, in registration order.
    #[must_use]
    pub fn listeners(&self) -> &[(ListenerId, ListenerSpec)] {
        &self.listeners
    }

    /// Install everything and start the reconciliation cadence.
    pub fn mount(&mut self, now: Duration) -> Result<(), GuardError> {
        if self.mounted {
            return Err(GuardError::AlreadyMounted);
        }
        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(GuardError::Config(ConfigError::Validation(errors)));
        }

        self.aggregator = TriggerAggregator::new(self.config.aggregator());
        self.residency = MouseResidencyTracker::new(self.config.residency());
        self.controller = ProtectionController::new(&self.config);
        self.scheduled = None;

        if let Err(err) = self.install(now) {
            tracing::warn!(error = %err, "guard mount failed, rolling back");
            self.teardown();
            return Err(GuardError::Host(err));
        }
        self.mounted = true;
        self.reschedule(now);
        tracing::debug!(
            overlay = %self.config.overlay_id,
            listeners = self.listeners.len(),
            "guard mounted"
        );
        Ok(())
    }

    fn install(&mut self, now: Duration) -> Result<(), HostError> {
        self.controller.overlay_mut().ensure(&mut self.host)?;

        let css = protective_stylesheet(&self.config);
        self.host.inject_style(&self.config.style_id, &css)?;
        self.installed.style = true;
        self.host
            .inject_viewport(&self.config.viewport_id, VIEWPORT_CONTENT)?;
        self.installed.viewport = true;
        self.host.set_root_class(&self.config.root_class, true);
        self.installed.root_class = true;

        for spec in required_listeners(&self.config) {
            let id = self.host.subscribe(spec)?;
            self.listeners.push((id, spec));
        }

        if let Some(name) = &self.config.debug_hook {
            match self.host.install_debug_hook(name) {
                Ok(()) => self.installed.debug_hook = true,
                Err(err) => tracing::warn!(hook = %name, error = %err, "debug hook not installed"),
            }
        }

        if self.config.track_residency {
            self.residency.start(now);
        }
        Ok(())
    }

    /// Remove everything this guard installed.
    pub fn unmount(&mut self) -> Result<TeardownReport, GuardError> {
        if !self.mounted {
            return Err(GuardError::NotMounted);
        }
        let report = self.teardown();
        tracing::debug!(
            listeners_removed = report.listeners_removed,
            overlay_removed = report.overlay_removed,
            "guard unmounted"
        );
        Ok(report)
    }

    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for (id, spec) in self.listeners.drain(..) {
            if self.host.unsubscribe(id) {
                report.listeners_removed += 1;
            } else {
                tracing::warn!(event = spec.event, id = id.0, "listener already gone");
            }
        }
        self.host.cancel_wakeup();
        self.scheduled = None;

        self.residency.stop();
        self.aggregator.reset();
        self.controller.reset();

        if self.controller.overlay().handle().created {
            report.overlay_removed = self.controller.overlay_mut().destroy(&mut self.host);
        }
        let installed = core::mem::take(&mut self.installed);
        if installed.style {
            report.style_removed = self.host.remove_style(&self.config.style_id);
        }
        if installed.viewport {
            report.viewport_removed = self.host.remove_viewport(&self.config.viewport_id);
        }
        if installed.root_class {
            self.host.set_root_class(&self.config.root_class, false);
        }
        if installed.debug_hook
            && let Some(name) = &self.config.debug_hook
        {
            report.debug_hook_removed = self.host.remove_debug_hook(name);
        }

        self.mounted = false;
        report
    }

    /// Handle one host signal.
    pub fn handle(&mut self, signal: &RawSignal, now: Duration) -> Dispatch {
        if !self.mounted {
            tracing::trace!(signal = signal.name(), "signal after unmount ignored");
            return Dispatch {
                trigger: None,
                suppress: false,
                residency: None,
                transition: None,
                log: self.log_entry(
                    None,
                    signal,
                    now,
                    None,
                    None,
                    GuardLogOutcome::Ignored(IgnoredReason::NotMounted),
                ),
            };
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut trigger = None;
        let mut residency = None;
        let mut transition = None;
        let outcome = match signal {
            RawSignal::Boundary { boundary, related } => {
                if self.config.track_residency {
                    residency = self.residency.boundary(*boundary, *related);
                    match residency {
                        Some(ResidencyChange::Left(reason)) => {
                            transition = self
                                .controller
                                .activate(&mut self.host, ActivationCause::Residency(reason));
                            activated_or_observed(transition)
                        }
                        Some(ResidencyChange::Entered(_)) => {
                            self.offer_release(ReleaseSignal::PointerEntered, &mut transition)
                        }
                        None => GuardLogOutcome::Ignored(IgnoredReason::InternalCrossing),
                    }
                } else {
                    GuardLogOutcome::Ignored(IgnoredReason::ResidencyDisabled)
                }
            }
            RawSignal::Pointer {
                action: PointerAction::Move,
            } => {
                if self.config.track_residency {
                    residency = self.residency.pointer_moved(now);
                    if residency == Some(ResidencyChange::Entered(EnterReason::PointerMoved)) {
                        self.offer_release(ReleaseSignal::PointerReturned, &mut transition)
                    } else {
                        GuardLogOutcome::Observed
                    }
                } else {
                    GuardLogOutcome::Ignored(IgnoredReason::ResidencyDisabled)
                }
            }
            RawSignal::Pointer { .. } => {
                if self.config.pulse_on_click {
                    transition = self.controller.pulse(&mut self.host, now);
                    activated_or_observed(transition)
                } else {
                    GuardLogOutcome::Ignored(IgnoredReason::PulseDisabled)
                }
            }
            RawSignal::Focus { focused: true } => {
                self.offer_release(ReleaseSignal::FocusRegained, &mut transition)
            }
            RawSignal::Visibility { hidden: false } => {
                self.offer_release(ReleaseSignal::BecameVisible, &mut transition)
            }
            RawSignal::DebugHook => {
                transition = self
                    .controller
                    .activate(&mut self.host, ActivationCause::DebugHook);
                activated_or_observed(transition)
            }
            _ => {
                let selection = matches!(signal, RawSignal::Key(_) | RawSignal::Copy)
                    && self.host.has_text_selection();
                match self.aggregator.classify(signal, now, selection) {
                    Classification::Trigger(event) => {
                        trigger = Some(event);
                        transition = self.controller.handle_trigger(&mut self.host, &event, now);
                        tracing::debug!(
                            kind = event.kind.label(),
                            suppress = event.suppress,
                            alert = ?event.alert,
                            "trigger classified"
                        );
                        self.settle(now, &mut transition);
                        GuardLogOutcome::Triggered
                    }
                    Classification::Allowed(reason) => GuardLogOutcome::Allowed(reason),
                    Classification::Unclassified => {
                        GuardLogOutcome::Ignored(IgnoredReason::Unclassified)
                    }
                }
            }
        };

        self.reschedule(now);
        let suppress = trigger.is_some_and(|t| t.suppress);
        if let GuardLogOutcome::Ignored(reason) = outcome {
            tracing::trace!(signal = signal.name(), ?reason, "signal ignored");
        }
        Dispatch {
            trigger,
            suppress,
            residency,
            transition,
            log: self.log_entry(Some(sequence), signal, now, trigger, transition, outcome),
        }
    }

    /// Fire the manual debug trigger: activate as if print-screen were seen,
    /// without suppression or alert.
    pub fn debug_trigger(&mut self, now: Duration) -> Dispatch {
        self.handle(&RawSignal::DebugHook, now)
    }

    /// Run due deadlines. The host calls this when a requested wakeup fires.
    pub fn tick(&mut self, now: Duration) -> TickOutcome {
        if !self.mounted {
            tracing::trace!("tick after unmount ignored");
            return TickOutcome::default();
        }
        self.scheduled = None;
        let has_focus = self.host.has_focus();
        let residency = self.residency.poll(now, has_focus);
        let mut transition = None;
        if let Some(ResidencyChange::Left(reason)) = residency {
            tracing::debug!(?reason, "residency forced outside");
            transition = self
                .controller
                .activate(&mut self.host, ActivationCause::Residency(reason));
        }
        if let Some(released) = self.controller.poll(&mut self.host, now) {
            transition = Some(released);
        }
        self.settle(now, &mut transition);
        self.reschedule(now);
        TickOutcome {
            residency,
            transition,
        }
    }

    /// Earliest pending deadline across residency and controller.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        match (self.residency.next_deadline(), self.controller.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn offer_release(
        &mut self,
        signal: ReleaseSignal,
        transition: &mut Option<Transition>,
    ) -> GuardLogOutcome {
        let inside = self.residency.is_inside();
        match self.controller.release(&mut self.host, signal, inside) {
            ReleaseOutcome::Released => {
                *transition = Some(Transition::Released(signal));
                GuardLogOutcome::Released
            }
            ReleaseOutcome::HeldOutside => GuardLogOutcome::ReleaseHeld,
            ReleaseOutcome::AlreadyIdle => GuardLogOutcome::Ignored(IgnoredReason::AlreadyIdle),
        }
    }

    fn settle(&mut self, now: Duration, transition: &mut Option<Transition>) {
        if self.controller.take_settle(now) && self.residency.is_inside() {
            self.offer_release(ReleaseSignal::TriggerSettled, transition);
        }
    }

    fn reschedule(&mut self, now: Duration) {
        let next = self.next_deadline();
        if next == self.scheduled {
            return;
        }
        self.scheduled = next;
        match next {
            Some(deadline) => self.host.schedule_wakeup(deadline.saturating_sub(now)),
            None => self.host.cancel_wakeup(),
        }
    }

    fn log_entry(
        &self,
        sequence: Option<u64>,
        signal: &RawSignal,
        now: Duration,
        trigger: Option<TriggerEvent>,
        transition: Option<Transition>,
        outcome: GuardLogOutcome,
    ) -> GuardLogEntry {
        GuardLogEntry {
            sequence,
            at_ms: u64::try_from(now.as_millis()).unwrap_or(u64::MAX),
            signal: signal.name(),
            trigger: trigger.map(|t| t.kind),
            alert: trigger.and_then(|t| t.alert),
            suppress: trigger.is_some_and(|t| t.suppress),
            phase: self.controller.phase(),
            inside: self.residency.is_inside(),
            transition,
            outcome,
        }
    }
}

fn activated_or_observed(transition: Option<Transition>) -> GuardLogOutcome {
    if transition.is_some() {
        GuardLogOutcome::Activated
    } else {
        GuardLogOutcome::Observed
    }
}

impl<H: Host> Drop for ProtectionGuard<H> {
    fn drop(&mut self) {
        if self.mounted {
            let report = self.teardown();
            tracing::debug!(
                listeners_removed = report.listeners_removed,
                "mounted guard dropped, torn down"
            );
        }
    }
}
