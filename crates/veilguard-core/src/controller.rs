#![forbid(unsafe_code)]

//! Protection state machine.
//!
//! # States
//!
//! `Idle` renders the overlay at baseline. `Active` renders it at level 1
//! (maximum blur, opacity 1, optional warning text), entered instantly.
//!
//! # Transitions
//!
//! - `Idle -> Active` on any classified trigger, a residency-forced leave,
//!   the debug hook, or a click pulse. Re-activation while `Active` only
//!   refreshes timers.
//! - `Active -> Idle` on an explicit return signal. Under
//!   [`ReleasePolicy::Strict`] the signal is held back while residency
//!   reports the pointer outside.
//! - The click pulse releases on its own timer regardless of residency.
//!   A non-pulse activation cancels a pending pulse, and every later click
//!   arms it again.
//! - A trigger whose kind is in the profile's settle set returns the guard
//!   to `Idle` while the pointer is inside: right after its alert when one
//!   was queued, with a settle already pending, or otherwise at once.
//!   Reclassified triggers (snip shortcuts) never settle.
//!
//! # Failure modes
//!
//! Best-effort host calls (fullscreen exit, overlay writes) are logged and
//! counted; they never prevent the phase change.

use core::time::Duration;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::{AlertMessages, GuardConfig, ReleasePolicy};
use crate::host::Host;
use crate::overlay::OverlayRenderer;
use crate::residency::LeaveReason;
use crate::trigger::{AlertKind, TriggerEvent, TriggerKind, TriggerKinds};

/// Overlay phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Active,
}

/// The single explicit state of one mounted guard.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct ProtectionState {
    pub phase: Phase,
    /// Overlay intensity in `0.0..=1.0`.
    pub intensity: f32,
}

impl ProtectionState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active)
    }
}

/// What moved the guard to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum ActivationCause {
    Trigger(TriggerKind),
    Residency(LeaveReason),
    Pulse,
    DebugHook,
}

/// Explicit return signal offered to the release gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseSignal {
    /// Genuine window-boundary entry.
    PointerEntered,
    /// Pointer movement flipped residency back to inside.
    PointerReturned,
    FocusRegained,
    BecameVisible,
    PulseElapsed,
    /// A settling trigger finished while the pointer was inside.
    TriggerSettled,
}

/// Phase transition produced by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", content = "by", rename_all = "snake_case")]
pub enum Transition {
    Activated(ActivationCause),
    Released(ReleaseSignal),
}

/// Result of offering a return signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released,
    /// Strict policy and residency reports the pointer outside.
    HeldOutside,
    AlreadyIdle,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub activations: u64,
    pub releases: u64,
    pub held_releases: u64,
    pub pulses: u64,
    pub alerts_shown: u64,
    pub fullscreen_exits: u64,
    pub fullscreen_exit_failures: u64,
    pub overlay_failures: u64,
}

/// Overlay state machine for one guard.
#[derive(Debug, Clone)]
pub struct ProtectionController {
    state: ProtectionState,
    overlay: OverlayRenderer,
    policy: ReleasePolicy,
    pulse_len: Duration,
    alert_delay: Duration,
    messages: AlertMessages,
    settle_kinds: TriggerKinds,
    pulse_deadline: Option<Duration>,
    settle_deadline: Option<Duration>,
    pending_alerts: VecDeque<(Duration, AlertKind)>,
    stats: ControllerStats,
}

impl ProtectionController {
    #[must_use]
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            state: ProtectionState::default(),
            overlay: OverlayRenderer::new(config.overlay_id.clone(), config.overlay.clone()),
            policy: config.release,
            pulse_len: config.timing.pulse(),
            alert_delay: config.timing.alert_delay(),
            messages: config.messages.clone(),
            settle_kinds: config.settle_kinds,
            pulse_deadline: None,
            settle_deadline: None,
            pending_alerts: VecDeque::new(),
            stats: ControllerStats::default(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> ProtectionState {
        self.state
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }

    #[must_use]
    pub const fn policy(&self) -> ReleasePolicy {
        self.policy
    }

    #[must_use]
    pub const fn stats(&self) -> ControllerStats {
        self.stats
    }

    #[must_use]
    pub const fn overlay(&self) -> &OverlayRenderer {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut OverlayRenderer {
        &mut self.overlay
    }

    /// Whether a click pulse is waiting to auto-release.
    #[must_use]
    pub const fn pulse_pending(&self) -> bool {
        self.pulse_deadline.is_some()
    }

    /// Alerts queued but not yet shown.
    #[must_use]
    pub fn pending_alerts(&self) -> usize {
        self.pending_alerts.len()
    }

    /// Enter `Active`. Idempotent.
    pub fn activate<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        cause: ActivationCause,
    ) -> Option<Transition> {
        if cause != ActivationCause::Pulse && self.pulse_deadline.take().is_some() {
            tracing::debug!(?cause, "click pulse cancelled by activation");
        }
        if self.state.is_active() {
            return None;
        }
        let warning = self.overlay.style().warning_text.clone();
        if let Err(err) = self.overlay.set_intensity(host, 1.0, warning.as_deref()) {
            self.stats.overlay_failures += 1;
            tracing::warn!(error = %err, "overlay activation write failed");
        }
        self.state = ProtectionState {
            phase: Phase::Active,
            intensity: 1.0,
        };
        self.stats.activations += 1;
        tracing::debug!(?cause, phase = "active", "protection activated");
        Some(Transition::Activated(cause))
    }

    /// Apply a classified trigger: activate, request a fullscreen exit if
    /// asked and applicable, queue its alert, arm its settle.
    pub fn handle_trigger<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        event: &TriggerEvent,
        now: Duration,
    ) -> Option<Transition> {
        let transition = self.activate(host, ActivationCause::Trigger(event.kind));
        if event.exit_fullscreen && host.fullscreen_active() {
            self.exit_fullscreen(host);
        }
        let mut settle_at = now;
        if let Some(alert) = event.alert {
            settle_at = now + self.alert_delay;
            self.pending_alerts.push_back((settle_at, alert));
        }
        if self.settles(event) {
            // Repeats and key-ups of an alerting press wait for that alert.
            let due = match (event.alert, self.settle_deadline) {
                (None, Some(pending)) => pending,
                _ => settle_at,
            };
            self.settle_deadline = Some(due);
        }
        transition
    }

    /// Whether `event` returns the guard to `Idle` once it has played out.
    #[must_use]
    pub fn settles(&self, event: &TriggerEvent) -> bool {
        self.settle_kinds.contains(event.kind.flag()) && event.class == event.kind.default_class()
    }

    /// Consume a due settle. The caller offers
    /// [`ReleaseSignal::TriggerSettled`] when this returns true and the
    /// pointer is inside; a settle that finds the pointer outside is dropped.
    pub fn take_settle(&mut self, now: Duration) -> bool {
        match self.settle_deadline {
            Some(due) if due <= now => {
                self.settle_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Click pulse: activate if idle and (re)arm the auto-release. Every
    /// click arms it, including one landing on a trigger activation.
    pub fn pulse<H: Host + ?Sized>(&mut self, host: &mut H, now: Duration) -> Option<Transition> {
        let transition = self.activate(host, ActivationCause::Pulse);
        self.pulse_deadline = Some(now + self.pulse_len);
        self.stats.pulses += 1;
        transition
    }

    /// Offer a return signal to the release gate.
    pub fn release<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        signal: ReleaseSignal,
        pointer_inside: bool,
    ) -> ReleaseOutcome {
        if !self.state.is_active() {
            return ReleaseOutcome::AlreadyIdle;
        }
        let gated = signal != ReleaseSignal::PulseElapsed && self.policy == ReleasePolicy::Strict;
        if gated && !pointer_inside {
            self.stats.held_releases += 1;
            tracing::debug!(?signal, reason = "pointer_outside", "release held");
            return ReleaseOutcome::HeldOutside;
        }
        if let Err(err) = self.overlay.clear(host) {
            self.stats.overlay_failures += 1;
            tracing::warn!(error = %err, "overlay release write failed");
        }
        self.state = ProtectionState::default();
        self.pulse_deadline = None;
        self.settle_deadline = None;
        self.stats.releases += 1;
        tracing::debug!(?signal, phase = "idle", "protection released");
        ReleaseOutcome::Released
    }

    /// Run due timers: show queued alerts, expire the click pulse. Due
    /// settles are left for [`Self::take_settle`].
    pub fn poll<H: Host + ?Sized>(&mut self, host: &mut H, now: Duration) -> Option<Transition> {
        while let Some(&(due, kind)) = self.pending_alerts.front()
            && due <= now
        {
            self.pending_alerts.pop_front();
            host.show_alert(kind, self.messages.message(kind));
            self.stats.alerts_shown += 1;
            tracing::debug!(?kind, "alert shown");
        }

        let deadline = self.pulse_deadline?;
        if now < deadline {
            return None;
        }
        self.pulse_deadline = None;
        match self.release(host, ReleaseSignal::PulseElapsed, false) {
            ReleaseOutcome::Released => Some(Transition::Released(ReleaseSignal::PulseElapsed)),
            ReleaseOutcome::HeldOutside | ReleaseOutcome::AlreadyIdle => None,
        }
    }

    /// Earliest controller deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        let alert = self.pending_alerts.front().map(|&(due, _)| due);
        [self.pulse_deadline, alert, self.settle_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Drop timers and queued alerts and return to `Idle` without touching
    /// the host. Used at teardown after the overlay is destroyed.
    pub fn reset(&mut self) {
        self.state = ProtectionState::default();
        self.pulse_deadline = None;
        self.settle_deadline = None;
        self.pending_alerts.clear();
    }

    fn exit_fullscreen<H: Host + ?Sized>(&mut self, host: &mut H) {
        match host.exit_fullscreen() {
            Ok(()) => {
                self.stats.fullscreen_exits += 1;
                tracing::debug!("fullscreen exit requested");
            }
            Err(err) => {
                self.stats.fullscreen_exit_failures += 1;
                tracing::warn!(error = %err, "fullscreen exit failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHost;
    use crate::trigger::TriggerClass;
    use pretty_assertions::assert_eq;

    const fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn print_screen() -> TriggerEvent {
        TriggerEvent {
            kind: TriggerKind::PrintScreen,
            class: TriggerClass::Screenshot,
            suppress: true,
            alert: Some(AlertKind::Screenshot),
            exit_fullscreen: false,
        }
    }

    fn setup(config: &GuardConfig) -> (ProtectionController, RecordingHost) {
        let mut host = RecordingHost::new();
        let mut controller = ProtectionController::new(config);
        controller
            .overlay_mut()
            .ensure(&mut host)
            .expect("ensure overlay");
        (controller, host)
    }

    #[test]
    fn activation_is_instant_and_idempotent() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        let first = controller.activate(&mut host, ActivationCause::DebugHook);
        assert_eq!(first, Some(Transition::Activated(ActivationCause::DebugHook)));
        let frames = host.frames.len();
        assert_eq!(
            controller.activate(&mut host, ActivationCause::Pulse),
            None
        );
        assert_eq!(host.frames.len(), frames);

        let frame = host.overlay(&config.overlay_id).expect("overlay");
        assert!(frame.instant);
        assert_eq!(frame.blur_px, config.overlay.max_blur_px);
        assert_eq!(frame.opacity, 1.0);
        assert_eq!(controller.stats().activations, 1);
    }

    #[test]
    fn strict_release_is_gated_on_residency() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        controller.activate(&mut host, ActivationCause::Residency(LeaveReason::Boundary));
        assert_eq!(
            controller.release(&mut host, ReleaseSignal::FocusRegained, false),
            ReleaseOutcome::HeldOutside
        );
        assert_eq!(controller.phase(), Phase::Active);
        assert_eq!(
            controller.release(&mut host, ReleaseSignal::PointerEntered, true),
            ReleaseOutcome::Released
        );
        assert_eq!(controller.phase(), Phase::Idle);
        let frame = host.overlay(&config.overlay_id).expect("overlay");
        assert_eq!(frame.opacity, config.overlay.baseline_opacity);
        assert_eq!(frame.warning, None);
    }

    #[test]
    fn simple_release_ignores_residency() {
        let config = GuardConfig::file_viewer();
        let (mut controller, mut host) = setup(&config);
        controller.activate(&mut host, ActivationCause::DebugHook);
        assert_eq!(
            controller.release(&mut host, ReleaseSignal::BecameVisible, false),
            ReleaseOutcome::Released
        );
    }

    #[test]
    fn release_while_idle_is_noop() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        assert_eq!(
            controller.release(&mut host, ReleaseSignal::PointerEntered, true),
            ReleaseOutcome::AlreadyIdle
        );
    }

    #[test]
    fn pulse_auto_releases_regardless_of_residency() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        controller.pulse(&mut host, ms(1_000));
        assert_eq!(controller.phase(), Phase::Active);
        assert_eq!(controller.next_deadline(), Some(ms(1_600)));
        assert_eq!(controller.poll(&mut host, ms(1_599)), None);
        assert_eq!(
            controller.poll(&mut host, ms(1_600)),
            Some(Transition::Released(ReleaseSignal::PulseElapsed))
        );
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[test]
    fn repeated_clicks_refresh_pulse() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        controller.pulse(&mut host, ms(0));
        controller.pulse(&mut host, ms(400));
        assert_eq!(controller.poll(&mut host, ms(700)), None);
        assert_eq!(controller.phase(), Phase::Active);
        assert!(controller.poll(&mut host, ms(1_000)).is_some());
    }

    #[test]
    fn trigger_cancels_pending_pulse_until_next_click() {
        let config = GuardConfig::file_viewer();
        let (mut controller, mut host) = setup(&config);
        controller.pulse(&mut host, ms(0));
        controller.handle_trigger(&mut host, &print_screen(), ms(100));
        assert!(!controller.pulse_pending());
        controller.poll(&mut host, ms(5_000));
        assert_eq!(controller.phase(), Phase::Active);

        controller.pulse(&mut host, ms(6_000));
        assert!(controller.pulse_pending());
        assert_eq!(controller.next_deadline(), Some(ms(6_600)));
        assert_eq!(
            controller.poll(&mut host, ms(6_600)),
            Some(Transition::Released(ReleaseSignal::PulseElapsed))
        );
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[test]
    fn click_during_trigger_activation_arms_pulse() {
        let config = GuardConfig::file_viewer();
        let (mut controller, mut host) = setup(&config);
        controller.activate(&mut host, ActivationCause::Trigger(TriggerKind::ContextMenu));
        assert_eq!(controller.pulse(&mut host, ms(1_000)), None);
        assert_eq!(controller.stats().pulses, 1);
        assert!(controller.poll(&mut host, ms(1_600)).is_some());
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[test]
    fn settle_waits_for_the_alert() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        controller.handle_trigger(&mut host, &print_screen(), ms(0));
        assert!(!controller.take_settle(ms(99)));
        assert_eq!(controller.next_deadline(), Some(ms(100)));
        controller.poll(&mut host, ms(100));
        assert_eq!(host.alerts.len(), 1);
        assert!(controller.take_settle(ms(100)));
        assert!(!controller.take_settle(ms(200)));
    }

    #[test]
    fn settle_without_alert_is_due_at_once() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        let f5 = TriggerEvent {
            kind: TriggerKind::FunctionKey,
            class: TriggerClass::Screenshot,
            suppress: true,
            alert: None,
            exit_fullscreen: false,
        };
        controller.handle_trigger(&mut host, &f5, ms(40));
        assert!(controller.take_settle(ms(40)));
    }

    #[test]
    fn key_up_joins_the_pending_settle() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        controller.handle_trigger(&mut host, &print_screen(), ms(0));
        let key_up = TriggerEvent {
            alert: None,
            ..print_screen()
        };
        controller.handle_trigger(&mut host, &key_up, ms(30));
        assert!(!controller.take_settle(ms(30)));
        assert!(controller.take_settle(ms(100)));
    }

    #[test]
    fn reclassified_and_unlisted_triggers_do_not_settle() {
        let landing = ProtectionController::new(&GuardConfig::landing());
        let snip = TriggerEvent {
            kind: TriggerKind::DangerousCombo,
            class: TriggerClass::Screenshot,
            suppress: true,
            alert: Some(AlertKind::Screenshot),
            exit_fullscreen: false,
        };
        assert!(!landing.settles(&snip));
        assert!(landing.settles(&TriggerEvent {
            class: TriggerClass::Download,
            ..snip
        }));
        let blur = TriggerEvent {
            kind: TriggerKind::WindowBlur,
            class: TriggerClass::Focus,
            suppress: false,
            alert: None,
            exit_fullscreen: false,
        };
        assert!(!landing.settles(&blur));

        let viewer = ProtectionController::new(&GuardConfig::file_viewer());
        assert!(!viewer.settles(&print_screen()));
    }

    #[test]
    fn alerts_are_delayed() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        controller.handle_trigger(&mut host, &print_screen(), ms(0));
        assert!(host.alerts.is_empty());
        assert_eq!(controller.next_deadline(), Some(ms(100)));
        controller.poll(&mut host, ms(100));
        assert_eq!(
            host.alerts,
            vec![(AlertKind::Screenshot, config.messages.screenshot.clone())]
        );
        assert_eq!(controller.pending_alerts(), 0);
    }

    #[test]
    fn fullscreen_exit_failure_is_counted_not_escalated() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        host.fullscreen = true;
        host.fail_exit_fullscreen = true;
        let event = TriggerEvent {
            kind: TriggerKind::Fullscreen,
            class: TriggerClass::Fullscreen,
            suppress: false,
            alert: None,
            exit_fullscreen: true,
        };
        let transition = controller.handle_trigger(&mut host, &event, ms(0));
        assert!(transition.is_some());
        assert_eq!(controller.phase(), Phase::Active);
        assert_eq!(controller.stats().fullscreen_exit_failures, 1);
    }

    #[test]
    fn fullscreen_exit_skipped_when_not_fullscreen() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        let event = TriggerEvent {
            kind: TriggerKind::Fullscreen,
            class: TriggerClass::Fullscreen,
            suppress: false,
            alert: None,
            exit_fullscreen: true,
        };
        controller.handle_trigger(&mut host, &event, ms(0));
        assert_eq!(host.fullscreen_exit_requests, 0);
    }

    #[test]
    fn reset_drops_timers() {
        let config = GuardConfig::landing();
        let (mut controller, mut host) = setup(&config);
        controller.handle_trigger(&mut host, &print_screen(), ms(0));
        controller.reset();
        assert_eq!(controller.next_deadline(), None);
        assert_eq!(controller.phase(), Phase::Idle);
    }
}
