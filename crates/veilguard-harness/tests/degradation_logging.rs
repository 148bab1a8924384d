#![forbid(unsafe_code)]

//! Degraded host capabilities: blur fallback, rejected fullscreen exit,
//! missing debug hook. Each must keep protection working and leave a
//! structured `warn!` (or nothing) behind.
//!
//! Run:
//!   cargo test -p veilguard-harness --test degradation_logging

use core::time::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use veilguard_core::{
    BoundaryKind, GuardConfig, Modifiers, Phase, ProtectionGuard, RawSignal, RelatedTarget,
};
use veilguard_harness::RecordingHost;

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    fields: HashMap<String, String>,
    message: Option<String>,
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct EventCaptureHandle {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCaptureHandle {
    fn events_at_level(&self, level: tracing::Level) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    fn warnings_with(&self, message: &str) -> Vec<CapturedEvent> {
        self.events_at_level(tracing::Level::WARN)
            .into_iter()
            .filter(|e| e.message.as_deref() == Some(message))
            .collect()
    }
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for EventCapture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        let fields: HashMap<String, String> = visitor.0.into_iter().collect();
        let message = fields.get("message").cloned();
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields,
            message,
        });
    }
}

fn with_captured_events<F>(f: F) -> EventCaptureHandle
where
    F: FnOnce(),
{
    let events = Arc::new(Mutex::new(Vec::new()));
    let layer = EventCapture {
        events: Arc::clone(&events),
    };
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::TRACE)
        .with(layer);
    tracing::subscriber::with_default(subscriber, f);
    EventCaptureHandle { events }
}

const fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn f11() -> RawSignal {
    RawSignal::key_down("F11", 122, "F11", Modifiers::empty())
}

// ============================================================================
// Blur fallback
// ============================================================================

#[test]
fn missing_backdrop_filter_falls_back_to_opaque_tint() {
    let mut host = RecordingHost::new();
    host.blur_supported = false;
    let config = GuardConfig::landing();
    let mut guard = ProtectionGuard::new(host, config.clone());
    guard.mount(ms(0)).expect("mount");
    assert!(!guard.controller().overlay().blur_supported());

    guard.handle(
        &RawSignal::boundary(BoundaryKind::Leave, RelatedTarget::Absent),
        ms(10),
    );
    assert_eq!(guard.state().phase, Phase::Active);
    let frame = guard.host().overlay(&config.overlay_id).expect("overlay");
    assert_eq!(frame.blur_px, 0.0);
    assert_eq!(frame.opacity, 1.0);
    assert_eq!(frame.tint_alpha, config.overlay.fallback_tint);
    assert_eq!(frame.warning.as_deref(), config.overlay.warning_text.as_deref());

    guard.handle(
        &RawSignal::boundary(BoundaryKind::Enter, RelatedTarget::Absent),
        ms(20),
    );
    let frame = guard.host().overlay(&config.overlay_id).expect("overlay");
    assert_eq!(frame.opacity, config.overlay.baseline_opacity);
    assert_eq!(frame.warning, None);
}

#[test]
fn supported_blur_reaches_max_on_activation() {
    let config = GuardConfig::landing();
    let mut guard = ProtectionGuard::new(RecordingHost::new(), config.clone());
    guard.mount(ms(0)).expect("mount");
    guard.debug_trigger(ms(1));
    let frame = guard.host().overlay(&config.overlay_id).expect("overlay");
    assert_eq!(frame.blur_px, config.overlay.max_blur_px);
    assert_eq!(frame.opacity, 1.0);
    assert!(frame.instant);
}

// ============================================================================
// Fullscreen exit
// ============================================================================

#[test]
fn rejected_fullscreen_exit_is_logged_and_protection_holds() {
    let mut host = RecordingHost::new();
    host.fullscreen = true;
    host.fail_exit_fullscreen = true;
    let mut guard = ProtectionGuard::new(host, GuardConfig::landing());

    let handle = with_captured_events(|| {
        guard.mount(ms(0)).expect("mount");
        let dispatch = guard.handle(&f11(), ms(10));
        assert!(dispatch.suppress);
    });

    assert_eq!(guard.state().phase, Phase::Active);
    assert_eq!(guard.host().fullscreen_exit_requests, 1);
    assert_eq!(guard.controller().stats().fullscreen_exit_failures, 1);

    let warnings = handle.warnings_with("fullscreen exit failed");
    assert_eq!(warnings.len(), 1, "expected one warning");
    assert!(
        warnings[0]
            .fields
            .get("error")
            .is_some_and(|e| e.contains("exitFullscreen")),
        "warning should carry the host error: {:?}",
        warnings[0].fields
    );
}

#[test]
fn no_fullscreen_exit_when_not_fullscreen() {
    let mut guard = ProtectionGuard::new(RecordingHost::new(), GuardConfig::landing());
    guard.mount(ms(0)).expect("mount");
    guard.handle(&f11(), ms(10));
    assert_eq!(guard.host().fullscreen_exit_requests, 0);
    assert_eq!(guard.state().phase, Phase::Active);
}

#[test]
fn fullscreen_change_event_exits_fullscreen() {
    let mut host = RecordingHost::new();
    host.fullscreen = true;
    let mut guard = ProtectionGuard::new(host, GuardConfig::landing());
    guard.mount(ms(0)).expect("mount");
    let dispatch = guard.handle(&RawSignal::FullscreenChange, ms(10));
    assert!(!dispatch.suppress);
    assert!(!guard.host().fullscreen);
    assert_eq!(guard.controller().stats().fullscreen_exits, 1);
}

// ============================================================================
// Debug hook
// ============================================================================

#[test]
fn debug_hook_failure_does_not_fail_mount() {
    let mut host = RecordingHost::new();
    host.fail_debug_hook = true;
    let mut guard = ProtectionGuard::new(host, GuardConfig::landing());

    let handle = with_captured_events(|| {
        guard.mount(ms(0)).expect("mount despite hook failure");
    });

    assert!(guard.is_mounted());
    assert!(guard.host().debug_hooks.is_empty());
    let warnings = handle.warnings_with("debug hook not installed");
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].fields.get("hook").map(String::as_str),
        Some("landingPageDebugAntiScreenshot")
    );

    let report = guard.unmount().expect("unmount");
    assert!(!report.debug_hook_removed);
    assert!(guard.host().is_clean());
}

#[test]
fn quiet_session_emits_no_warnings() {
    let mut guard = ProtectionGuard::new(RecordingHost::new(), GuardConfig::landing());
    let handle = with_captured_events(|| {
        guard.mount(ms(0)).expect("mount");
        guard.handle(
            &RawSignal::key_down("PrintScreen", 44, "PrintScreen", Modifiers::empty()),
            ms(10),
        );
        guard.tick(ms(110));
        guard.unmount().expect("unmount");
    });
    assert!(handle.events_at_level(tracing::Level::WARN).is_empty());
    assert!(!handle.events_at_level(tracing::Level::DEBUG).is_empty());
}
