#![forbid(unsafe_code)]

//! Host capability interface.
//!
//! Every piece of global document/window state the guard touches goes
//! through [`Host`]. The web crate implements it over `web-sys`; tests use
//! [`crate::testing::RecordingHost`].
//!
//! Methods returning `Result` are required operations: a failure during
//! mount rolls the mount back. Methods returning `bool` report whether
//! something was actually removed and are safe to call when nothing exists.

use core::time::Duration;

use serde::Serialize;

use crate::error::HostError;
use crate::overlay::OverlayFrame;
use crate::signal::{BoundaryKind, KeyPhase, PointerAction, TouchPhase};
use crate::trigger::AlertKind;

/// Opaque handle for one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ListenerId(pub u64);

/// Object a listener is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerTarget {
    Document,
    Window,
}

/// How the host turns a platform event into a [`crate::RawSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "route", content = "arg", rename_all = "snake_case")]
pub enum SignalRoute {
    Key(KeyPhase),
    Pointer(PointerAction),
    Boundary(BoundaryKind),
    Touch(TouchPhase),
    Focus(bool),
    Visibility,
    Fullscreen,
    Copy,
    ContextMenu,
    Orientation,
}

/// One subscription the guard asks the host to register. Every listener
/// is registered for the capture phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerSpec {
    /// Platform event name (`"keydown"`, `"webkitfullscreenchange"`, ...).
    pub event: &'static str,
    pub target: ListenerTarget,
    /// Passive listeners cannot suppress default actions.
    pub passive: bool,
    pub route: SignalRoute,
}

impl ListenerSpec {
    /// Capture-phase, non-passive listener.
    #[must_use]
    pub const fn capture(event: &'static str, target: ListenerTarget, route: SignalRoute) -> Self {
        Self {
            event,
            target,
            passive: false,
            route,
        }
    }

    /// Mark the listener passive.
    #[must_use]
    pub const fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// Platform capabilities used by the guard.
pub trait Host {
    // Overlay node.

    /// Whether a node with this id exists in the document.
    fn overlay_exists(&self, id: &str) -> bool;
    /// Create the overlay node with the given initial frame.
    fn create_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError>;
    /// Apply a frame to an existing overlay node.
    fn apply_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError>;
    fn remove_overlay(&mut self, id: &str) -> bool;
    /// Whether `backdrop-filter` blur is available.
    fn supports_backdrop_filter(&self) -> bool;

    // Injected document nodes.

    fn inject_style(&mut self, id: &str, css: &str) -> Result<(), HostError>;
    fn remove_style(&mut self, id: &str) -> bool;
    fn inject_viewport(&mut self, id: &str, content: &str) -> Result<(), HostError>;
    fn remove_viewport(&mut self, id: &str) -> bool;
    /// Add or remove a class on the root (body) element.
    fn set_root_class(&mut self, class: &str, enabled: bool);

    // Subscriptions.

    fn subscribe(&mut self, spec: ListenerSpec) -> Result<ListenerId, HostError>;
    /// Remove exactly the listener registered under `id`.
    fn unsubscribe(&mut self, id: ListenerId) -> bool;

    // Queries.

    fn has_focus(&self) -> bool;
    fn fullscreen_active(&self) -> bool;
    fn has_text_selection(&self) -> bool;

    // Side effects.

    fn show_alert(&mut self, kind: AlertKind, message: &str);
    /// Best-effort fullscreen exit across vendor variants.
    fn exit_fullscreen(&mut self) -> Result<(), HostError>;
    fn install_debug_hook(&mut self, name: &str) -> Result<(), HostError>;
    fn remove_debug_hook(&mut self, name: &str) -> bool;

    // Wakeups.

    /// Ask to be ticked after `delay`. Replaces any pending wakeup.
    fn schedule_wakeup(&mut self, delay: Duration);
    fn cancel_wakeup(&mut self);
}
