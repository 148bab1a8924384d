#![forbid(unsafe_code)]

//! Recording [`Host`] for unit and integration tests.
//!
//! Every capability call is recorded in plain public fields so tests can
//! assert on document state directly. Query answers and failure injection
//! are public flags.

use core::time::Duration;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::error::HostError;
use crate::host::{Host, ListenerId, ListenerSpec};
use crate::overlay::OverlayFrame;
use crate::trigger::AlertKind;

/// In-memory document model.
#[derive(Debug, Clone)]
pub struct RecordingHost {
    /// Live overlay nodes by id, with their current frame.
    pub overlays: BTreeMap<String, OverlayFrame>,
    /// Every frame written, in order (creation included).
    pub frames: Vec<(String, OverlayFrame)>,
    pub overlays_created: usize,
    pub styles: BTreeMap<String, String>,
    pub viewports: BTreeMap<String, String>,
    pub root_classes: BTreeSet<String>,
    pub listeners: BTreeMap<ListenerId, ListenerSpec>,
    pub alerts: Vec<(AlertKind, String)>,
    pub debug_hooks: BTreeSet<String>,
    /// Delay of the pending wakeup, if any.
    pub wakeup: Option<Duration>,
    pub wakeups_scheduled: usize,
    pub fullscreen_exit_requests: usize,

    pub focused: bool,
    pub fullscreen: bool,
    pub selection: bool,
    pub blur_supported: bool,

    pub fail_exit_fullscreen: bool,
    pub fail_debug_hook: bool,
    /// Reject `subscribe` once this many listeners have been registered.
    pub fail_subscribe_after: Option<usize>,

    next_listener: u64,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    /// Focused, visible document with blur support and nothing installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            overlays: BTreeMap::new(),
            frames: Vec::new(),
            overlays_created: 0,
            styles: BTreeMap::new(),
            viewports: BTreeMap::new(),
            root_classes: BTreeSet::new(),
            listeners: BTreeMap::new(),
            alerts: Vec::new(),
            debug_hooks: BTreeSet::new(),
            wakeup: None,
            wakeups_scheduled: 0,
            fullscreen_exit_requests: 0,
            focused: true,
            fullscreen: false,
            selection: false,
            blur_supported: true,
            fail_exit_fullscreen: false,
            fail_debug_hook: false,
            fail_subscribe_after: None,
            next_listener: 1,
        }
    }

    /// Current frame of the overlay node with `id`.
    #[must_use]
    pub fn overlay(&self, id: &str) -> Option<&OverlayFrame> {
        self.overlays.get(id)
    }

    /// Number of live listeners registered for `event`.
    #[must_use]
    pub fn listeners_for(&self, event: &str) -> usize {
        self.listeners
            .values()
            .filter(|spec| spec.event == event)
            .count()
    }

    /// Nothing installed and no wakeup pending.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.overlays.is_empty()
            && self.styles.is_empty()
            && self.viewports.is_empty()
            && self.root_classes.is_empty()
            && self.listeners.is_empty()
            && self.debug_hooks.is_empty()
            && self.wakeup.is_none()
    }
}

impl Host for RecordingHost {
    fn overlay_exists(&self, id: &str) -> bool {
        self.overlays.contains_key(id)
    }

    fn create_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError> {
        if self.overlays.contains_key(id) {
            return Err(HostError::Rejected(format!("duplicate overlay id {id}")));
        }
        self.overlays.insert(id.to_owned(), frame.clone());
        self.frames.push((id.to_owned(), frame.clone()));
        self.overlays_created += 1;
        Ok(())
    }

    fn apply_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError> {
        let slot = self
            .overlays
            .get_mut(id)
            .ok_or(HostError::Missing("overlay node"))?;
        *slot = frame.clone();
        self.frames.push((id.to_owned(), frame.clone()));
        Ok(())
    }

    fn remove_overlay(&mut self, id: &str) -> bool {
        self.overlays.remove(id).is_some()
    }

    fn supports_backdrop_filter(&self) -> bool {
        self.blur_supported
    }

    fn inject_style(&mut self, id: &str, css: &str) -> Result<(), HostError> {
        self.styles.insert(id.to_owned(), css.to_owned());
        Ok(())
    }

    fn remove_style(&mut self, id: &str) -> bool {
        self.styles.remove(id).is_some()
    }

    fn inject_viewport(&mut self, id: &str, content: &str) -> Result<(), HostError> {
        self.viewports.insert(id.to_owned(), content.to_owned());
        Ok(())
    }

    fn remove_viewport(&mut self, id: &str) -> bool {
        self.viewports.remove(id).is_some()
    }

    fn set_root_class(&mut self, class: &str, enabled: bool) {
        if enabled {
            self.root_classes.insert(class.to_owned());
        } else {
            self.root_classes.remove(class);
        }
    }

    fn subscribe(&mut self, spec: ListenerSpec) -> Result<ListenerId, HostError> {
        if let Some(limit) = self.fail_subscribe_after
            && self.listeners.len() >= limit
        {
            return Err(HostError::Rejected(format!("subscribe {}", spec.event)));
        }
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.insert(id, spec);
        Ok(id)
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    fn has_focus(&self) -> bool {
        self.focused
    }

    fn fullscreen_active(&self) -> bool {
        self.fullscreen
    }

    fn has_text_selection(&self) -> bool {
        self.selection
    }

    fn show_alert(&mut self, kind: AlertKind, message: &str) {
        self.alerts.push((kind, message.to_owned()));
    }

    fn exit_fullscreen(&mut self) -> Result<(), HostError> {
        self.fullscreen_exit_requests += 1;
        if self.fail_exit_fullscreen {
            return Err(HostError::Rejected("exitFullscreen promise rejected".into()));
        }
        self.fullscreen = false;
        Ok(())
    }

    fn install_debug_hook(&mut self, name: &str) -> Result<(), HostError> {
        if self.fail_debug_hook {
            return Err(HostError::Unsupported("global debug hook"));
        }
        self.debug_hooks.insert(name.to_owned());
        Ok(())
    }

    fn remove_debug_hook(&mut self, name: &str) -> bool {
        self.debug_hooks.remove(name)
    }

    fn schedule_wakeup(&mut self, delay: Duration) {
        self.wakeup = Some(delay);
        self.wakeups_scheduled += 1;
    }

    fn cancel_wakeup(&mut self) {
        self.wakeup = None;
    }
}

/// Shared recording host, for several guards on one document.
impl Host for Rc<RefCell<RecordingHost>> {
    fn overlay_exists(&self, id: &str) -> bool {
        self.borrow().overlay_exists(id)
    }

    fn create_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError> {
        self.borrow_mut().create_overlay(id, frame)
    }

    fn apply_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError> {
        self.borrow_mut().apply_overlay(id, frame)
    }

    fn remove_overlay(&mut self, id: &str) -> bool {
        self.borrow_mut().remove_overlay(id)
    }

    fn supports_backdrop_filter(&self) -> bool {
        self.borrow().supports_backdrop_filter()
    }

    fn inject_style(&mut self, id: &str, css: &str) -> Result<(), HostError> {
        self.borrow_mut().inject_style(id, css)
    }

    fn remove_style(&mut self, id: &str) -> bool {
        self.borrow_mut().remove_style(id)
    }

    fn inject_viewport(&mut self, id: &str, content: &str) -> Result<(), HostError> {
        self.borrow_mut().inject_viewport(id, content)
    }

    fn remove_viewport(&mut self, id: &str) -> bool {
        self.borrow_mut().remove_viewport(id)
    }

    fn set_root_class(&mut self, class: &str, enabled: bool) {
        self.borrow_mut().set_root_class(class, enabled);
    }

    fn subscribe(&mut self, spec: ListenerSpec) -> Result<ListenerId, HostError> {
        self.borrow_mut().subscribe(spec)
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.borrow_mut().unsubscribe(id)
    }

    fn has_focus(&self) -> bool {
        self.borrow().has_focus()
    }

    fn fullscreen_active(&self) -> bool {
        self.borrow().fullscreen_active()
    }

    fn has_text_selection(&self) -> bool {
        self.borrow().has_text_selection()
    }

    fn show_alert(&mut self, kind: AlertKind, message: &str) {
        self.borrow_mut().show_alert(kind, message);
    }

    fn exit_fullscreen(&mut self) -> Result<(), HostError> {
        self.borrow_mut().exit_fullscreen()
    }

    fn install_debug_hook(&mut self, name: &str) -> Result<(), HostError> {
        self.borrow_mut().install_debug_hook(name)
    }

    fn remove_debug_hook(&mut self, name: &str) -> bool {
        self.borrow_mut().remove_debug_hook(name)
    }

    fn schedule_wakeup(&mut self, delay: Duration) {
        self.borrow_mut().schedule_wakeup(delay);
    }

    fn cancel_wakeup(&mut self) {
        self.borrow_mut().cancel_wakeup();
    }
}
