#![forbid(unsafe_code)]

//! [`Host`] implementation over `web-sys`.
//!
//! Callbacks (listeners, timeouts, the debug hook) hold a `Weak` handle to
//! the guard and borrow it with `try_borrow_mut`. A callback that fires
//! after the layer was freed does nothing; an event arriving while the
//! guard is busy is dropped and a wakeup is retried.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

use core::time::Duration;

use gloo::events::{EventListener, EventListenerOptions, EventListenerPhase};
use gloo::render::{AnimationFrame, request_animation_frame};
use gloo::timers::callback::Timeout;
use js_sys::{Function, Object, Promise, Reflect};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Document, Element, Event, HtmlElement, KeyboardEvent, MouseEvent, Node, TouchEvent};
use web_time::Instant;

use veilguard_core::{
    AlertKind, GuardConfig, Host, HostError, ListenerId, ListenerSpec,
    ListenerTarget, OverlayFrame, ProtectionGuard, SignalRoute,
};

use crate::css;
use crate::routing::{self, EventFacts};
use crate::vendor;

/// Guard shared between the exported layer and its callbacks.
pub(crate) type SharedGuard = Rc<RefCell<ProtectionGuard<DomHost>>>;
type WeakGuard = Weak<RefCell<ProtectionGuard<DomHost>>>;

/// Dispatch log lines kept for `takeLogs`.
const LOG_CAPACITY: usize = 256;

const BUSY_RETRY_MS: u32 = 16;

pub(crate) struct DomHost {
    window: web_sys::Window,
    document: Document,
    guard: WeakGuard,
    epoch: Instant,
    next_listener: u64,
    listeners: BTreeMap<ListenerId, EventListener>,
    wakeup: Option<Timeout>,
    /// Timeout whose callback is running or has run; dropped on the next fire.
    spent_wakeup: Option<Timeout>,
    restore_transition: Option<AnimationFrame>,
    debug_hooks: BTreeMap<String, Closure<dyn FnMut()>>,
    logs: VecDeque<String>,
}

impl core::fmt::Debug for DomHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DomHost")
            .field("listeners", &self.listeners.len())
            .field("wakeup", &self.wakeup.is_some())
            .field("spent_wakeup", &self.spent_wakeup.is_some())
            .field("debug_hooks", &self.debug_hooks.len())
            .finish_non_exhaustive()
    }
}

/// Build a guard whose host holds a weak reference back to it.
pub(crate) fn attach(
    window: web_sys::Window,
    document: Document,
    config: GuardConfig,
) -> SharedGuard {
    Rc::new_cyclic(|weak: &WeakGuard| {
        let host = DomHost {
            window,
            document,
            guard: weak.clone(),
            epoch: Instant::now(),
            next_listener: 0,
            listeners: BTreeMap::new(),
            wakeup: None,
            spent_wakeup: None,
            restore_transition: None,
            debug_hooks: BTreeMap::new(),
            logs: VecDeque::new(),
        };
        RefCell::new(ProtectionGuard::new(host, config))
    })
}

fn rejected(err: &JsValue) -> HostError {
    let reason = err
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()))
        .or_else(|| err.as_string())
        .unwrap_or_else(|| format!("{err:?}"));
    HostError::Rejected(reason)
}

fn set_declarations(
    element: &HtmlElement,
    decls: impl IntoIterator<Item = (&'static str, impl AsRef<str>)>,
) -> Result<(), HostError> {
    let style = element.style();
    for (name, value) in decls {
        style
            .set_property(name, value.as_ref())
            .map_err(|e| rejected(&e))?;
    }
    Ok(())
}

impl DomHost {
    /// Time since this host was created, used as the guard's clock.
    pub(crate) fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Drain buffered dispatch log lines.
    pub(crate) fn take_logs(&mut self) -> Vec<String> {
        self.logs.drain(..).collect()
    }

    fn record(&mut self, line: String) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    fn overlay_element(&self, id: &str) -> Option<HtmlElement> {
        self.document
            .get_element_by_id(id)
            .and_then(|el| el.dyn_into::<HtmlElement>().ok())
    }

    fn create_element(&self, tag: &str) -> Result<Element, HostError> {
        self.document
            .create_element(tag)
            .map_err(|e| rejected(&e))
    }

    fn remove_by_id(&self, id: &str) -> bool {
        match self.document.get_element_by_id(id) {
            Some(element) => {
                element.remove();
                true
            }
            None => false,
        }
    }

    fn append_to_head(&self, node: &Node) -> Result<(), HostError> {
        let head = self.document.head().ok_or(HostError::Missing("document.head"))?;
        head.append_child(node).map_err(|e| rejected(&e))?;
        Ok(())
    }

    fn paint(&mut self, overlay: &HtmlElement, frame: &OverlayFrame) -> Result<(), HostError> {
        set_declarations(overlay, css::frame_declarations(frame))?;
        if let Some(warning) = overlay
            .first_element_child()
            .and_then(|el| el.dyn_into::<HtmlElement>().ok())
        {
            warning.set_text_content(frame.warning.as_deref());
            set_declarations(&warning, [("display", css::warning_display(frame))])?;
        }
        if frame.instant {
            // Flush the transition-free style before re-enabling transitions.
            let _ = overlay.offset_height();
            let overlay = overlay.clone();
            self.restore_transition = Some(request_animation_frame(move |_| {
                let _ = overlay.style().set_property("transition", css::TRANSITION);
            }));
        }
        Ok(())
    }

    fn event_facts(&self, route: SignalRoute, event: &Event) -> EventFacts {
        let mut facts = EventFacts::default();
        match route {
            SignalRoute::Key(_) => {
                if let Some(key) = event.dyn_ref::<KeyboardEvent>() {
                    facts.key = key.key();
                    facts.key_code = key.key_code();
                    facts.code = key.code();
                    facts.mods = routing::modifiers(
                        key.shift_key(),
                        key.alt_key(),
                        key.ctrl_key(),
                        key.meta_key(),
                    );
                    facts.repeat = key.repeat();
                }
            }
            SignalRoute::Boundary(_) => {
                let related = event
                    .dyn_ref::<MouseEvent>()
                    .and_then(MouseEvent::related_target);
                let contained = related
                    .as_ref()
                    .and_then(|target| target.dyn_ref::<Node>())
                    .zip(self.document.document_element())
                    .is_some_and(|(node, root)| root.contains(Some(node)));
                facts.related = Some(routing::related_target(related.is_some(), contained));
            }
            SignalRoute::Touch(_) => {
                if let Some(touch) = event.dyn_ref::<TouchEvent>() {
                    facts.touches = touch.touches().length();
                    facts.target_touches = touch.target_touches().length();
                }
            }
            SignalRoute::Visibility => facts.hidden = self.document.hidden(),
            _ => {}
        }
        facts
    }

    fn listener_callback(&self, spec: ListenerSpec) -> impl FnMut(&Event) + 'static {
        let weak = self.guard.clone();
        move |event: &Event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let Ok(mut guard) = shared.try_borrow_mut() else {
                tracing::trace!(event = spec.event, "re-entrant event dropped");
                return;
            };
            let facts = guard.host().event_facts(spec.route, event);
            let signal = routing::signal_for(spec.route, &facts);
            let now = guard.host().now();
            let dispatch = guard.handle(&signal, now);
            if dispatch.suppress && !spec.passive {
                event.prevent_default();
                event.stop_propagation();
            }
            guard.host_mut().record(dispatch.log.to_jsonl());
        }
    }

    /// Body of the scheduled wakeup timeout. Parks the running timeout so
    /// its closure outlives this call, then ticks.
    fn fire_wakeup(weak: &WeakGuard) {
        Self::tick_when_free(weak, true);
    }

    /// Busy retry of a wakeup. The timeout that fired was already parked
    /// or replaced, so only the tick is repeated.
    fn retry_tick(weak: &WeakGuard) {
        Self::tick_when_free(weak, false);
    }

    fn tick_when_free(weak: &WeakGuard, park: bool) {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let Ok(mut guard) = shared.try_borrow_mut() else {
            // The guard still expects this deadline; try again shortly.
            tracing::trace!("wakeup while guard busy, retrying");
            let weak = weak.clone();
            let _ = Timeout::new(BUSY_RETRY_MS, move || DomHost::retry_tick(&weak)).forget();
            return;
        };
        let host = guard.host_mut();
        if park {
            host.spent_wakeup = host.wakeup.take();
        }
        let now = host.now();
        guard.tick(now);
    }
}

impl Host for DomHost {
    fn overlay_exists(&self, id: &str) -> bool {
        self.document.get_element_by_id(id).is_some()
    }

    fn create_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError> {
        let overlay = self
            .create_element("div")?
            .dyn_into::<HtmlElement>()
            .map_err(|_| HostError::Unsupported("HTMLElement"))?;
        overlay.set_id(id);
        overlay
            .set_attribute("aria-hidden", "true")
            .map_err(|e| rejected(&e))?;
        set_declarations(&overlay, css::OVERLAY_BASE.iter().copied())?;

        let warning = self
            .create_element("div")?
            .dyn_into::<HtmlElement>()
            .map_err(|_| HostError::Unsupported("HTMLElement"))?;
        warning.set_id(&format!("{id}{}", css::WARNING_ID_SUFFIX));
        set_declarations(&warning, css::WARNING_BASE.iter().copied())?;
        overlay.append_child(&warning).map_err(|e| rejected(&e))?;

        self.paint(&overlay, frame)?;
        let body = self.document.body().ok_or(HostError::Missing("document.body"))?;
        body.append_child(&overlay).map_err(|e| rejected(&e))?;
        Ok(())
    }

    fn apply_overlay(&mut self, id: &str, frame: &OverlayFrame) -> Result<(), HostError> {
        let overlay = self
            .overlay_element(id)
            .ok_or(HostError::Missing("overlay node"))?;
        self.paint(&overlay, frame)
    }

    fn remove_overlay(&mut self, id: &str) -> bool {
        self.restore_transition = None;
        self.remove_by_id(id)
    }

    fn supports_backdrop_filter(&self) -> bool {
        let global = js_sys::global();
        let Ok(css_ns) = Reflect::get(&global, &"CSS".into()) else {
            return false;
        };
        let Some(supports) = Reflect::get(&css_ns, &"supports".into())
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok())
        else {
            return false;
        };
        vendor::BACKDROP_FILTER.iter().any(|(property, value)| {
            supports
                .call2(&css_ns, &(*property).into(), &(*value).into())
                .is_ok_and(|v| v.is_truthy())
        })
    }

    fn inject_style(&mut self, id: &str, css: &str) -> Result<(), HostError> {
        if self.document.get_element_by_id(id).is_some() {
            return Ok(());
        }
        let style = self.create_element("style")?;
        style.set_id(id);
        style.set_text_content(Some(css));
        self.append_to_head(&style)
    }

    fn remove_style(&mut self, id: &str) -> bool {
        self.remove_by_id(id)
    }

    fn inject_viewport(&mut self, id: &str, content: &str) -> Result<(), HostError> {
        if self.document.get_element_by_id(id).is_some() {
            return Ok(());
        }
        let meta = self.create_element("meta")?;
        meta.set_id(id);
        meta.set_attribute("name", "viewport")
            .and_then(|()| meta.set_attribute("content", content))
            .map_err(|e| rejected(&e))?;
        self.append_to_head(&meta)
    }

    fn remove_viewport(&mut self, id: &str) -> bool {
        self.remove_by_id(id)
    }

    fn set_root_class(&mut self, class: &str, enabled: bool) {
        let Some(body) = self.document.body() else {
            return;
        };
        let classes = body.class_list();
        let result = if enabled {
            classes.add_1(class)
        } else {
            classes.remove_1(class)
        };
        if let Err(err) = result {
            tracing::warn!(class, error = %rejected(&err), "body class update failed");
        }
    }

    fn subscribe(&mut self, spec: ListenerSpec) -> Result<ListenerId, HostError> {
        let target: &web_sys::EventTarget = match spec.target {
            ListenerTarget::Document => self.document.as_ref(),
            ListenerTarget::Window => self.window.as_ref(),
        };
        let options = EventListenerOptions {
            phase: EventListenerPhase::Capture,
            passive: spec.passive,
        };
        let listener =
            EventListener::new_with_options(target, spec.event, options, self.listener_callback(spec));
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.insert(id, listener);
        Ok(id)
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    fn has_focus(&self) -> bool {
        self.document.has_focus().unwrap_or(true)
    }

    fn fullscreen_active(&self) -> bool {
        vendor::FULLSCREEN_ELEMENT.iter().any(|property| {
            Reflect::get(&self.document, &(*property).into())
                .is_ok_and(|element| !element.is_null() && !element.is_undefined())
        })
    }

    fn has_text_selection(&self) -> bool {
        self.window
            .get_selection()
            .ok()
            .flatten()
            .is_some_and(|selection| selection.to_string().length() > 0)
    }

    fn show_alert(&mut self, kind: AlertKind, message: &str) {
        if let Err(err) = self.window.alert_with_message(message) {
            tracing::warn!(?kind, error = %rejected(&err), "alert failed");
        }
    }

    fn exit_fullscreen(&mut self) -> Result<(), HostError> {
        let Some((method, exit)) = vendor::EXIT_FULLSCREEN.iter().find_map(|method| {
            Reflect::get(&self.document, &(*method).into())
                .ok()
                .and_then(|f| f.dyn_into::<Function>().ok())
                .map(|f| (*method, f))
        }) else {
            return Err(HostError::Unsupported("exitFullscreen"));
        };
        let result = exit
            .call0(&self.document)
            .map_err(|e| HostError::Rejected(format!("{method}: {}", rejected(&e))))?;
        if let Ok(promise) = result.dyn_into::<Promise>() {
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(err) = JsFuture::from(promise).await {
                    tracing::warn!(method, error = %rejected(&err), "fullscreen exit failed");
                }
            });
        }
        Ok(())
    }

    fn install_debug_hook(&mut self, name: &str) -> Result<(), HostError> {
        let weak = self.guard.clone();
        let trigger = Closure::<dyn FnMut()>::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let Ok(mut guard) = shared.try_borrow_mut() else {
                return;
            };
            let now = guard.host().now();
            let dispatch = guard.debug_trigger(now);
            guard.host_mut().record(dispatch.log.to_jsonl());
        });
        let hook = Object::new();
        Reflect::set(&hook, &vendor::DEBUG_HOOK_METHOD.into(), trigger.as_ref())
            .and_then(|_| Reflect::set(&self.window, &name.into(), &hook))
            .map_err(|e| rejected(&e))?;
        self.debug_hooks.insert(name.to_owned(), trigger);
        Ok(())
    }

    fn remove_debug_hook(&mut self, name: &str) -> bool {
        if self.debug_hooks.remove(name).is_none() {
            return false;
        }
        let _ = Reflect::delete_property(&self.window, &name.into());
        true
    }

    fn schedule_wakeup(&mut self, delay: Duration) {
        let millis = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
        let weak = self.guard.clone();
        self.wakeup = Some(Timeout::new(millis, move || DomHost::fire_wakeup(&weak)));
    }

    fn cancel_wakeup(&mut self) {
        self.wakeup = None;
        self.restore_transition = None;
    }
}
