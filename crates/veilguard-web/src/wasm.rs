#![forbid(unsafe_code)]

//! `wasm-bindgen` exports. Only compiled on `wasm32` targets.

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use veilguard_core::{GuardConfig, Phase, TeardownReport};

use crate::dom_host::{self, SharedGuard};

fn console_error(msg: &str) {
    let global = js_sys::global();
    let Ok(console) = Reflect::get(&global, &"console".into()) else {
        return;
    };
    let Ok(error) = Reflect::get(&console, &"error".into()) else {
        return;
    };
    let Ok(error_fn) = error.dyn_into::<js_sys::Function>() else {
        return;
    };
    let _ = error_fn.call1(&console, &JsValue::from_str(msg));
}

fn install_panic_hook() {
    use std::sync::Once;

    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let msg = if let Some(loc) = info.location() {
                format!(
                    "panic at {}:{}:{}: {info}",
                    loc.file(),
                    loc.line(),
                    loc.column()
                )
            } else {
                format!("panic: {info}")
            };
            console_error(&msg);
        }));
    });
}

fn set_js(obj: &Object, key: &str, value: JsValue) {
    let _ = Reflect::set(obj, &JsValue::from_str(key), &value);
}

fn js_error(err: &impl core::fmt::Display) -> JsValue {
    js_sys::Error::new(&err.to_string()).into()
}

fn report_to_js(report: &TeardownReport) -> JsValue {
    let obj = Object::new();
    set_js(
        &obj,
        "listenersRemoved",
        JsValue::from_f64(report.listeners_removed as f64),
    );
    set_js(&obj, "overlayRemoved", JsValue::from_bool(report.overlay_removed));
    set_js(&obj, "styleRemoved", JsValue::from_bool(report.style_removed));
    set_js(
        &obj,
        "viewportRemoved",
        JsValue::from_bool(report.viewport_removed),
    );
    set_js(
        &obj,
        "debugHookRemoved",
        JsValue::from_bool(report.debug_hook_removed),
    );
    obj.into()
}

#[wasm_bindgen(start)]
pub fn wasm_start() {
    install_panic_hook();
}

/// Capture-deterrence layer for one page.
///
/// Construct with a built-in profile name and optional JSON overrides,
/// then `mount()`. `free()` (or garbage collection of the wrapper) tears
/// down anything still installed.
#[wasm_bindgen]
pub struct ProtectionLayer {
    guard: SharedGuard,
}

#[wasm_bindgen]
impl ProtectionLayer {
    /// `profile` is `"landing"` or `"file_viewer"`. `configJson` is a
    /// partial config object merged over the profile.
    #[wasm_bindgen(constructor)]
    pub fn new(profile: &str, config_json: Option<String>) -> Result<ProtectionLayer, JsValue> {
        install_panic_hook();
        let base = GuardConfig::profile(profile).map_err(|e| js_error(&e))?;
        let config = match config_json {
            Some(json) => base.with_json_overrides(&json).map_err(|e| js_error(&e))?,
            None => base,
        };
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("no document"))?;
        Ok(Self {
            guard: dom_host::attach(window, document, config),
        })
    }

    /// Install overlay, listeners, stylesheet and hooks.
    pub fn mount(&self) -> Result<(), JsValue> {
        let mut guard = self
            .guard
            .try_borrow_mut()
            .map_err(|_| JsValue::from_str("protection layer is busy"))?;
        let now = guard.host().now();
        guard.mount(now).map_err(|e| js_error(&e))
    }

    /// Remove everything `mount` installed. Returns what was removed.
    pub fn unmount(&self) -> Result<JsValue, JsValue> {
        let mut guard = self
            .guard
            .try_borrow_mut()
            .map_err(|_| JsValue::from_str("protection layer is busy"))?;
        let report = guard.unmount().map_err(|e| js_error(&e))?;
        Ok(report_to_js(&report))
    }

    /// `"idle"` or `"active"`.
    pub fn phase(&self) -> String {
        let phase = self
            .guard
            .try_borrow()
            .map_or(Phase::Idle, |guard| guard.state().phase);
        match phase {
            Phase::Idle => "idle",
            Phase::Active => "active",
        }
        .to_owned()
    }

    #[wasm_bindgen(js_name = isPointerInside)]
    pub fn is_pointer_inside(&self) -> bool {
        self.guard
            .try_borrow()
            .is_ok_and(|guard| guard.residency().inside)
    }

    #[wasm_bindgen(js_name = isMounted)]
    pub fn is_mounted(&self) -> bool {
        self.guard.try_borrow().is_ok_and(|guard| guard.is_mounted())
    }

    /// Drain buffered dispatch log lines (JSONL, newest last).
    #[wasm_bindgen(js_name = takeLogs)]
    pub fn take_logs(&self) -> Array {
        let lines = self
            .guard
            .try_borrow_mut()
            .map(|mut guard| guard.host_mut().take_logs())
            .unwrap_or_default();
        lines.into_iter().map(JsValue::from).collect()
    }
}
