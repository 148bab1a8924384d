#![forbid(unsafe_code)]

//! Browser frontend for the veilguard protection layer.
//!
//! [`ProtectionLayer`] is the `wasm-bindgen` export: it owns one
//! `ProtectionGuard<DomHost>` and drives it from DOM listeners, `gloo`
//! timeouts and animation frames.
//!
//! The DOM-free pieces ([`css`], [`routing`], [`vendor`]) compile on every
//! target so they can be unit-tested natively.
//!
//! ```js
//! const layer = new ProtectionLayer("file_viewer", JSON.stringify({ timing: { pulse_ms: 400 } }));
//! layer.mount();
//! // ...
//! const report = layer.unmount();
//! layer.free();
//! ```

pub mod css;
pub mod routing;
pub mod vendor;

#[cfg(target_arch = "wasm32")]
mod dom_host;
#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::ProtectionLayer;
