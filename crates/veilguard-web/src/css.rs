#![forbid(unsafe_code)]

//! Inline-style declarations for the overlay node.
//!
//! Everything here is plain strings so the mapping from [`OverlayFrame`] to
//! CSS can be checked without a DOM.

use veilguard_core::OverlayFrame;

/// Transition applied to the overlay outside of instant frames.
pub const TRANSITION: &str = "opacity 0.3s ease, backdrop-filter 0.3s ease, \
     -webkit-backdrop-filter 0.3s ease, background-color 0.3s ease";

/// Static declarations set once when the overlay node is created.
pub const OVERLAY_BASE: &[(&str, &str)] = &[
    ("position", "fixed"),
    ("top", "0"),
    ("left", "0"),
    ("width", "100vw"),
    ("height", "100vh"),
    ("z-index", "2147483647"),
    ("pointer-events", "none"),
    ("display", "flex"),
    ("align-items", "center"),
    ("justify-content", "center"),
];

/// Static declarations for the centered warning text.
pub const WARNING_BASE: &[(&str, &str)] = &[
    ("color", "#fff"),
    ("font", "600 1.5rem/1.4 system-ui, sans-serif"),
    ("text-align", "center"),
    ("padding", "1rem"),
    ("text-shadow", "0 1px 4px rgba(0, 0, 0, 0.6)"),
    ("pointer-events", "none"),
];

/// Suffix appended to the overlay id to name the warning child.
pub const WARNING_ID_SUFFIX: &str = "-warning";

/// Non-negative pixel length. Non-finite input renders as `0px`.
#[must_use]
pub fn px(value: f32) -> String {
    let value = if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    };
    format!("{value}px")
}

/// Number clamped to `0..=1`.
#[must_use]
pub fn unit(value: f32) -> String {
    let value = if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    };
    format!("{value}")
}

/// Declarations that carry one frame's visual state.
#[must_use]
pub fn frame_declarations(frame: &OverlayFrame) -> Vec<(&'static str, String)> {
    let blur = format!("blur({})", px(frame.blur_px));
    vec![
        (
            "transition",
            if frame.instant { "none" } else { TRANSITION }.to_owned(),
        ),
        ("backdrop-filter", blur.clone()),
        ("-webkit-backdrop-filter", blur),
        ("opacity", unit(frame.opacity)),
        (
            "background-color",
            format!("rgba(0, 0, 0, {})", unit(frame.tint_alpha)),
        ),
    ]
}

/// `display` value of the warning child for `frame`.
#[must_use]
pub const fn warning_display(frame: &OverlayFrame) -> &'static str {
    if frame.warning.is_some() {
        "block"
    } else {
        "none"
    }
}
