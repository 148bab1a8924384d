#![forbid(unsafe_code)]

//! Single topmost overlay node and its visual state.
//!
//! The renderer never touches the document itself: it computes an
//! [`OverlayFrame`] and hands it to the host. Intensity maps linearly from
//! the configured baseline (level 0) to the configured maximum (level 1).
//!
//! When the host has no `backdrop-filter` support the blur component is
//! dropped and the tint ramps to an opaque fallback instead, so the overlay
//! still obscures content.

use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::host::Host;

/// Visual parameters of the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub baseline_blur_px: f32,
    pub max_blur_px: f32,
    pub baseline_opacity: f32,
    pub baseline_tint: f32,
    pub max_tint: f32,
    /// Tint used at level 1 when blur is unavailable.
    pub fallback_tint: f32,
    /// Centered message shown at level 1.
    pub warning_text: Option<String>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            baseline_blur_px: 0.0,
            max_blur_px: 30.0,
            baseline_opacity: 0.05,
            baseline_tint: 0.05,
            max_tint: 0.7,
            fallback_tint: 0.95,
            warning_text: Some("Screenshots are disabled on this website.".to_owned()),
        }
    }
}

/// Opacity of the overlay at level 1.
pub const MAX_OPACITY: f32 = 1.0;

/// Declarative overlay state handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayFrame {
    pub blur_px: f32,
    pub opacity: f32,
    /// Alpha of the black background tint.
    pub tint_alpha: f32,
    pub warning: Option<String>,
    /// Apply with transitions disabled, then re-enable them on the next frame.
    pub instant: bool,
}

/// Handle to the overlay node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayHandle {
    pub element_id: String,
    /// Whether this renderer has ensured the node since the last destroy.
    pub created: bool,
}

/// Linear interpolation that hits both endpoints exactly.
fn lerp(from: f32, to: f32, t: f32) -> f32 {
    if t <= 0.0 {
        from
    } else if t >= 1.0 {
        to
    } else {
        from + (to - from) * t
    }
}

/// Owner of the overlay node's visual state.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    handle: OverlayHandle,
    style: OverlayStyle,
    level: f32,
    blur_supported: bool,
}

impl OverlayRenderer {
    #[must_use]
    pub fn new(element_id: impl Into<String>, style: OverlayStyle) -> Self {
        Self {
            handle: OverlayHandle {
                element_id: element_id.into(),
                created: false,
            },
            style,
            level: 0.0,
            blur_supported: true,
        }
    }

    #[must_use]
    pub const fn handle(&self) -> &OverlayHandle {
        &self.handle
    }

    #[must_use]
    pub const fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Last applied level in `0.0..=1.0`.
    #[must_use]
    pub const fn level(&self) -> f32 {
        self.level
    }

    /// Whether frames include blur (false after a fallback was detected).
    #[must_use]
    pub const fn blur_supported(&self) -> bool {
        self.blur_supported
    }

    /// Frame for `level`, using blur or the opaque-tint fallback.
    #[must_use]
    pub fn frame(&self, level: f32, warning: Option<&str>) -> OverlayFrame {
        let level = level.clamp(0.0, 1.0);
        let style = &self.style;
        let (blur_px, tint_alpha) = if self.blur_supported {
            (
                lerp(style.baseline_blur_px, style.max_blur_px, level),
                lerp(style.baseline_tint, style.max_tint, level),
            )
        } else {
            (0.0, lerp(style.baseline_tint, style.fallback_tint, level))
        };
        let at_max = level >= 1.0;
        OverlayFrame {
            blur_px,
            opacity: lerp(style.baseline_opacity, MAX_OPACITY, level),
            tint_alpha,
            warning: warning.filter(|_| at_max).map(str::to_owned),
            instant: at_max,
        }
    }

    /// Look the node up by id and create it at baseline if absent.
    pub fn ensure<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<&OverlayHandle, HostError> {
        if !host.overlay_exists(&self.handle.element_id) {
            self.blur_supported = host.supports_backdrop_filter();
            let baseline = OverlayFrame {
                instant: false,
                ..self.frame(0.0, None)
            };
            host.create_overlay(&self.handle.element_id, &baseline)?;
            self.level = 0.0;
            tracing::debug!(
                id = %self.handle.element_id,
                blur_supported = self.blur_supported,
                "overlay created"
            );
        }
        self.handle.created = true;
        Ok(&self.handle)
    }

    /// Apply `level`, re-creating the node if it went missing.
    ///
    /// A jump to level 1 is marked `instant`; lower levels keep transitions
    /// so release may fade.
    pub fn set_intensity<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        level: f32,
        warning: Option<&str>,
    ) -> Result<OverlayFrame, HostError> {
        self.ensure(host)?;
        let frame = self.frame(level, warning);
        host.apply_overlay(&self.handle.element_id, &frame)?;
        self.level = level.clamp(0.0, 1.0);
        Ok(frame)
    }

    /// Reset to baseline and drop the warning text.
    pub fn clear<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<OverlayFrame, HostError> {
        self.set_intensity(host, 0.0, None)
    }

    /// Remove the node. Returns whether a node was removed.
    pub fn destroy<H: Host + ?Sized>(&mut self, host: &mut H) -> bool {
        self.handle.created = false;
        self.level = 0.0;
        host.remove_overlay(&self.handle.element_id)
    }
}
