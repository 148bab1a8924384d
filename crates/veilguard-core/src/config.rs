#![forbid(unsafe_code)]

//! Per-page guard configuration.
//!
//! One [`GuardConfig`] parameterizes everything that differs between
//! protected pages: which trigger classes are active, which trigger kinds
//! raise a user-facing alert, the release policy, timings, overlay style
//! and the ids of every node the guard injects.
//!
//! # Loading
//!
//! ```json
//! {
//!   "overlay_id": "viewer-overlay",
//!   "classes": "SCREENSHOT | DOWNLOAD",
//!   "release": "simple",
//!   "timing": { "pulse_ms": 600 }
//! }
//! ```
//!
//! ```rust,ignore
//! let config = GuardConfig::from_json_str(json)?;
//! let config = GuardConfig::profile("file_viewer")?;
//! ```
//!
//! Omitted fields take the values of [`GuardConfig::landing`].

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::overlay::OverlayStyle;
use crate::residency::ResidencyConfig;
use crate::trigger::{AggregatorConfig, AlertKind, TriggerClasses, TriggerKinds};

/// When an explicit return signal may release the overlay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Release only while residency reports the pointer inside.
    #[default]
    Strict,
    /// Release on any return signal.
    Simple,
}

/// Timer lengths, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardTiming {
    pub idle_timeout_ms: u64,
    pub reconcile_interval_ms: u64,
    pub pulse_ms: u64,
    pub alert_delay_ms: u64,
    pub double_tap_ms: u64,
}

impl Default for GuardTiming {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5_000,
            reconcile_interval_ms: 2_000,
            pulse_ms: 600,
            alert_delay_ms: 100,
            double_tap_ms: 300,
        }
    }
}

impl GuardTiming {
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    #[must_use]
    pub const fn pulse(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }

    #[must_use]
    pub const fn alert_delay(&self) -> Duration {
        Duration::from_millis(self.alert_delay_ms)
    }

    #[must_use]
    pub const fn double_tap(&self) -> Duration {
        Duration::from_millis(self.double_tap_ms)
    }
}

/// User-facing alert text per [`AlertKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertMessages {
    pub screenshot: String,
    pub fullscreen: String,
    pub download: String,
    pub downloads_panel: String,
}

impl Default for AlertMessages {
    fn default() -> Self {
        Self {
            screenshot: "Screenshots are disabled on this website.".to_owned(),
            fullscreen: "Full screen mode is disabled on this website.".to_owned(),
            download: "Downloading or saving this file is disabled on this website.".to_owned(),
            downloads_panel: "Accessing downloads is disabled on this website.".to_owned(),
        }
    }
}

impl AlertMessages {
    #[must_use]
    pub fn message(&self, kind: AlertKind) -> &str {
        match kind {
            AlertKind::Screenshot => &self.screenshot,
            AlertKind::Fullscreen => &self.fullscreen,
            AlertKind::Download => &self.download,
            AlertKind::DownloadsPanel => &self.downloads_panel,
        }
    }
}

/// Complete configuration for one protected page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Reserved id of the overlay node.
    pub overlay_id: String,
    /// Id of the injected protective stylesheet.
    pub style_id: String,
    /// Id of the injected viewport meta tag.
    pub viewport_id: String,
    /// Class toggled on the body while mounted; the stylesheet keys on it.
    pub root_class: String,
    /// Global name of the manual debug trigger, if exposed.
    pub debug_hook: Option<String>,
    pub classes: TriggerClasses,
    pub alert_kinds: TriggerKinds,
    /// Trigger kinds that return to idle once played out, if the pointer
    /// is inside.
    pub settle_kinds: TriggerKinds,
    /// Track pointer residency (boundary crossings, idle fallback,
    /// focus reconciliation). Without it the pointer always counts as inside.
    pub track_residency: bool,
    /// Ordinary clicks pulse the overlay.
    pub pulse_on_click: bool,
    pub release: ReleasePolicy,
    pub timing: GuardTiming,
    pub overlay: OverlayStyle,
    pub messages: AlertMessages,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::landing()
    }
}

impl GuardConfig {
    /// Public landing page: every trigger class, residency-gated release,
    /// alerts for print-screen and the fullscreen toggle. Key triggers
    /// settle back to idle while the pointer stays inside.
    #[must_use]
    pub fn landing() -> Self {
        Self {
            overlay_id: "anti-screenshot-overlay-landing".to_owned(),
            style_id: "landing-page-anti-screenshot-style".to_owned(),
            viewport_id: "landing-anti-screenshot-viewport".to_owned(),
            root_class: "landing-anti-screenshot".to_owned(),
            debug_hook: Some("landingPageDebugAntiScreenshot".to_owned()),
            classes: TriggerClasses::all(),
            alert_kinds: TriggerKinds::PRINT_SCREEN | TriggerKinds::FULLSCREEN,
            settle_kinds: TriggerKinds::PRINT_SCREEN
                | TriggerKinds::FULLSCREEN
                | TriggerKinds::FUNCTION_KEY
                | TriggerKinds::META_KEY
                | TriggerKinds::DANGEROUS_COMBO,
            track_residency: true,
            pulse_on_click: false,
            release: ReleasePolicy::Strict,
            timing: GuardTiming::default(),
            overlay: OverlayStyle::default(),
            messages: AlertMessages::default(),
        }
    }

    /// Protected document viewer: screenshot and download classes, click
    /// pulse, simple release without residency tracking, alerts for
    /// screenshot and download kinds.
    #[must_use]
    pub fn file_viewer() -> Self {
        Self {
            overlay_id: "anti-screenshot-overlay".to_owned(),
            style_id: "file-viewer-anti-screenshot-style".to_owned(),
            viewport_id: "file-viewer-anti-screenshot-viewport".to_owned(),
            root_class: "file-viewer-anti-screenshot".to_owned(),
            debug_hook: None,
            classes: TriggerClasses::SCREENSHOT | TriggerClasses::DOWNLOAD,
            alert_kinds: TriggerKinds::PRINT_SCREEN
                | TriggerKinds::FUNCTION_KEY
                | TriggerKinds::DANGEROUS_COMBO
                | TriggerKinds::MULTI_TOUCH
                | TriggerKinds::CONTEXT_MENU,
            settle_kinds: TriggerKinds::empty(),
            track_residency: false,
            pulse_on_click: true,
            release: ReleasePolicy::Simple,
            timing: GuardTiming::default(),
            overlay: OverlayStyle::default(),
            messages: AlertMessages::default(),
        }
    }

    /// Built-in profile by name (`"landing"`, `"file_viewer"`).
    pub fn profile(name: &str) -> Result<Self, ConfigError> {
        match name {
            "landing" => Ok(Self::landing()),
            "file_viewer" | "file-viewer" => Ok(Self::file_viewer()),
            other => Err(ConfigError::UnknownProfile(other.to_owned())),
        }
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Apply a partial JSON object on top of this config. Nested objects
    /// merge key by key; any other value replaces the field.
    pub fn with_json_overrides(&self, s: &str) -> Result<Self, ConfigError> {
        let overrides: serde_json::Value = serde_json::from_str(s).map_err(ConfigError::Json)?;
        let mut merged = serde_json::to_value(self).map_err(ConfigError::Json)?;
        merge_json(&mut merged, overrides);
        serde_json::from_value(merged).map_err(ConfigError::Json)
    }

    /// Load from a TOML string.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Settings for the trigger aggregator.
    #[must_use]
    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            classes: self.classes,
            alert_kinds: self.alert_kinds,
            double_tap_window: self.timing.double_tap(),
        }
    }

    /// Settings for the residency tracker.
    #[must_use]
    pub fn residency(&self) -> ResidencyConfig {
        ResidencyConfig {
            idle_timeout: self.timing.idle_timeout(),
            reconcile_interval: self.timing.reconcile_interval(),
        }
    }

    /// Validate all parameters.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let ids = [
            ("overlay_id", &self.overlay_id),
            ("style_id", &self.style_id),
            ("viewport_id", &self.viewport_id),
            ("root_class", &self.root_class),
        ];
        for (name, value) in ids {
            if value.trim().is_empty() {
                errors.push(format!("{name} must not be empty"));
            }
        }
        for (i, (a_name, a)) in ids.iter().enumerate().take(3) {
            for (b_name, b) in ids.iter().take(3).skip(i + 1) {
                if !a.is_empty() && a == b {
                    errors.push(format!("{a_name} and {b_name} must differ, both are {a:?}"));
                }
            }
        }
        if let Some(hook) = &self.debug_hook
            && hook.trim().is_empty()
        {
            errors.push("debug_hook must not be empty when set".into());
        }

        let timings = [
            ("timing.idle_timeout_ms", self.timing.idle_timeout_ms),
            ("timing.reconcile_interval_ms", self.timing.reconcile_interval_ms),
            ("timing.pulse_ms", self.timing.pulse_ms),
            ("timing.double_tap_ms", self.timing.double_tap_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                errors.push(format!("{name} must be > 0"));
            }
        }

        let style = &self.overlay;
        if style.baseline_blur_px < 0.0 || style.max_blur_px < style.baseline_blur_px {
            errors.push(format!(
                "overlay blur must satisfy 0 <= baseline <= max, got {} / {}",
                style.baseline_blur_px, style.max_blur_px
            ));
        }
        if !(0.0..1.0).contains(&style.baseline_opacity) {
            errors.push(format!(
                "overlay.baseline_opacity must be in [0, 1), got {}",
                style.baseline_opacity
            ));
        }
        for (name, value) in [
            ("overlay.baseline_tint", style.baseline_tint),
            ("overlay.max_tint", style.max_tint),
            ("overlay.fallback_tint", style.fallback_tint),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if style.max_tint < style.baseline_tint || style.fallback_tint < style.baseline_tint {
            errors.push("overlay tints must not be below overlay.baseline_tint".into());
        }

        errors
    }

    /// Consume and return `self` if [`Self::validate`] finds nothing.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                merge_json(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}
