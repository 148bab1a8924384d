#![forbid(unsafe_code)]

//! Trigger classification: raw host signals in, canonical [`TriggerEvent`]s out.
//!
//! # Recognition
//!
//! Keys are matched on every identifying field the platform may populate
//! (`key`, legacy `key_code`, `code`); a print-screen press is recognized
//! if any one of them matches. Shortcut letters and digits fall back to the
//! `code` field so Shift/Alt layouts do not hide them.
//!
//! # Invariants
//!
//! 1. A signal of a disabled [`TriggerClass`] is never classified and never
//!    suppressed.
//! 2. A discrete key press yields at most one alert: key-down latches the
//!    physical key, repeats and the paired key-up stay silent, and a key-up
//!    without a latched key-down alerts once.
//! 3. A copy gesture is never classified while the host reports an active
//!    text selection.
//! 4. Focus loss clears every key latch so no key is stuck.

use core::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::signal::{KeyPhase, KeySignal, Modifiers, RawSignal, TouchPhase};

/// Canonical trigger kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PrintScreen,
    Fullscreen,
    FunctionKey,
    MetaKey,
    DangerousCombo,
    MultiTouch,
    VisibilityHidden,
    WindowBlur,
    ContextMenu,
    Copy,
    VolumeKey,
    Orientation,
}

impl TriggerKind {
    pub const ALL: [Self; 12] = [
        Self::PrintScreen,
        Self::Fullscreen,
        Self::FunctionKey,
        Self::MetaKey,
        Self::DangerousCombo,
        Self::MultiTouch,
        Self::VisibilityHidden,
        Self::WindowBlur,
        Self::ContextMenu,
        Self::Copy,
        Self::VolumeKey,
        Self::Orientation,
    ];

    /// The single-bit set for this kind.
    #[must_use]
    pub const fn flag(self) -> TriggerKinds {
        match self {
            Self::PrintScreen => TriggerKinds::PRINT_SCREEN,
            Self::Fullscreen => TriggerKinds::FULLSCREEN,
            Self::FunctionKey => TriggerKinds::FUNCTION_KEY,
            Self::MetaKey => TriggerKinds::META_KEY,
            Self::DangerousCombo => TriggerKinds::DANGEROUS_COMBO,
            Self::MultiTouch => TriggerKinds::MULTI_TOUCH,
            Self::VisibilityHidden => TriggerKinds::VISIBILITY_HIDDEN,
            Self::WindowBlur => TriggerKinds::WINDOW_BLUR,
            Self::ContextMenu => TriggerKinds::CONTEXT_MENU,
            Self::Copy => TriggerKinds::COPY,
            Self::VolumeKey => TriggerKinds::VOLUME_KEY,
            Self::Orientation => TriggerKinds::ORIENTATION,
        }
    }

    /// Class of this kind. [`Self::DangerousCombo`] reports its usual class;
    /// snip shortcuts are reclassified as screenshots at recognition time.
    #[must_use]
    pub const fn default_class(self) -> TriggerClass {
        match self {
            Self::PrintScreen
            | Self::FunctionKey
            | Self::MetaKey
            | Self::MultiTouch
            | Self::VolumeKey => TriggerClass::Screenshot,
            Self::Fullscreen => TriggerClass::Fullscreen,
            Self::VisibilityHidden | Self::WindowBlur | Self::Orientation => TriggerClass::Focus,
            Self::DangerousCombo | Self::ContextMenu | Self::Copy => TriggerClass::Download,
        }
    }

    /// Stable label for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PrintScreen => "print_screen",
            Self::Fullscreen => "fullscreen",
            Self::FunctionKey => "function_key",
            Self::MetaKey => "meta_key",
            Self::DangerousCombo => "dangerous_combo",
            Self::MultiTouch => "multi_touch",
            Self::VisibilityHidden => "visibility_hidden",
            Self::WindowBlur => "window_blur",
            Self::ContextMenu => "context_menu",
            Self::Copy => "copy",
            Self::VolumeKey => "volume_key",
            Self::Orientation => "orientation",
        }
    }
}

bitflags! {
    /// Set of [`TriggerKind`]s, used for per-profile alert selection.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TriggerKinds: u16 {
        const PRINT_SCREEN      = 1 << 0;
        const FULLSCREEN        = 1 << 1;
        const FUNCTION_KEY      = 1 << 2;
        const META_KEY          = 1 << 3;
        const DANGEROUS_COMBO   = 1 << 4;
        const MULTI_TOUCH       = 1 << 5;
        const VISIBILITY_HIDDEN = 1 << 6;
        const WINDOW_BLUR       = 1 << 7;
        const CONTEXT_MENU      = 1 << 8;
        const COPY              = 1 << 9;
        const VOLUME_KEY        = 1 << 10;
        const ORIENTATION       = 1 << 11;
    }
}

/// Coarse trigger class, the unit of per-page enablement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerClass {
    Screenshot,
    Fullscreen,
    Focus,
    Download,
}

impl TriggerClass {
    #[must_use]
    pub const fn flag(self) -> TriggerClasses {
        match self {
            Self::Screenshot => TriggerClasses::SCREENSHOT,
            Self::Fullscreen => TriggerClasses::FULLSCREEN,
            Self::Focus => TriggerClasses::FOCUS,
            Self::Download => TriggerClasses::DOWNLOAD,
        }
    }
}

bitflags! {
    /// Set of enabled [`TriggerClass`]es.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TriggerClasses: u8 {
        const SCREENSHOT = 0b0001;
        const FULLSCREEN = 0b0010;
        const FOCUS      = 0b0100;
        const DOWNLOAD   = 0b1000;
    }
}

/// Category of the user-facing deterrence message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Screenshot,
    Fullscreen,
    Download,
    DownloadsPanel,
}

/// One classified trigger. Consumed synchronously, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub class: TriggerClass,
    /// Host must call `preventDefault`/`stopPropagation` in the capture phase.
    pub suppress: bool,
    /// Alert to queue, already filtered by profile and press latching.
    pub alert: Option<AlertKind>,
    /// Ask the host to leave fullscreen if it is currently active.
    pub exit_fullscreen: bool,
}

/// Why a signal that looked like a trigger was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// Copy with an active text selection.
    TextSelection,
    /// The trigger's class is disabled for this page.
    ClassDisabled,
}

/// Result of classifying one raw signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Trigger(TriggerEvent),
    Allowed(AllowReason),
    Unclassified,
}

impl Classification {
    #[must_use]
    pub const fn trigger(self) -> Option<TriggerEvent> {
        match self {
            Self::Trigger(event) => Some(event),
            Self::Allowed(_) | Self::Unclassified => None,
        }
    }
}

/// Aggregator configuration, taken from [`crate::GuardConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub classes: TriggerClasses,
    pub alert_kinds: TriggerKinds,
    pub double_tap_window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LatchedKey {
    identity: String,
    kind: TriggerKind,
}

/// Recognized key trigger before class filtering.
#[derive(Debug, Clone, Copy)]
struct KeyMatch {
    kind: TriggerKind,
    class: TriggerClass,
    alert: Option<AlertKind>,
    suppress: bool,
    exit_fullscreen: bool,
}

impl KeyMatch {
    const fn new(kind: TriggerKind, alert: Option<AlertKind>) -> Self {
        Self {
            kind,
            class: kind.default_class(),
            alert,
            suppress: true,
            exit_fullscreen: false,
        }
    }

    const fn with_class(mut self, class: TriggerClass) -> Self {
        self.class = class;
        self
    }

    const fn unsuppressed(mut self) -> Self {
        self.suppress = false;
        self
    }
}

const KEY_CODE_PRINT_SCREEN: u32 = 44;
const KEY_CODE_F1: u32 = 112;
const KEY_CODE_F11: u32 = 122;
const KEY_CODE_F12: u32 = 123;
const KEY_CODES_META: [u32; 2] = [91, 92];
const KEY_CODES_VOLUME: [u32; 4] = [174, 175, 182, 183];

fn is_print_screen(key: &KeySignal) -> bool {
    key.key == "PrintScreen" || key.key_code == KEY_CODE_PRINT_SCREEN || key.code == "PrintScreen"
}

fn is_fullscreen_toggle(key: &KeySignal) -> bool {
    key.key == "F11" || key.key_code == KEY_CODE_F11 || key.code == "F11"
}

fn parse_function_key(s: &str) -> Option<u8> {
    let rest = s.strip_prefix('F')?;
    rest.parse::<u8>().ok().filter(|n| (1..=24).contains(n))
}

fn function_key_number(key: &KeySignal) -> Option<u8> {
    parse_function_key(&key.key)
        .or_else(|| parse_function_key(&key.code))
        .or_else(|| {
            (KEY_CODE_F1..=KEY_CODE_F12)
                .contains(&key.key_code)
                .then(|| (key.key_code - KEY_CODE_F1 + 1) as u8)
        })
}

fn is_meta_key(key: &KeySignal) -> bool {
    matches!(key.key.as_str(), "Meta" | "OS")
        || KEY_CODES_META.contains(&key.key_code)
        || matches!(key.code.as_str(), "MetaLeft" | "MetaRight" | "OSLeft" | "OSRight")
}

fn is_volume_key(key: &KeySignal) -> bool {
    matches!(
        key.key.as_str(),
        "AudioVolumeDown" | "AudioVolumeUp" | "VolumeDown" | "VolumeUp" | "Volume_Down" | "Volume_Up"
    ) || KEY_CODES_VOLUME.contains(&key.key_code)
        || matches!(key.code.as_str(), "AudioVolumeDown" | "AudioVolumeUp")
}

/// Snip / screen-recording shortcuts: Win+Shift+S, Cmd+Shift+3/4/5.
fn snip_shortcut(key: &KeySignal) -> bool {
    let mods = key.mods;
    if !(mods.contains(Modifiers::SHIFT) && mods.contains(Modifiers::META)) {
        return false;
    }
    key.letter() == Some('s') || matches!(key.digit(), Some('3' | '4' | '5'))
}

/// Save / print / source / devtools / downloads shortcuts.
fn download_or_inspect_shortcut(key: &KeySignal) -> Option<KeyMatch> {
    let mods = key.mods;
    let letter = key.letter()?;
    let shift = mods.contains(Modifiers::SHIFT);
    let alt = mods.contains(Modifiers::ALT);
    let combo = |alert| Some(KeyMatch::new(TriggerKind::DangerousCombo, alert));

    if mods.contains(Modifiers::CTRL) && shift && matches!(letter, 'i' | 'j' | 'c' | 'k') {
        return combo(None);
    }
    if mods.contains(Modifiers::META) && alt && matches!(letter, 'i' | 'j' | 'c') {
        return combo(None);
    }
    if !mods.has_command() {
        return None;
    }
    match letter {
        's' | 'p' => combo(Some(AlertKind::Download)),
        'j' if !shift => combo(Some(AlertKind::DownloadsPanel)),
        'u' => combo(None),
        _ => None,
    }
}

fn is_copy_shortcut(key: &KeySignal) -> bool {
    key.mods.has_command()
        && !key.mods.intersects(Modifiers::SHIFT | Modifiers::ALT)
        && key.letter() == Some('c')
}

/// Stateful trigger classifier.
///
/// State is limited to key latches (one alert per press) and the last
/// touch-end time (double-tap detection).
#[derive(Debug, Clone)]
pub struct TriggerAggregator {
    config: AggregatorConfig,
    latched: Vec<LatchedKey>,
    last_touch_end: Option<Duration>,
}

impl TriggerAggregator {
    #[must_use]
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            latched: Vec::with_capacity(4),
            last_touch_end: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> AggregatorConfig {
        self.config
    }

    /// Number of keys currently latched as pressed.
    #[must_use]
    pub fn latched_keys(&self) -> usize {
        self.latched.len()
    }

    /// Forget all transient state.
    pub fn reset(&mut self) {
        self.latched.clear();
        self.last_touch_end = None;
    }

    /// Classify one signal.
    ///
    /// `selection_active` is the host's answer to "is text selected right
    /// now"; it is only consulted for copy gestures.
    pub fn classify(
        &mut self,
        signal: &RawSignal,
        now: Duration,
        selection_active: bool,
    ) -> Classification {
        match signal {
            RawSignal::Key(key) => self.classify_key(key, selection_active),
            RawSignal::Touch {
                phase,
                touches,
                target_touches,
            } => self.classify_touch(*phase, *touches, *target_touches, now),
            RawSignal::Focus { focused: false } => {
                self.latched.clear();
                self.emit(KeyMatch::new(TriggerKind::WindowBlur, None).unsuppressed())
            }
            RawSignal::Visibility { hidden: true } => {
                self.emit(KeyMatch::new(TriggerKind::VisibilityHidden, None).unsuppressed())
            }
            RawSignal::Orientation => {
                self.emit(KeyMatch::new(TriggerKind::Orientation, None).unsuppressed())
            }
            RawSignal::FullscreenChange => {
                let mut hit = KeyMatch::new(TriggerKind::Fullscreen, None).unsuppressed();
                hit.exit_fullscreen = true;
                self.emit(hit)
            }
            RawSignal::ContextMenu => self.emit(KeyMatch::new(
                TriggerKind::ContextMenu,
                Some(AlertKind::Download),
            )),
            RawSignal::Copy => {
                if selection_active {
                    return Classification::Allowed(AllowReason::TextSelection);
                }
                self.emit(KeyMatch::new(TriggerKind::Copy, None))
            }
            RawSignal::Pointer { .. }
            | RawSignal::Boundary { .. }
            | RawSignal::Focus { focused: true }
            | RawSignal::Visibility { hidden: false }
            | RawSignal::DebugHook => Classification::Unclassified,
        }
    }

    fn classify_key(&mut self, key: &KeySignal, selection_active: bool) -> Classification {
        let Some(hit) = Self::recognize_key(key) else {
            if key.phase == KeyPhase::Up {
                self.release_latch(&key.identity());
            }
            return Classification::Unclassified;
        };
        if hit.kind == TriggerKind::Copy && selection_active {
            return Classification::Allowed(AllowReason::TextSelection);
        }
        if !self.config.classes.contains(hit.class.flag()) {
            if key.phase == KeyPhase::Up {
                self.release_latch(&key.identity());
            }
            return Classification::Allowed(AllowReason::ClassDisabled);
        }

        let identity = key.identity();
        let first_of_press = match key.phase {
            KeyPhase::Down => {
                let already = self.latched.iter().any(|l| l.identity == identity);
                if !already {
                    self.latched.push(LatchedKey {
                        identity,
                        kind: hit.kind,
                    });
                }
                !already && !key.repeat
            }
            // Paired key-up stays silent; an unpaired one is the only
            // signal some platforms send for print-screen.
            KeyPhase::Up => !self.release_latch(&identity),
        };

        let hit = if first_of_press {
            hit
        } else {
            KeyMatch { alert: None, ..hit }
        };
        self.emit(hit)
    }

    fn recognize_key(key: &KeySignal) -> Option<KeyMatch> {
        if is_print_screen(key) {
            return Some(KeyMatch::new(
                TriggerKind::PrintScreen,
                Some(AlertKind::Screenshot),
            ));
        }
        if is_fullscreen_toggle(key) {
            let mut hit = KeyMatch::new(TriggerKind::Fullscreen, Some(AlertKind::Fullscreen));
            hit.exit_fullscreen = true;
            return Some(hit);
        }
        if function_key_number(key).is_some() {
            return Some(KeyMatch::new(
                TriggerKind::FunctionKey,
                Some(AlertKind::Screenshot),
            ));
        }
        if is_volume_key(key) {
            return Some(KeyMatch::new(TriggerKind::VolumeKey, None).unsuppressed());
        }
        if is_meta_key(key) {
            return Some(KeyMatch::new(TriggerKind::MetaKey, None));
        }
        if snip_shortcut(key) {
            return Some(
                KeyMatch::new(TriggerKind::DangerousCombo, Some(AlertKind::Screenshot))
                    .with_class(TriggerClass::Screenshot),
            );
        }
        if is_copy_shortcut(key) {
            return Some(KeyMatch::new(TriggerKind::Copy, None));
        }
        download_or_inspect_shortcut(key)
    }

    fn classify_touch(
        &mut self,
        phase: TouchPhase,
        touches: u32,
        target_touches: u32,
        now: Duration,
    ) -> Classification {
        match phase {
            TouchPhase::Start | TouchPhase::Move if touches >= 2 => {
                // Three-finger swipe is the common mobile screenshot gesture.
                let alert = (phase == TouchPhase::Start && touches >= 3)
                    .then_some(AlertKind::Screenshot);
                self.emit(KeyMatch::new(TriggerKind::MultiTouch, alert))
            }
            TouchPhase::End => {
                let double_tap = self
                    .last_touch_end
                    .is_some_and(|last| now.saturating_sub(last) <= self.config.double_tap_window);
                self.last_touch_end = Some(now);
                if double_tap || touches >= 2 || target_touches >= 2 {
                    self.emit(KeyMatch::new(TriggerKind::MultiTouch, None).unsuppressed())
                } else {
                    Classification::Unclassified
                }
            }
            TouchPhase::Start | TouchPhase::Move | TouchPhase::Cancel => {
                Classification::Unclassified
            }
        }
    }

    fn release_latch(&mut self, identity: &str) -> bool {
        let before = self.latched.len();
        self.latched.retain(|l| l.identity != identity);
        self.latched.len() != before
    }

    fn emit(&self, hit: KeyMatch) -> Classification {
        if !self.config.classes.contains(hit.class.flag()) {
            return Classification::Allowed(AllowReason::ClassDisabled);
        }
        let alert = hit
            .alert
            .filter(|_| self.config.alert_kinds.contains(hit.kind.flag()));
        Classification::Trigger(TriggerEvent {
            kind: hit.kind,
            class: hit.class,
            suppress: hit.suppress,
            alert,
            exit_fullscreen: hit.exit_fullscreen,
        })
    }
}
