#![forbid(unsafe_code)]

//! Host-neutral encoding of the browser signals the guard consumes.
//!
//! The host converts each DOM event into one [`RawSignal`] before handing it
//! to [`crate::ProtectionGuard::handle`]. Keyboard signals keep all three
//! identifying fields (`key`, numeric `key_code`, `code`) because browsers
//! disagree on which of them is populated for keys like PrintScreen.
//!
//! Signals serialize with a snake_case `kind` tag so scenarios can be
//! recorded and replayed as JSON.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Modifier keys held during a keyboard signal.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const ALT   = 0b0010;
        const CTRL  = 0b0100;
        const META  = 0b1000;
    }
}

impl Modifiers {
    /// Ctrl on most platforms, Cmd on macOS.
    #[must_use]
    pub const fn has_command(self) -> bool {
        self.intersects(Self::CTRL.union(Self::META))
    }
}

/// Phase for key signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Down,
    Up,
}

/// One keyboard event as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignal {
    pub phase: KeyPhase,
    /// DOM `key` value (`"PrintScreen"`, `"s"`, `"F11"`, ...).
    #[serde(default)]
    pub key: String,
    /// Legacy numeric `keyCode`; `0` when the platform did not report one.
    #[serde(default)]
    pub key_code: u32,
    /// DOM `code` value (`"KeyS"`, `"Digit3"`, ...).
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub mods: Modifiers,
    #[serde(default)]
    pub repeat: bool,
}

impl KeySignal {
    /// Key-down with all three identifying fields.
    #[must_use]
    pub fn down(key: &str, key_code: u32, code: &str, mods: Modifiers) -> Self {
        Self {
            phase: KeyPhase::Down,
            key: key.to_owned(),
            key_code,
            code: code.to_owned(),
            mods,
            repeat: false,
        }
    }

    /// Key-up with all three identifying fields.
    #[must_use]
    pub fn up(key: &str, key_code: u32, code: &str, mods: Modifiers) -> Self {
        Self {
            phase: KeyPhase::Up,
            ..Self::down(key, key_code, code, mods)
        }
    }

    /// Mark this signal as an auto-repeat.
    #[must_use]
    pub fn repeated(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Identity of the physical key, used to pair key-down with key-up.
    #[must_use]
    pub fn identity(&self) -> String {
        if !self.code.is_empty() {
            return self.code.clone();
        }
        if !self.key.is_empty() {
            return self.key.to_ascii_lowercase();
        }
        format!("#{}", self.key_code)
    }

    /// Lower-cased letter for this key, from `key` or from a `KeyX` code.
    #[must_use]
    pub fn letter(&self) -> Option<char> {
        single_char(&self.key)
            .filter(char::is_ascii_alphabetic)
            .map(|c| c.to_ascii_lowercase())
            .or_else(|| {
                self.code
                    .strip_prefix("Key")
                    .and_then(single_char)
                    .map(|c| c.to_ascii_lowercase())
            })
    }

    /// Digit for this key, from `key` or from a `DigitN` code.
    ///
    /// The code fallback matters for macOS shortcuts where Shift turns `3`
    /// into `#` in the `key` field.
    #[must_use]
    pub fn digit(&self) -> Option<char> {
        single_char(&self.key)
            .filter(char::is_ascii_digit)
            .or_else(|| self.code.strip_prefix("Digit").and_then(single_char))
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let first = chars.next()?;
    chars.next().is_none().then_some(first)
}

/// Pointer button and movement signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerAction {
    Down,
    Up,
    Click,
    Move,
}

/// Window-boundary crossing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Leave,
    Enter,
}

/// Where the secondary (`relatedTarget`) node of a boundary event lies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedTarget {
    /// No related node: the pointer crossed the window edge.
    Absent,
    /// The related node is inside the root element (internal move).
    Inside,
    /// The related node exists but is not under the root element.
    Outside,
}

impl RelatedTarget {
    /// Whether this crossing is a genuine window-boundary crossing.
    #[must_use]
    pub const fn is_window_boundary(self) -> bool {
        !matches!(self, Self::Inside)
    }
}

/// Phase for touch signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchPhase {
    Start,
    Move,
    End,
    Cancel,
}

/// One host signal, already stripped of platform objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSignal {
    Key(KeySignal),
    Pointer {
        action: PointerAction,
    },
    Boundary {
        boundary: BoundaryKind,
        related: RelatedTarget,
    },
    Touch {
        phase: TouchPhase,
        /// Contacts currently on the surface (`touches.length`).
        touches: u32,
        /// Contacts on the event target (`targetTouches.length`).
        #[serde(default)]
        target_touches: u32,
    },
    Focus {
        focused: bool,
    },
    Visibility {
        hidden: bool,
    },
    FullscreenChange,
    Copy,
    ContextMenu,
    Orientation,
    /// Manual trigger from the global debug hook.
    DebugHook,
}

impl RawSignal {
    /// Stable short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Key(key) => match key.phase {
                KeyPhase::Down => "key_down",
                KeyPhase::Up => "key_up",
            },
            Self::Pointer { action } => match action {
                PointerAction::Down => "pointer_down",
                PointerAction::Up => "pointer_up",
                PointerAction::Click => "click",
                PointerAction::Move => "pointer_move",
            },
            Self::Boundary { boundary, .. } => match boundary {
                BoundaryKind::Leave => "pointer_leave",
                BoundaryKind::Enter => "pointer_enter",
            },
            Self::Touch { phase, .. } => match phase {
                TouchPhase::Start => "touch_start",
                TouchPhase::Move => "touch_move",
                TouchPhase::End => "touch_end",
                TouchPhase::Cancel => "touch_cancel",
            },
            Self::Focus { focused: true } => "focus",
            Self::Focus { focused: false } => "blur",
            Self::Visibility { hidden: true } => "visibility_hidden",
            Self::Visibility { hidden: false } => "visibility_visible",
            Self::FullscreenChange => "fullscreen_change",
            Self::Copy => "copy",
            Self::ContextMenu => "context_menu",
            Self::Orientation => "orientation_change",
            Self::DebugHook => "debug_hook",
        }
    }

    /// Shorthand for a key-down signal.
    #[must_use]
    pub fn key_down(key: &str, key_code: u32, code: &str, mods: Modifiers) -> Self {
        Self::Key(KeySignal::down(key, key_code, code, mods))
    }

    /// Shorthand for a key-up signal.
    #[must_use]
    pub fn key_up(key: &str, key_code: u32, code: &str, mods: Modifiers) -> Self {
        Self::Key(KeySignal::up(key, key_code, code, mods))
    }

    /// Shorthand for a boundary crossing.
    #[must_use]
    pub const fn boundary(boundary: BoundaryKind, related: RelatedTarget) -> Self {
        Self::Boundary { boundary, related }
    }

    /// Shorthand for a touch signal where every contact is on the target.
    #[must_use]
    pub const fn touch(phase: TouchPhase, touches: u32) -> Self {
        Self::Touch {
            phase,
            touches,
            target_touches: touches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn letter_falls_back_to_code() {
        let key = KeySignal::down("ß", 83, "KeyS", Modifiers::ALT);
        assert_eq!(key.letter(), Some('s'));
        let key = KeySignal::down("S", 83, "", Modifiers::SHIFT);
        assert_eq!(key.letter(), Some('s'));
        let key = KeySignal::down("Enter", 13, "Enter", Modifiers::empty());
        assert_eq!(key.letter(), None);
    }

    #[test]
    fn digit_survives_shifted_key_value() {
        let key = KeySignal::down("#", 51, "Digit3", Modifiers::META | Modifiers::SHIFT);
        assert_eq!(key.digit(), Some('3'));
    }

    #[test]
    fn identity_prefers_code_then_key_then_key_code() {
        assert_eq!(
            KeySignal::down("PrintScreen", 44, "PrintScreen", Modifiers::empty()).identity(),
            "PrintScreen"
        );
        assert_eq!(
            KeySignal::down("S", 83, "", Modifiers::empty()).identity(),
            "s"
        );
        assert_eq!(
            KeySignal::down("", 44, "", Modifiers::empty()).identity(),
            "#44"
        );
    }

    #[test]
    fn only_inside_related_target_is_internal() {
        assert!(RelatedTarget::Absent.is_window_boundary());
        assert!(RelatedTarget::Outside.is_window_boundary());
        assert!(!RelatedTarget::Inside.is_window_boundary());
    }

    #[test]
    fn signal_json_uses_kind_tag() {
        let signal = RawSignal::boundary(BoundaryKind::Leave, RelatedTarget::Absent);
        let json = serde_json::to_string(&signal).expect("serialize");
        assert_eq!(
            json,
            r#"{"kind":"boundary","boundary":"leave","related":"absent"}"#
        );

        let key: RawSignal = serde_json::from_str(
            r#"{"kind":"key","phase":"down","key":"s","code":"KeyS","mods":"CTRL"}"#,
        )
        .expect("deserialize");
        assert_eq!(key, RawSignal::key_down("s", 0, "KeyS", Modifiers::CTRL));
    }
}
