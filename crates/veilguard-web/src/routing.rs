#![forbid(unsafe_code)]

//! DOM event to [`RawSignal`] routing.
//!
//! The DOM host reads the fields it needs off the platform event into an
//! [`EventFacts`]; [`signal_for`] then builds the signal for the listener's
//! [`SignalRoute`]. Fields a route does not use are ignored.

use veilguard_core::{KeySignal, Modifiers, RawSignal, RelatedTarget, SignalRoute};

/// Plain values extracted from one DOM event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFacts {
    pub key: String,
    pub key_code: u32,
    pub code: String,
    pub mods: Modifiers,
    pub repeat: bool,
    pub related: Option<RelatedTarget>,
    pub touches: u32,
    pub target_touches: u32,
    pub hidden: bool,
}

/// Modifier flags from the four DOM booleans.
#[must_use]
pub fn modifiers(shift: bool, alt: bool, ctrl: bool, meta: bool) -> Modifiers {
    let mut mods = Modifiers::empty();
    mods.set(Modifiers::SHIFT, shift);
    mods.set(Modifiers::ALT, alt);
    mods.set(Modifiers::CTRL, ctrl);
    mods.set(Modifiers::META, meta);
    mods
}

/// Where a `relatedTarget` lies, given whether it exists and whether the
/// root element contains it.
#[must_use]
pub const fn related_target(present: bool, contained: bool) -> RelatedTarget {
    match (present, contained) {
        (false, _) => RelatedTarget::Absent,
        (true, true) => RelatedTarget::Inside,
        (true, false) => RelatedTarget::Outside,
    }
}

/// Build the signal a listener registered for `route` reports.
#[must_use]
pub fn signal_for(route: SignalRoute, facts: &EventFacts) -> RawSignal {
    match route {
        SignalRoute::Key(phase) => RawSignal::Key(KeySignal {
            phase,
            key: facts.key.clone(),
            key_code: facts.key_code,
            code: facts.code.clone(),
            mods: facts.mods,
            repeat: facts.repeat,
        }),
        SignalRoute::Pointer(action) => RawSignal::Pointer { action },
        SignalRoute::Boundary(boundary) => {
            RawSignal::boundary(boundary, facts.related.unwrap_or(RelatedTarget::Absent))
        }
        SignalRoute::Touch(phase) => RawSignal::Touch {
            phase,
            touches: facts.touches,
            target_touches: facts.target_touches,
        },
        SignalRoute::Focus(focused) => RawSignal::Focus { focused },
        SignalRoute::Visibility => RawSignal::Visibility {
            hidden: facts.hidden,
        },
        SignalRoute::Fullscreen => RawSignal::FullscreenChange,
        SignalRoute::Copy => RawSignal::Copy,
        SignalRoute::ContextMenu => RawSignal::ContextMenu,
        SignalRoute::Orientation => RawSignal::Orientation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use veilguard_core::{
        BoundaryKind, GuardConfig, KeyPhase, PointerAction, TouchPhase, required_listeners,
    };

    #[test]
    fn key_route_copies_every_identifier() {
        let facts = EventFacts {
            key: "s".to_owned(),
            key_code: 83,
            code: "KeyS".to_owned(),
            mods: modifiers(false, false, true, false),
            repeat: true,
            ..EventFacts::default()
        };
        let signal = signal_for(SignalRoute::Key(KeyPhase::Down), &facts);
        assert_eq!(
            signal,
            RawSignal::Key(KeySignal::down("s", 83, "KeyS", Modifiers::CTRL).repeated())
        );
    }

    #[test]
    fn modifiers_map_each_flag() {
        assert_eq!(modifiers(false, false, false, false), Modifiers::empty());
        assert_eq!(
            modifiers(true, true, true, true),
            Modifiers::SHIFT | Modifiers::ALT | Modifiers::CTRL | Modifiers::META
        );
        assert!(modifiers(false, false, false, true).has_command());
    }

    #[test]
    fn related_target_classification() {
        assert_eq!(related_target(false, false), RelatedTarget::Absent);
        assert_eq!(related_target(false, true), RelatedTarget::Absent);
        assert_eq!(related_target(true, true), RelatedTarget::Inside);
        assert_eq!(related_target(true, false), RelatedTarget::Outside);
    }

    #[test]
    fn boundary_without_related_is_window_edge() {
        let signal = signal_for(
            SignalRoute::Boundary(BoundaryKind::Leave),
            &EventFacts::default(),
        );
        assert_eq!(
            signal,
            RawSignal::boundary(BoundaryKind::Leave, RelatedTarget::Absent)
        );
    }

    #[test]
    fn touch_route_keeps_both_counts() {
        let facts = EventFacts {
            touches: 3,
            target_touches: 2,
            ..EventFacts::default()
        };
        assert_eq!(
            signal_for(SignalRoute::Touch(TouchPhase::Start), &facts),
            RawSignal::Touch {
                phase: TouchPhase::Start,
                touches: 3,
                target_touches: 2,
            }
        );
    }

    #[test]
    fn visibility_reads_hidden_flag() {
        let facts = EventFacts {
            hidden: true,
            ..EventFacts::default()
        };
        assert_eq!(
            signal_for(SignalRoute::Visibility, &facts),
            RawSignal::Visibility { hidden: true }
        );
    }

    #[test]
    fn every_registered_route_produces_a_matching_signal() {
        for config in [GuardConfig::landing(), GuardConfig::file_viewer()] {
            for spec in required_listeners(&config) {
                let signal = signal_for(spec.route, &EventFacts::default());
                let consistent = match (spec.route, &signal) {
                    (SignalRoute::Key(phase), RawSignal::Key(key)) => key.phase == phase,
                    (SignalRoute::Pointer(a), RawSignal::Pointer { action }) => a == *action,
                    (SignalRoute::Boundary(b), RawSignal::Boundary { boundary, .. }) => {
                        b == *boundary
                    }
                    (SignalRoute::Touch(p), RawSignal::Touch { phase, .. }) => p == *phase,
                    (SignalRoute::Focus(f), RawSignal::Focus { focused }) => f == *focused,
                    (SignalRoute::Visibility, RawSignal::Visibility { .. })
                    | (SignalRoute::Fullscreen, RawSignal::FullscreenChange)
                    | (SignalRoute::Copy, RawSignal::Copy)
                    | (SignalRoute::ContextMenu, RawSignal::ContextMenu)
                    | (SignalRoute::Orientation, RawSignal::Orientation) => true,
                    _ => false,
                };
                assert!(consistent, "{} routed to {}", spec.event, signal.name());
            }
        }
    }

    #[test]
    fn pointer_route() {
        assert_eq!(
            signal_for(SignalRoute::Pointer(PointerAction::Click), &EventFacts::default()),
            RawSignal::Pointer {
                action: PointerAction::Click
            }
        );
    }
}
