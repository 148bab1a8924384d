#![forbid(unsafe_code)]

//! Property tests for guard-level invariants under arbitrary signal and
//! tick interleavings:
//!
//! 1. At most one overlay node ever exists.
//! 2. `Active` exactly when the overlay is at full opacity (and max blur
//!    when blur is supported); `Idle` exactly at baseline.
//! 3. Under the strict release policy, a non-pulse release only happens
//!    with the pointer inside, and the pointer being outside implies
//!    `Active`.
//! 4. After unmount the document is clean, whatever came before.
//! 5. Alerts never exceed the number of alerting triggers seen.

use core::time::Duration;

use proptest::prelude::*;
use veilguard_core::{
    BoundaryKind, GuardConfig, Modifiers, Phase, PointerAction, ProtectionGuard, RawSignal,
    RelatedTarget, ReleaseSignal, TouchPhase, Transition,
};
use veilguard_harness::RecordingHost;
use veilguard_harness::signal_storm::overlay_matches_phase;

#[derive(Debug, Clone, Copy)]
enum Op {
    Signal(u8),
    Tick,
    SetFocus(bool),
}

fn op_strategy() -> impl Strategy<Value = (u16, Op)> {
    let op = prop_oneof![
        6 => (0u8..18).prop_map(Op::Signal),
        2 => Just(Op::Tick),
        1 => any::<bool>().prop_map(Op::SetFocus),
    ];
    (0u16..3_000, op)
}

fn signal(choice: u8) -> RawSignal {
    let none = Modifiers::empty();
    match choice {
        0 => RawSignal::key_down("PrintScreen", 44, "PrintScreen", none),
        1 => RawSignal::key_up("PrintScreen", 44, "PrintScreen", none),
        2 => RawSignal::key_down("F11", 122, "F11", none),
        3 => RawSignal::key_down("s", 83, "KeyS", Modifiers::CTRL),
        4 => RawSignal::key_down("a", 65, "KeyA", none),
        5 => RawSignal::boundary(BoundaryKind::Leave, RelatedTarget::Absent),
        6 => RawSignal::boundary(BoundaryKind::Enter, RelatedTarget::Absent),
        7 => RawSignal::boundary(BoundaryKind::Leave, RelatedTarget::Inside),
        8 => RawSignal::Pointer {
            action: PointerAction::Move,
        },
        9 => RawSignal::Pointer {
            action: PointerAction::Click,
        },
        10 => RawSignal::touch(TouchPhase::Start, 3),
        11 => RawSignal::touch(TouchPhase::End, 0),
        12 => RawSignal::Focus { focused: false },
        13 => RawSignal::Focus { focused: true },
        14 => RawSignal::Visibility { hidden: true },
        15 => RawSignal::Visibility { hidden: false },
        16 => RawSignal::ContextMenu,
        _ => RawSignal::FullscreenChange,
    }
}

fn run(config: GuardConfig, ops: &[(u16, Op)]) -> Result<(), TestCaseError> {
    let strict_residency = config.track_residency
        && config.release == veilguard_core::ReleasePolicy::Strict
        && !config.pulse_on_click;
    let mut guard = ProtectionGuard::new(RecordingHost::new(), config);
    guard
        .mount(Duration::ZERO)
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    let mut now = Duration::ZERO;
    let mut alerting_triggers = 0usize;
    for &(gap, op) in ops {
        now += Duration::from_millis(u64::from(gap));
        match op {
            Op::Signal(choice) => {
                let dispatch = guard.handle(&signal(choice), now);
                if dispatch.trigger.and_then(|t| t.alert).is_some() {
                    alerting_triggers += 1;
                }
                if let Some(Transition::Released(reason)) = dispatch.transition
                    && reason != ReleaseSignal::PulseElapsed
                    && guard.config().release == veilguard_core::ReleasePolicy::Strict
                {
                    prop_assert!(guard.residency().inside, "released while outside");
                }
            }
            Op::Tick => {
                guard.tick(now);
            }
            Op::SetFocus(focused) => guard.host_mut().focused = focused,
        }

        prop_assert!(guard.host().overlays.len() <= 1);
        prop_assert!(overlay_matches_phase(&guard), "overlay disagrees with phase");
        if strict_residency && !guard.residency().inside {
            prop_assert_eq!(guard.state().phase, Phase::Active);
        }
        prop_assert!(guard.host().alerts.len() <= alerting_triggers);
    }

    guard
        .unmount()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert!(guard.host().is_clean());
    let late = guard.handle(&signal(0), now + Duration::from_millis(1));
    prop_assert!(!late.suppress);
    prop_assert!(guard.host().is_clean());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn landing_guard_invariants(ops in prop::collection::vec(op_strategy(), 0..120)) {
        run(GuardConfig::landing(), &ops)?;
    }

    #[test]
    fn file_viewer_guard_invariants(ops in prop::collection::vec(op_strategy(), 0..120)) {
        run(GuardConfig::file_viewer(), &ops)?;
    }

    #[test]
    fn fallback_blur_invariants(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let mut config = GuardConfig::landing();
        config.pulse_on_click = true;
        let mut guard_host = RecordingHost::new();
        guard_host.blur_supported = false;
        let mut guard = ProtectionGuard::new(guard_host, config);
        guard.mount(Duration::ZERO).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let mut now = Duration::ZERO;
        for &(gap, op) in &ops {
            now += Duration::from_millis(u64::from(gap));
            match op {
                Op::Signal(choice) => {
                    guard.handle(&signal(choice), now);
                }
                Op::Tick => {
                    guard.tick(now);
                }
                Op::SetFocus(focused) => guard.host_mut().focused = focused,
            }
            let frame = guard.host().overlay(&guard.config().overlay_id).cloned();
            prop_assert!(frame.is_some_and(|f| f.blur_px == 0.0));
            prop_assert!(overlay_matches_phase(&guard));
        }
    }
}
