#![forbid(unsafe_code)]

//! Deterministic signal storms for soak and invariant testing.
//!
//! # Burst Patterns
//!
//! | Pattern | Description |
//! |---------|-------------|
//! | [`BurstPattern::KeyStorm`] | Mix of trigger keys, plain keys and copy shortcuts, down/up paired |
//! | [`BurstPattern::PointerFlood`] | Movement with genuine and internal boundary crossings |
//! | [`BurstPattern::TouchBurst`] | Single and multi-contact touch sequences |
//! | [`BurstPattern::MixedBurst`] | Everything above plus focus, visibility and clicks |
//!
//! # JSONL Schema
//!
//! ```json
//! {"event":"storm_start","pattern":"mixed_burst","event_count":500,"seed":7}
//! {"event":"storm_complete","dispatched":500,"triggers":91,"activations":40,"max_overlays":1}
//! ```

use core::time::Duration;

use veilguard_core::testing::RecordingHost;
use veilguard_core::{
    BoundaryKind, Modifiers, PointerAction, ProtectionGuard, RawSignal, RelatedTarget,
    TouchPhase, Transition,
};

/// Pattern type for storm generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstPattern {
    KeyStorm { count: usize },
    PointerFlood { count: usize },
    TouchBurst { count: usize },
    MixedBurst { count: usize },
}

impl BurstPattern {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::KeyStorm { .. } => "key_storm",
            Self::PointerFlood { .. } => "pointer_flood",
            Self::TouchBurst { .. } => "touch_burst",
            Self::MixedBurst { .. } => "mixed_burst",
        }
    }

    const fn count(&self) -> usize {
        match *self {
            Self::KeyStorm { count }
            | Self::PointerFlood { count }
            | Self::TouchBurst { count }
            | Self::MixedBurst { count } => count,
        }
    }
}

/// Configuration for a storm.
#[derive(Debug, Clone, Copy)]
pub struct StormConfig {
    pub pattern: BurstPattern,
    pub seed: u64,
    /// Upper bound of the random gap between consecutive signals.
    pub max_gap_ms: u64,
}

impl StormConfig {
    #[must_use]
    pub const fn new(pattern: BurstPattern, seed: u64) -> Self {
        Self {
            pattern,
            seed,
            max_gap_ms: 250,
        }
    }
}

/// Simple deterministic PRNG (xorshift64) for reproducible storms.
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    fn below(&mut self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        self.next() % max
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        let idx = usize::try_from(self.below(items.len() as u64)).unwrap_or(0);
        &items[idx]
    }
}

/// Generated storm: timestamped signals in order.
#[derive(Debug, Clone)]
pub struct SignalStorm {
    pub signals: Vec<(Duration, RawSignal)>,
    pub pattern_name: &'static str,
    pub seed: u64,
}

type KeyFields = (&'static str, u32, &'static str, Modifiers);

const TRIGGER_KEYS: [KeyFields; 6] = [
    ("PrintScreen", 44, "PrintScreen", Modifiers::empty()),
    ("F12", 123, "F12", Modifiers::empty()),
    ("F11", 122, "F11", Modifiers::empty()),
    ("s", 83, "KeyS", Modifiers::CTRL),
    ("S", 83, "KeyS", Modifiers::META.union(Modifiers::SHIFT)),
    ("I", 73, "KeyI", Modifiers::CTRL.union(Modifiers::SHIFT)),
];

const PLAIN_KEYS: [KeyFields; 4] = [
    ("a", 65, "KeyA", Modifiers::empty()),
    ("Enter", 13, "Enter", Modifiers::empty()),
    ("c", 67, "KeyC", Modifiers::CTRL),
    ("ArrowDown", 40, "ArrowDown", Modifiers::empty()),
];

/// Generate a deterministic storm from config.
#[must_use]
pub fn generate_storm(config: &StormConfig) -> SignalStorm {
    let mut rng = Rng::new(config.seed);
    let count = config.pattern.count();
    let mut signals = Vec::with_capacity(count);
    let mut now = Duration::ZERO;

    while signals.len() < count {
        let burst = match config.pattern {
            BurstPattern::KeyStorm { .. } => key_press(&mut rng),
            BurstPattern::PointerFlood { .. } => vec![pointer_signal(&mut rng)],
            BurstPattern::TouchBurst { .. } => touch_sequence(&mut rng),
            BurstPattern::MixedBurst { .. } => match rng.below(10) {
                0..=2 => key_press(&mut rng),
                3..=5 => vec![pointer_signal(&mut rng)],
                6 => touch_sequence(&mut rng),
                _ => vec![ambient_signal(&mut rng)],
            },
        };
        for signal in burst {
            if signals.len() == count {
                break;
            }
            now += Duration::from_millis(rng.below(config.max_gap_ms + 1));
            signals.push((now, signal));
        }
    }

    SignalStorm {
        signals,
        pattern_name: config.pattern.name(),
        seed: config.seed,
    }
}

fn key_press(rng: &mut Rng) -> Vec<RawSignal> {
    let (key, code_num, code, mods) = if rng.below(3) == 0 {
        *rng.pick(&TRIGGER_KEYS)
    } else {
        *rng.pick(&PLAIN_KEYS)
    };
    let down = RawSignal::key_down(key, code_num, code, mods);
    let up = RawSignal::key_up(key, code_num, code, mods);
    if rng.below(4) == 0 {
        vec![down.clone(), down, up]
    } else {
        vec![down, up]
    }
}

fn pointer_signal(rng: &mut Rng) -> RawSignal {
    match rng.below(8) {
        0 => RawSignal::boundary(BoundaryKind::Leave, RelatedTarget::Absent),
        1 => RawSignal::boundary(BoundaryKind::Enter, RelatedTarget::Absent),
        2 => RawSignal::boundary(BoundaryKind::Leave, RelatedTarget::Inside),
        3 => RawSignal::boundary(BoundaryKind::Enter, RelatedTarget::Outside),
        _ => RawSignal::Pointer {
            action: PointerAction::Move,
        },
    }
}

fn touch_sequence(rng: &mut Rng) -> Vec<RawSignal> {
    let contacts = u32::try_from(rng.below(3)).unwrap_or(0) + 1;
    vec![
        RawSignal::touch(TouchPhase::Start, contacts),
        RawSignal::touch(TouchPhase::Move, contacts),
        RawSignal::touch(TouchPhase::End, 0),
    ]
}

fn ambient_signal(rng: &mut Rng) -> RawSignal {
    match rng.below(7) {
        0 => RawSignal::Focus { focused: false },
        1 => RawSignal::Focus { focused: true },
        2 => RawSignal::Visibility { hidden: true },
        3 => RawSignal::Visibility { hidden: false },
        4 => RawSignal::Pointer {
            action: PointerAction::Click,
        },
        5 => RawSignal::ContextMenu,
        _ => RawSignal::FullscreenChange,
    }
}

/// Aggregate counters from one storm run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StormSummary {
    pub dispatched: usize,
    pub triggers: usize,
    pub suppressed: usize,
    pub activations: usize,
    pub releases: usize,
    /// Largest number of live overlay nodes seen after any step.
    pub max_overlays: usize,
    /// Steps after which the phase disagreed with the rendered overlay.
    pub phase_mismatches: usize,
}

impl StormSummary {
    /// Format as a JSONL line for structured logging.
    #[must_use]
    pub fn to_jsonl(&self, storm: &SignalStorm) -> String {
        format!(
            r#"{{"event":"storm_complete","pattern":"{}","seed":{},"dispatched":{},"triggers":{},"suppressed":{},"activations":{},"releases":{},"max_overlays":{},"phase_mismatches":{}}}"#,
            storm.pattern_name,
            storm.seed,
            self.dispatched,
            self.triggers,
            self.suppressed,
            self.activations,
            self.releases,
            self.max_overlays,
            self.phase_mismatches,
        )
    }
}

/// Whether the rendered overlay matches the phase: `Active` at max blur
/// and opacity 1, `Idle` at baseline opacity.
#[must_use]
pub fn overlay_matches_phase(guard: &ProtectionGuard<RecordingHost>) -> bool {
    let config = guard.config();
    let Some(frame) = guard.host().overlay(&config.overlay_id) else {
        return !guard.is_mounted();
    };
    if guard.state().is_active() {
        let blur_ok = !guard.controller().overlay().blur_supported()
            || frame.blur_px >= config.overlay.max_blur_px;
        blur_ok && frame.opacity >= 1.0
    } else {
        frame.opacity <= config.overlay.baseline_opacity
    }
}

/// Feed a storm through a mounted guard, firing due wakeups between
/// signals, and collect counters.
pub fn run_storm(guard: &mut ProtectionGuard<RecordingHost>, storm: &SignalStorm) -> StormSummary {
    let mut summary = StormSummary::default();
    let mut now = Duration::ZERO;
    for (at, signal) in &storm.signals {
        now = crate::scenario::fire_wakeups(guard, now, *at);
        let dispatch = guard.handle(signal, now);
        summary.dispatched += 1;
        if dispatch.trigger.is_some() {
            summary.triggers += 1;
        }
        if dispatch.suppress {
            summary.suppressed += 1;
        }
        match dispatch.transition {
            Some(Transition::Activated(_)) => summary.activations += 1,
            Some(Transition::Released(_)) => summary.releases += 1,
            None => {}
        }
        summary.max_overlays = summary.max_overlays.max(guard.host().overlays.len());
        if !overlay_matches_phase(guard) {
            summary.phase_mismatches += 1;
        }
    }
    tracing::debug!(
        pattern = storm.pattern_name,
        seed = storm.seed,
        dispatched = summary.dispatched,
        "storm complete"
    );
    summary
}
