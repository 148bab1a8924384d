#![forbid(unsafe_code)]

//! Pointer residency: the tracked belief that the pointer is inside the window.
//!
//! Three inputs move the belief:
//! - genuine window-boundary crossings (related target absent or outside the
//!   root element),
//! - pointer movement, which proves the pointer is inside,
//! - two host-clock deadlines: an idle fallback armed by movement and a
//!   periodic focus reconciliation.
//!
//! Deadlines only ever move residency to `inside = false`. Focus regain
//! never sets `inside = true`; only an enter crossing or movement does.

use core::time::Duration;

use serde::Serialize;

use crate::signal::{BoundaryKind, RelatedTarget};

/// Timings for [`MouseResidencyTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidencyConfig {
    /// No-movement window after which an unfocused document counts as left.
    pub idle_timeout: Duration,
    /// Cadence of the focus/residency reconciliation check.
    pub reconcile_interval: Duration,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(2),
        }
    }
}

/// Snapshot of the residency belief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MouseResidency {
    pub inside: bool,
    /// Host time of the last observed pointer movement.
    pub last_activity_at: Option<Duration>,
}

impl Default for MouseResidency {
    fn default() -> Self {
        Self {
            inside: true,
            last_activity_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// Genuine window-boundary exit.
    Boundary,
    /// Idle fallback fired while the document lacked focus.
    Idle,
    /// Reconciliation found focus lost while residency claimed inside.
    FocusLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnterReason {
    /// Genuine window-boundary entry.
    Boundary,
    /// Movement observed while residency was `false`.
    PointerMoved,
}

/// Residency change reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", content = "reason", rename_all = "snake_case")]
pub enum ResidencyChange {
    Left(LeaveReason),
    Entered(EnterReason),
}

/// Hysteresis-based pointer residency tracker driven by the host clock.
#[derive(Debug, Clone)]
pub struct MouseResidencyTracker {
    config: ResidencyConfig,
    residency: MouseResidency,
    idle_deadline: Option<Duration>,
    next_reconcile: Option<Duration>,
}

impl MouseResidencyTracker {
    #[must_use]
    pub fn new(config: ResidencyConfig) -> Self {
        Self {
            config,
            residency: MouseResidency::default(),
            idle_deadline: None,
            next_reconcile: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> ResidencyConfig {
        self.config
    }

    /// Current residency belief.
    #[must_use]
    pub const fn residency(&self) -> MouseResidency {
        self.residency
    }

    #[must_use]
    pub const fn is_inside(&self) -> bool {
        self.residency.inside
    }

    /// Whether the reconciliation cadence is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.next_reconcile.is_some()
    }

    /// Reset to `inside = true` and start the reconciliation cadence.
    pub fn start(&mut self, now: Duration) {
        self.residency = MouseResidency::default();
        self.idle_deadline = None;
        self.next_reconcile = Some(now + self.config.reconcile_interval);
    }

    /// Stop all deadlines. The belief itself is kept for inspection.
    pub fn stop(&mut self) {
        self.idle_deadline = None;
        self.next_reconcile = None;
    }

    /// Feed one boundary crossing.
    ///
    /// Crossings between internal elements are ignored. A genuine leave is
    /// reported even when residency was already `false`, so a repeated exit
    /// still re-activates.
    pub fn boundary(
        &mut self,
        kind: BoundaryKind,
        related: RelatedTarget,
    ) -> Option<ResidencyChange> {
        if !related.is_window_boundary() {
            return None;
        }
        match kind {
            BoundaryKind::Leave => {
                self.residency.inside = false;
                Some(ResidencyChange::Left(LeaveReason::Boundary))
            }
            BoundaryKind::Enter => {
                self.residency.inside = true;
                Some(ResidencyChange::Entered(EnterReason::Boundary))
            }
        }
    }

    /// Feed one pointer movement: re-arms the idle fallback and, if
    /// residency is `false`, flips it to `true`.
    pub fn pointer_moved(&mut self, now: Duration) -> Option<ResidencyChange> {
        self.residency.last_activity_at = Some(now);
        if self.next_reconcile.is_some() {
            self.idle_deadline = Some(now + self.config.idle_timeout);
        }
        if self.residency.inside {
            return None;
        }
        self.residency.inside = true;
        Some(ResidencyChange::Entered(EnterReason::PointerMoved))
    }

    /// Run due deadlines. At most one change is reported per poll.
    pub fn poll(&mut self, now: Duration, has_focus: bool) -> Option<ResidencyChange> {
        let mut change = None;

        if let Some(deadline) = self.idle_deadline
            && now >= deadline
        {
            self.idle_deadline = None;
            if self.residency.inside && !has_focus {
                self.residency.inside = false;
                change = Some(ResidencyChange::Left(LeaveReason::Idle));
            }
        }

        if let Some(due) = self.next_reconcile
            && now >= due
        {
            self.next_reconcile = Some(next_after(due, self.config.reconcile_interval, now));
            if change.is_none() && self.residency.inside && !has_focus {
                self.residency.inside = false;
                change = Some(ResidencyChange::Left(LeaveReason::FocusLost));
            }
        }

        change
    }

    /// Earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        match (self.idle_deadline, self.next_reconcile) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// First cadence point strictly after `now`, skipping missed periods
/// instead of firing them in a burst.
fn next_after(due: Duration, interval: Duration, now: Duration) -> Duration {
    if interval.is_zero() {
        return now;
    }
    let behind = now.saturating_sub(due).as_nanos() / interval.as_nanos();
    let steps = u32::try_from(behind.saturating_add(1)).unwrap_or(u32::MAX);
    due.saturating_add(interval.saturating_mul(steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn started() -> MouseResidencyTracker {
        let mut tracker = MouseResidencyTracker::new(ResidencyConfig::default());
        tracker.start(ms(0));
        tracker
    }

    #[test]
    fn starts_inside() {
        let tracker = started();
        assert!(tracker.is_inside());
        assert_eq!(tracker.next_deadline(), Some(ms(2_000)));
    }

    #[test]
    fn internal_crossings_are_ignored() {
        let mut tracker = started();
        assert_eq!(
            tracker.boundary(BoundaryKind::Leave, RelatedTarget::Inside),
            None
        );
        assert!(tracker.is_inside());
    }

    #[test]
    fn genuine_leave_and_enter() {
        let mut tracker = started();
        assert_eq!(
            tracker.boundary(BoundaryKind::Leave, RelatedTarget::Absent),
            Some(ResidencyChange::Left(LeaveReason::Boundary))
        );
        assert!(!tracker.is_inside());
        assert_eq!(
            tracker.boundary(BoundaryKind::Enter, RelatedTarget::Outside),
            Some(ResidencyChange::Entered(EnterReason::Boundary))
        );
        assert!(tracker.is_inside());
    }

    #[test]
    fn movement_flips_outside_to_inside_once() {
        let mut tracker = started();
        tracker.boundary(BoundaryKind::Leave, RelatedTarget::Absent);
        assert_eq!(
            tracker.pointer_moved(ms(10)),
            Some(ResidencyChange::Entered(EnterReason::PointerMoved))
        );
        assert_eq!(tracker.pointer_moved(ms(20)), None);
        assert_eq!(tracker.residency().last_activity_at, Some(ms(20)));
    }

    #[test]
    fn idle_fallback_requires_lost_focus() {
        let mut tracker = started();
        tracker.pointer_moved(ms(100));
        // Reconciliation at 2s/4s keeps running; focus is held.
        assert_eq!(tracker.poll(ms(5_100), true), None);
        assert!(tracker.is_inside());

        tracker.pointer_moved(ms(5_200));
        assert_eq!(
            tracker.poll(ms(10_200), false),
            Some(ResidencyChange::Left(LeaveReason::Idle))
        );
        assert!(!tracker.is_inside());
    }

    #[test]
    fn reconciliation_only_forces_outside() {
        let mut tracker = started();
        assert_eq!(
            tracker.poll(ms(2_000), false),
            Some(ResidencyChange::Left(LeaveReason::FocusLost))
        );
        // Focus back, residency stays false until movement or enter.
        assert_eq!(tracker.poll(ms(4_000), true), None);
        assert!(!tracker.is_inside());
    }

    #[test]
    fn reconciliation_skips_missed_periods() {
        let mut tracker = started();
        tracker.poll(ms(9_500), true);
        assert_eq!(tracker.next_deadline(), Some(ms(10_000)));
    }

    #[test]
    fn stopped_tracker_has_no_deadlines() {
        let mut tracker = started();
        tracker.pointer_moved(ms(1));
        tracker.stop();
        assert_eq!(tracker.next_deadline(), None);
        assert_eq!(tracker.poll(ms(60_000), false), None);
        assert!(!tracker.is_running());
    }
}
