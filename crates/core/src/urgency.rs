//! Urgency clock.
//!
//! The urgency level is a pure function of the seconds remaining until the next required
//! transfusion:
//!
//! | countdown (s)        | level    |
//! |----------------------|----------|
//! | `< 3600`             | critical |
//! | `3600 ..< 21600`     | high     |
//! | `21600 ..< 43200`    | medium   |
//! | `>= 43200`           | low      |
//!
//! [`UrgencyClock`] tracks the countdown and reports a [`UrgencyTransition`] only when the level
//! changes. The countdown only moves down through [`UrgencyClock::tick`] and
//! [`UrgencyClock::advance`]; [`UrgencyClock::reset`] is the one way to raise it again (for
//! example after a transfusion has been recorded).
//!
//! Reaching critical sets `escalation_available` on the transition. It never activates
//! emergency mode by itself.

use crate::constants::{CRITICAL_BELOW_SECS, HIGH_BELOW_SECS, MEDIUM_BELOW_SECS};
use crate::{MatchError, MatchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Urgency of the patient's next transfusion, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    pub fn from_countdown(seconds: u64) -> Self {
        if seconds < CRITICAL_BELOW_SECS {
            UrgencyLevel::Critical
        } else if seconds < HIGH_BELOW_SECS {
            UrgencyLevel::High
        } else if seconds < MEDIUM_BELOW_SECS {
            UrgencyLevel::Medium
        } else {
            UrgencyLevel::Low
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Emitted when the urgency level changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrgencyTransition {
    pub from: UrgencyLevel,
    pub to: UrgencyLevel,
    pub countdown: u64,
    /// Set when the clock has just entered critical; emergency mode may now be offered.
    pub escalation_available: bool,
}

/// Point-in-time view of the clock, as read by matching runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrgencySnapshot {
    pub countdown: u64,
    pub level: UrgencyLevel,
}

#[derive(Debug, Clone)]
pub struct UrgencyClock {
    countdown: u64,
    level: UrgencyLevel,
}

impl UrgencyClock {
    pub fn new(countdown: u64) -> Self {
        Self {
            countdown,
            level: UrgencyLevel::from_countdown(countdown),
        }
    }

    pub fn countdown(&self) -> u64 {
        self.countdown
    }

    pub fn level(&self) -> UrgencyLevel {
        self.level
    }

    pub fn snapshot(&self) -> UrgencySnapshot {
        UrgencySnapshot {
            countdown: self.countdown,
            level: self.level,
        }
    }

    /// Feeds the latest countdown reading. Readings above the current countdown are ignored.
    pub fn tick(&mut self, countdown: u64) -> Option<UrgencyTransition> {
        if countdown > self.countdown {
            tracing::warn!(
                current = self.countdown,
                rejected = countdown,
                "ignoring countdown increase outside of reset"
            );
            return None;
        }
        self.apply(countdown)
    }

    /// Moves the countdown down by `elapsed` seconds, holding at zero.
    pub fn advance(&mut self, elapsed: u64) -> Option<UrgencyTransition> {
        self.apply(self.countdown.saturating_sub(elapsed))
    }

    /// Authorised reset; the only operation that may lower the urgency level.
    pub fn reset(&mut self, countdown: u64) -> Option<UrgencyTransition> {
        tracing::info!(from = self.countdown, to = countdown, "urgency countdown reset");
        self.apply(countdown)
    }

    fn apply(&mut self, countdown: u64) -> Option<UrgencyTransition> {
        self.countdown = countdown;
        let next = UrgencyLevel::from_countdown(countdown);
        if next == self.level {
            return None;
        }

        let transition = UrgencyTransition {
            from: self.level,
            to: next,
            countdown,
            escalation_available: next == UrgencyLevel::Critical,
        };
        self.level = next;
        tracing::info!(from = %transition.from, to = %transition.to, countdown, "urgency level changed");
        Some(transition)
    }
}

/// Process-wide clock shared between the ticker, the API and matching runs.
pub type SharedClock = Arc<Mutex<UrgencyClock>>;

pub fn shared_clock(countdown: u64) -> SharedClock {
    Arc::new(Mutex::new(UrgencyClock::new(countdown)))
}

/// Locks the shared clock. The clock holds plain values, so a poisoned lock is still usable.
pub fn lock_clock(clock: &SharedClock) -> MutexGuard<'_, UrgencyClock> {
    clock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Seconds until the next transfusion is due, holding at zero once overdue.
///
/// # Errors
///
/// Returns `MatchError::InvalidInput` if the due time falls outside the representable range.
pub fn countdown_from_schedule(
    last_transfusion: DateTime<Utc>,
    interval: chrono::Duration,
    now: DateTime<Utc>,
) -> MatchResult<u64> {
    let due = last_transfusion.checked_add_signed(interval).ok_or_else(|| {
        MatchError::InvalidInput(format!(
            "transfusion interval of {}s is out of range",
            interval.num_seconds()
        ))
    })?;
    Ok(u64::try_from((due - now).num_seconds()).unwrap_or(0))
}

/// Decrements the shared clock by the elapsed whole seconds on every `period` tick and
/// publishes level changes. Sub-second periods carry their remainder to the next tick.
///
/// The task runs until aborted. Sending fails only when nobody is subscribed, which is fine.
pub fn spawn_countdown_ticker(
    clock: SharedClock,
    period: Duration,
    transitions: broadcast::Sender<UrgencyTransition>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        let mut last = interval.tick().await;
        let mut pending = Duration::ZERO;
        loop {
            let now = interval.tick().await;
            pending += now.duration_since(last);
            last = now;

            let step = pending.as_secs();
            if step == 0 {
                continue;
            }
            pending -= Duration::from_secs(step);

            let transition = lock_clock(&clock).advance(step);
            if let Some(transition) = transition {
                let _ = transitions.send(transition);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_table_boundaries() {
        let cases = [
            (0, UrgencyLevel::Critical),
            (3_599, UrgencyLevel::Critical),
            (3_600, UrgencyLevel::High),
            (21_599, UrgencyLevel::High),
            (21_600, UrgencyLevel::Medium),
            (43_199, UrgencyLevel::Medium),
            (43_200, UrgencyLevel::Low),
            (u64::MAX, UrgencyLevel::Low),
        ];
        for (countdown, expected) in cases {
            assert_eq!(UrgencyLevel::from_countdown(countdown), expected, "{countdown}");
        }
    }

    #[test]
    fn crossing_into_critical_emits_exactly_one_transition() {
        let mut clock = UrgencyClock::new(3_601);
        assert_eq!(clock.level(), UrgencyLevel::High);

        let mut events = Vec::new();
        events.extend(clock.tick(3_600));
        events.extend(clock.tick(3_599));
        events.extend(clock.tick(3_598));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, UrgencyLevel::High);
        assert_eq!(events[0].to, UrgencyLevel::Critical);
        assert_eq!(events[0].countdown, 3_599);
        assert!(events[0].escalation_available);
    }

    #[test]
    fn no_event_without_level_change() {
        let mut clock = UrgencyClock::new(50_000);
        for countdown in (43_200..50_000).rev().step_by(97) {
            assert!(clock.tick(countdown).is_none());
        }
    }

    #[test]
    fn tick_ignores_increases() {
        let mut clock = UrgencyClock::new(3_000);
        assert!(clock.tick(90_000).is_none());
        assert_eq!(clock.countdown(), 3_000);
        assert_eq!(clock.level(), UrgencyLevel::Critical);
    }

    #[test]
    fn advance_holds_at_zero_and_stays_critical() {
        let mut clock = UrgencyClock::new(10);
        clock.advance(25);
        assert_eq!(clock.countdown(), 0);
        assert!(clock.advance(1).is_none());
        assert_eq!(clock.level(), UrgencyLevel::Critical);
    }

    #[test]
    fn reset_is_the_only_way_to_lower_severity() {
        let mut clock = UrgencyClock::new(100);
        let transition = clock.reset(60_000).expect("level changes on reset");
        assert_eq!(transition.from, UrgencyLevel::Critical);
        assert_eq!(transition.to, UrgencyLevel::Low);
        assert!(!transition.escalation_available);
    }

    #[test]
    fn severity_is_monotonic_while_counting_down() {
        let mut clock = UrgencyClock::new(50_000);
        let mut last = clock.level();
        for _ in 0..60 {
            clock.advance(1_000);
            assert!(clock.level() >= last);
            last = clock.level();
        }
        assert_eq!(last, UrgencyLevel::Critical);
    }

    #[test]
    fn countdown_from_schedule_holds_at_zero_when_overdue() {
        let last = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = last + chrono::Duration::hours(70);
        assert_eq!(
            countdown_from_schedule(last, chrono::Duration::hours(72), now).unwrap(),
            7_200
        );
        let late = last + chrono::Duration::hours(80);
        assert_eq!(
            countdown_from_schedule(last, chrono::Duration::hours(72), late).unwrap(),
            0
        );
    }

    #[test]
    fn countdown_from_schedule_rejects_out_of_range_interval() {
        let last = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let err = countdown_from_schedule(last, chrono::Duration::days(150_000_000), last).unwrap_err();
        assert!(matches!(err, MatchError::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_publishes_transitions() {
        let clock = shared_clock(3_602);
        let (tx, mut rx) = broadcast::channel(8);
        let handle = spawn_countdown_ticker(clock.clone(), Duration::from_secs(1), tx);

        let transition = rx.recv().await.expect("ticker sends a transition");
        assert_eq!(transition.to, UrgencyLevel::Critical);
        assert_eq!(lock_clock(&clock).countdown(), 3_599);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_ticker_keeps_real_time() {
        let clock = shared_clock(3_602);
        let (tx, mut rx) = broadcast::channel(8);
        let started = tokio::time::Instant::now();
        let handle = spawn_countdown_ticker(clock.clone(), Duration::from_millis(500), tx);

        let transition = rx.recv().await.expect("ticker sends a transition");
        assert_eq!(transition.countdown, 3_599);
        assert!(started.elapsed() >= Duration::from_secs(3));
        handle.abort();
    }
}
