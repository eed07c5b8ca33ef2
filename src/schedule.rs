//! Scheduled task primitives for debounced and rate-limited work.
//!
//! DESIGN
//! ======
//! Timers are plain deadlines driven by explicit `Instant`s. The owner
//! schedules, reschedules (which cancels the pending deadline), and polls
//! `fire_at(now)` from its own loop. Nothing here sleeps, so tests advance
//! time by passing later instants instead of waiting on a wall clock.

use std::time::{Duration, Instant};

// =============================================================================
// SCHEDULED TASK
// =============================================================================

/// A single cancellable deadline. Rescheduling replaces the previous
/// deadline; only the most recent schedule can fire.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    delay: Duration,
    deadline: Option<Instant>,
}

impl ScheduledTask {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay, deadline: None }
    }

    /// Schedule to fire `delay` after `now`, cancelling any pending deadline.
    pub fn schedule_at(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// Schedule to fire at `now` with no delay.
    pub fn trigger_at(&mut self, now: Instant) {
        self.deadline = Some(now);
    }

    /// Cancel the pending deadline. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    #[must_use]
    pub fn is_due_at(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Consume the deadline if it has passed. Returns whether it fired.
    pub fn fire_at(&mut self, now: Instant) -> bool {
        if self.is_due_at(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// COOLDOWN
// =============================================================================

/// Minimum interval between two executions. Not cancellable; `record_at`
/// marks an execution and `ready_at` gates the next one.
#[derive(Debug, Clone)]
pub struct Cooldown {
    interval: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    /// A cooldown that is ready immediately.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// A cooldown treated as if it last ran at `start`.
    #[must_use]
    pub fn started_at(interval: Duration, start: Instant) -> Self {
        Self { interval, last: Some(start) }
    }

    #[must_use]
    pub fn ready_at(&self, now: Instant) -> bool {
        self.last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    pub fn record_at(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

#[cfg(test)]
#[path = "schedule_test.rs"]
mod tests;
