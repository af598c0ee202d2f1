//! Player health bookkeeping
//!
//! `Healthy -> Degraded -> Failed`. Successes heal `Degraded`, but `Failed` is only
//! left through a reinitialization.

use afterglow_core::HealthStatus;
use std::time::Duration;
use tokio::time::Instant;

/// Health of the player session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WidgetHealth {
    pub status: HealthStatus,
    /// Failed logical operations since the last success
    pub consecutive_failures: u32,
    pub last_success_at: Option<Instant>,
    /// Failed reinitializations since the last successful one
    pub recovery_attempts: u32,
    pub last_reinit_at: Option<Instant>,
    /// Retry exhaustions over the whole session
    pub total_exhaustions: u64,
}

impl WidgetHealth {
    /// Returns the new status when it changed
    pub fn record_success(&mut self, now: Instant) -> Option<HealthStatus> {
        self.last_success_at = Some(now);
        self.consecutive_failures = 0;
        match self.status {
            HealthStatus::Degraded => self.set_status(HealthStatus::Healthy),
            _ => None,
        }
    }

    pub fn record_failure(&mut self, max_consecutive_failures: u32) -> Option<HealthStatus> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let status = if self.consecutive_failures >= max_consecutive_failures
            || self.status == HealthStatus::Failed
        {
            HealthStatus::Failed
        } else {
            HealthStatus::Degraded
        };
        self.set_status(status)
    }

    /// A retried operation ran out of attempts
    pub fn record_exhaustion(&mut self, max_consecutive_failures: u32) -> Option<HealthStatus> {
        self.total_exhaustions += 1;
        self.record_failure(max_consecutive_failures)
    }

    /// No success within `stale_after`
    pub fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        self.last_success_at
            .map_or(true, |at| now.saturating_duration_since(at) > stale_after)
    }

    pub fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_reinit_at
            .map_or(true, |at| now.saturating_duration_since(at) >= cooldown)
    }

    pub fn begin_reinit(&mut self, now: Instant) {
        self.last_reinit_at = Some(now);
        self.consecutive_failures = 0;
    }

    pub fn reinit_succeeded(&mut self, now: Instant) -> Option<HealthStatus> {
        self.recovery_attempts = 0;
        self.consecutive_failures = 0;
        self.last_success_at = Some(now);
        self.set_status(HealthStatus::Healthy)
    }

    pub fn reinit_failed(&mut self) -> Option<HealthStatus> {
        self.recovery_attempts = self.recovery_attempts.saturating_add(1);
        self.set_status(HealthStatus::Failed)
    }

    fn set_status(&mut self, status: HealthStatus) -> Option<HealthStatus> {
        if self.status == status {
            None
        } else {
            self.status = status;
            Some(status)
        }
    }
}
