//! Resync failure budget.

use serde::Deserialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ResyncBudgetConfig {
    /// Failures tolerated inside `window_ms`; reaching it marks the book stale.
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Consecutive applied diffs after which past failures are forgotten.
    #[serde(default = "default_healthy_after_diffs")]
    pub healthy_after_diffs: u64,
}

fn default_max_failures() -> usize {
    5
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_healthy_after_diffs() -> u64 {
    1_000
}

impl Default for ResyncBudgetConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            window_ms: default_window_ms(),
            healthy_after_diffs: default_healthy_after_diffs(),
        }
    }
}

/// Sliding-window count of resync triggers.
#[derive(Debug)]
pub struct ResyncBudget {
    config: ResyncBudgetConfig,
    failures: VecDeque<Instant>,
    applied_streak: u64,
}

impl ResyncBudget {
    pub fn new(config: ResyncBudgetConfig) -> Self {
        Self {
            config,
            failures: VecDeque::new(),
            applied_streak: 0,
        }
    }

    /// Record a failure at `now`. Returns true once the budget is spent.
    pub fn record_failure_at(&mut self, now: Instant) -> bool {
        self.applied_streak = 0;
        let window = Duration::from_millis(self.config.window_ms);
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.failures.push_back(now);
        self.failures.len() >= self.config.max_failures.max(1)
    }

    pub fn record_failure(&mut self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub fn record_applied(&mut self) {
        self.applied_streak += 1;
        if self.applied_streak >= self.config.healthy_after_diffs && !self.failures.is_empty() {
            self.failures.clear();
        }
    }

    pub fn failures(&self) -> usize {
        self.failures.len()
    }

    pub fn reset(&mut self) {
        self.failures.clear();
        self.applied_streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_failures: usize, healthy_after_diffs: u64) -> ResyncBudget {
        ResyncBudget::new(ResyncBudgetConfig {
            max_failures,
            window_ms: 1_000,
            healthy_after_diffs,
        })
    }

    #[test]
    fn test_exhausted_inside_window() {
        let mut b = budget(3, 100);
        let t0 = Instant::now();
        assert!(!b.record_failure_at(t0));
        assert!(!b.record_failure_at(t0 + Duration::from_millis(100)));
        assert!(b.record_failure_at(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn test_old_failures_expire() {
        let mut b = budget(3, 100);
        let t0 = Instant::now();
        b.record_failure_at(t0);
        b.record_failure_at(t0 + Duration::from_millis(100));
        assert!(!b.record_failure_at(t0 + Duration::from_millis(1_500)));
        assert_eq!(b.failures(), 1);
    }

    #[test]
    fn test_healthy_streak_forgives() {
        let mut b = budget(2, 3);
        b.record_failure();
        for _ in 0..3 {
            b.record_applied();
        }
        assert_eq!(b.failures(), 0);
        assert!(!b.record_failure());
    }
}
