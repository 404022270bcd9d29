// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Token budget for background AI work.
//!
//! Two rolling windows (hourly and daily) cap total LLM spend. A fraction of
//! each window is reserved for urgent work: normal-priority callers only see
//! the non-reserve portion, urgent callers may consume the full limit.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::debug;

/// Priority of a budget request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPriority {
    Normal,
    Urgent,
}

#[derive(Debug)]
struct Windows {
    used_hourly: u64,
    used_daily: u64,
    hour_start: DateTime<Utc>,
    day_start: DateTime<Utc>,
}

/// Snapshot of the budget for `budget_update` frames and status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub hourly_limit: u64,
    pub daily_limit: u64,
    pub used_hourly: u64,
    pub used_daily: u64,
    pub priority_reserve: f64,
}

/// Daily + hourly token caps with a priority reserve.
pub struct TokenBudget {
    daily_limit: u64,
    hourly_limit: u64,
    priority_reserve: f64,
    windows: Mutex<Windows>,
}

fn hour_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn day_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

impl TokenBudget {
    pub fn new(daily_limit: u64, hourly_limit: u64, priority_reserve: f64) -> Self {
        let now = Utc::now();
        Self {
            daily_limit,
            hourly_limit,
            priority_reserve: priority_reserve.clamp(0.0, 1.0),
            windows: Mutex::new(Windows {
                used_hourly: 0,
                used_daily: 0,
                hour_start: hour_floor(now),
                day_start: day_floor(now),
            }),
        }
    }

    /// Whether `tokens` more can be spent at the given priority.
    ///
    /// Normal priority sees `limit * (1 - reserve)`; urgent sees the full
    /// limit. Both windows must fit.
    pub fn can_spend(&self, tokens: u64, priority: BudgetPriority) -> bool {
        let mut w = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        Self::roll_over(&mut w);

        let fraction = match priority {
            BudgetPriority::Urgent => 1.0,
            BudgetPriority::Normal => 1.0 - self.priority_reserve,
        };
        let hourly_cap = (self.hourly_limit as f64 * fraction) as u64;
        let daily_cap = (self.daily_limit as f64 * fraction) as u64;

        w.used_hourly + tokens <= hourly_cap && w.used_daily + tokens <= daily_cap
    }

    /// Records real usage into both windows.
    pub fn record_usage(&self, prompt_tokens: u64, completion_tokens: u64) {
        let total = prompt_tokens + completion_tokens;
        if total == 0 {
            return;
        }
        let mut w = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        Self::roll_over(&mut w);
        w.used_hourly += total;
        w.used_daily += total;
        debug!(
            total,
            used_hourly = w.used_hourly,
            used_daily = w.used_daily,
            "Recorded token usage"
        );
    }

    /// Current counters for reporting.
    pub fn snapshot(&self) -> BudgetSnapshot {
        let mut w = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        Self::roll_over(&mut w);
        BudgetSnapshot {
            hourly_limit: self.hourly_limit,
            daily_limit: self.daily_limit,
            used_hourly: w.used_hourly,
            used_daily: w.used_daily,
            priority_reserve: self.priority_reserve,
        }
    }

    /// Lazy window roll-over on hour/day boundaries.
    fn roll_over(w: &mut Windows) {
        let now = Utc::now();
        if now - w.hour_start >= Duration::hours(1) || now.hour() != w.hour_start.hour() {
            w.hour_start = hour_floor(now);
            w.used_hourly = 0;
        }
        if now - w.day_start >= Duration::days(1) || now.day() != w.day_start.day() {
            w.day_start = day_floor(now);
            w.used_daily = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgent_sees_full_limit() {
        let budget = TokenBudget::new(10_000, 1_000, 0.3);
        assert!(budget.can_spend(1_000, BudgetPriority::Urgent));
        // Normal is capped at 700 of the hourly window
        assert!(!budget.can_spend(1_000, BudgetPriority::Normal));
        assert!(budget.can_spend(700, BudgetPriority::Normal));
    }

    #[test]
    fn test_record_usage_consumes_both_windows() {
        let budget = TokenBudget::new(10_000, 1_000, 0.0);
        budget.record_usage(400, 200);

        let snap = budget.snapshot();
        assert_eq!(snap.used_hourly, 600);
        assert_eq!(snap.used_daily, 600);

        assert!(budget.can_spend(400, BudgetPriority::Normal));
        assert!(!budget.can_spend(401, BudgetPriority::Normal));
    }

    #[test]
    fn test_daily_window_limits_even_when_hourly_free() {
        let budget = TokenBudget::new(500, 1_000, 0.0);
        assert!(!budget.can_spend(600, BudgetPriority::Urgent));
        assert!(budget.can_spend(500, BudgetPriority::Urgent));
    }

    #[test]
    fn test_zero_usage_is_noop() {
        let budget = TokenBudget::new(10_000, 1_000, 0.3);
        budget.record_usage(0, 0);
        assert_eq!(budget.snapshot().used_daily, 0);
    }

    #[test]
    fn test_reserve_clamped() {
        let budget = TokenBudget::new(1_000, 1_000, 2.0);
        // Reserve clamps to 1.0: normal priority gets nothing
        assert!(!budget.can_spend(1, BudgetPriority::Normal));
        assert!(budget.can_spend(1, BudgetPriority::Urgent));
    }

    #[test]
    fn test_hourly_rollover_resets_counter() {
        let budget = TokenBudget::new(10_000, 1_000, 0.0);
        budget.record_usage(900, 0);
        assert!(!budget.can_spend(200, BudgetPriority::Urgent));

        // Force the window start back two hours; next check rolls over
        {
            let mut w = budget.windows.lock().unwrap();
            w.hour_start = w.hour_start - Duration::hours(2);
        }
        assert!(budget.can_spend(200, BudgetPriority::Urgent));
        assert_eq!(budget.snapshot().used_hourly, 0);
        // Daily window unaffected by the hourly roll
        assert_eq!(budget.snapshot().used_daily, 900);
    }
}
