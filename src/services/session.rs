//! ──────────────────────────────────────────────────────────────────────────
//! Daily session limiter
//! ──────────────────────────────────────────────────────────────────────────
//! The one piece of process-wide mutable state in the core. All counters
//! live behind a single mutex; the day-rollover-then-mutate sequence is one
//! critical section, so two concurrent requests can never both observe
//! "under limit" and overshoot the cap by more than one.
//! ──────────────────────────────────────────────────────────────────────────

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Counters for the current trading day.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DailySessionStats {
    pub date: NaiveDate,
    pub signals_sent: u32,
    pub trades_taken: u32,
    pub profit_loss: f64,
}

impl DailySessionStats {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            signals_sent: 0,
            trades_taken: 0,
            profit_loss: 0.0,
        }
    }
}

/// Daily summary handed to callers; adds the derived fields the front-end
/// renders next to the raw counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub signals_sent: u32,
    pub trades_taken: u32,
    pub profit_loss: f64,
    pub remaining_signals: u32,
    pub limit_reached: bool,
}

type Clock = dyn Fn() -> NaiveDate + Send + Sync;

pub struct SessionLimiter {
    max_daily_signals: u32,
    today: Box<Clock>,
    stats: Mutex<DailySessionStats>,
}

impl SessionLimiter {
    pub fn new(max_daily_signals: u32) -> Self {
        Self::with_clock(max_daily_signals, || Utc::now().date_naive())
    }

    /// Injectable clock so day rollover is testable without waiting for
    /// midnight.
    pub fn with_clock<F>(max_daily_signals: u32, clock: F) -> Self
    where
        F: Fn() -> NaiveDate + Send + Sync + 'static,
    {
        let today = clock();
        Self {
            max_daily_signals,
            today: Box::new(clock),
            stats: Mutex::new(DailySessionStats::fresh(today)),
        }
    }

    /// Stale → Active transition: zero the counters and advance the date
    /// before the caller's read/write proceeds. Must run inside the lock.
    fn rollover(&self, stats: &mut DailySessionStats) {
        let now = (self.today)();
        if stats.date != now {
            log::info!("daily stats reset ({} -> {})", stats.date, now);
            *stats = DailySessionStats::fresh(now);
        }
    }

    pub fn record_signal_sent(&self) {
        let mut stats = self.stats.lock().expect("session stats poisoned");
        self.rollover(&mut stats);
        stats.signals_sent += 1;
    }

    pub fn record_trade(&self, profit_loss: f64) {
        let mut stats = self.stats.lock().expect("session stats poisoned");
        self.rollover(&mut stats);
        stats.trades_taken += 1;
        stats.profit_loss += profit_loss;
    }

    pub fn is_daily_limit_reached(&self) -> bool {
        let mut stats = self.stats.lock().expect("session stats poisoned");
        self.rollover(&mut stats);
        stats.signals_sent >= self.max_daily_signals
    }

    pub fn summary(&self) -> DailySummary {
        let mut stats = self.stats.lock().expect("session stats poisoned");
        self.rollover(&mut stats);
        DailySummary {
            date: stats.date,
            signals_sent: stats.signals_sent,
            trades_taken: stats.trades_taken,
            profit_loss: stats.profit_loss,
            remaining_signals: self.max_daily_signals.saturating_sub(stats.signals_sent),
            limit_reached: stats.signals_sent >= self.max_daily_signals,
        }
    }
}

// ======================================================================
// UNIT TESTS
// ======================================================================
