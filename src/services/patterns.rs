//! Candlestick pattern detection over the last 1–3 bars.
//!
//! Fewer than two bars yields an empty set, not an error; the star patterns
//! additionally need three bars.

use serde::Serialize;

use crate::services::market_data::PriceBar;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PatternSet {
    pub doji: bool,
    pub hammer: bool,
    pub shooting_star: bool,
    pub bullish_engulfing: bool,
    pub bearish_engulfing: bool,
    pub morning_star: bool,
    pub evening_star: bool,
}

impl PatternSet {
    pub fn detect(bars: &[PriceBar]) -> Self {
        let mut patterns = Self::default();
        if bars.len() < 2 {
            return patterns;
        }

        let latest = bars[bars.len() - 1];
        let prev = bars[bars.len() - 2];

        let body = (latest.close - latest.open).abs();
        let upper_shadow = latest.high - latest.open.max(latest.close);
        let lower_shadow = latest.open.min(latest.close) - latest.low;

        if body <= (latest.high - latest.low) * 0.1 {
            patterns.doji = true;
        }
        if lower_shadow >= 2.0 * body && upper_shadow <= body {
            patterns.hammer = true;
        }
        if upper_shadow >= 2.0 * body && lower_shadow <= body {
            patterns.shooting_star = true;
        }

        // engulfing: current body fully contains and reverses the prior one
        if latest.close > latest.open
            && prev.close < prev.open
            && latest.open < prev.close
            && latest.close > prev.open
        {
            patterns.bullish_engulfing = true;
        }
        if latest.close < latest.open
            && prev.close > prev.open
            && latest.open > prev.close
            && latest.close < prev.open
        {
            patterns.bearish_engulfing = true;
        }

        // three-bar reversals: small middle body, third bar closing past the
        // midpoint of the first
        if bars.len() >= 3 {
            let first = bars[bars.len() - 3];
            let second = prev;
            let second_body = (second.close - second.open).abs();
            let first_midpoint = (first.open + first.close) / 2.0;

            if first.close < first.open
                && second_body < body * 0.5
                && latest.close > latest.open
                && latest.close > first_midpoint
            {
                patterns.morning_star = true;
            }
            if first.close > first.open
                && second_body < body * 0.5
                && latest.close < latest.open
                && latest.close < first_midpoint
            {
                patterns.evening_star = true;
            }
        }

        patterns
    }

    pub fn any(&self) -> bool {
        self.doji
            || self.hammer
            || self.shooting_star
            || self.bullish_engulfing
            || self.bearish_engulfing
            || self.morning_star
            || self.evening_star
    }
}

// ======================================================================
// UNIT TESTS
// ======================================================================
