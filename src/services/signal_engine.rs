//! ──────────────────────────────────────────────────────────────────────────
//! Signal aggregation engine
//! ──────────────────────────────────────────────────────────────────────────
//! * Additive point scoring: each rule adds a fixed number of points and a
//!   reason string.
//! * First mover wins the direction: a rule may set BUY/SELL only while the
//!   running direction is still HOLD; later rules reinforce the score but
//!   never overturn the call.
//! * Confidence is capped at 95 – a signal is never reported as certain.
//! * When live data is unavailable the engine still returns a valid signal,
//!   built from one well-known fixture payload and flagged SIMULATED.
//! ──────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::Arc;

use crate::config::settings::Settings;
use crate::services::indicators::{IndicatorSet, MIN_BARS};
use crate::services::market_data::{PriceProvider, Timeframe};
use crate::services::patterns::PatternSet;
use crate::services::risk::{self, RiskAssessment};
use crate::services::session::{DailySummary, SessionLimiter};

/// Stop sits 1.5 ATR away, target 2 ATR – risk-reward > 1 by construction,
/// which the risk stage still verifies rather than assumes.
const STOP_ATR_MULT: f64 = 1.5;
const TARGET_ATR_MULT: f64 = 2.0;
/// Synthetic stop distance (fraction of price) when ATR degraded to zero.
const FALLBACK_DIST_PCT: f64 = 0.005;

const CONFIDENCE_CEILING: i32 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "HOLD")]
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    #[serde(rename = "LIVE")]
    Live,
    #[serde(rename = "DEGRADED")]
    Degraded,
    #[serde(rename = "SIMULATED")]
    Simulated,
}

/// One immutable signal, created per request. Persistence, if any, is the
/// caller's business.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub expiry: Timeframe,
    pub direction: Direction,
    /// 0–95, hard ceiling.
    pub confidence: u8,
    pub current_price: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reasons: Vec<String>,
    pub indicators: IndicatorSet,
    pub patterns: PatternSet,
    pub freshness: Freshness,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn confidence_label(&self) -> &'static str {
        match self.confidence {
            80.. => "VERY HIGH",
            60..=79 => "HIGH",
            40..=59 => "MEDIUM",
            _ => "LOW",
        }
    }

    /// Fallback signal built from [`SIMULATED_QUOTE`], visibly flagged so
    /// callers can distinguish it from a live reading.
    pub fn simulated(symbol: &str, timeframe: Timeframe, expiry: Timeframe) -> Self {
        let patterns = PatternSet::default();
        let mut signal = aggregate(
            &SIMULATED_QUOTE,
            &patterns,
            symbol,
            timeframe,
            expiry,
            Freshness::Simulated,
        );
        signal.reasons.insert(
            0,
            "real-time data temporarily unavailable, using market simulation".to_string(),
        );
        signal
    }
}

/// The one fixture payload used whenever live data cannot be fetched.
/// Its exact numbers are arbitrary; tests assert on the SIMULATED flag.
static SIMULATED_QUOTE: Lazy<IndicatorSet> = Lazy::new(|| IndicatorSet {
    current_price: 1.0923,
    rsi: 45.2,
    macd: 0.0012,
    macd_signal: 0.0010,
    macd_histogram: 0.0002,
    bb_upper: 1.0950,
    bb_middle: 1.0920,
    bb_lower: 1.0890,
    ma10: 1.0918,
    ma20: 1.0915,
    ma50: 1.0900,
    stoch_k: 50.0,
    stoch_d: 50.0,
    adx: 18.0,
    williams_r: -50.0,
    cci: 0.0,
    atr: 0.0008,
    volume_sma: 0.0,
    momentum_1: 0.01,
    momentum_5: 0.04,
    volatility_pct: 0.8,
    support: 1.0885,
    resistance: 1.0955,
});

/// Combine the indicator battery and pattern flags into a directional call.
pub fn aggregate(
    ind: &IndicatorSet,
    patterns: &PatternSet,
    symbol: &str,
    timeframe: Timeframe,
    expiry: Timeframe,
    freshness: Freshness,
) -> Signal {
    let mut direction = Direction::Hold;
    let mut score: i32 = 0;
    let mut reasons: Vec<String> = Vec::new();

    let set_if_hold = |direction: &mut Direction, wanted: Direction| {
        if *direction == Direction::Hold {
            *direction = wanted;
        }
    };

    let price = ind.current_price;

    // RSI
    if ind.rsi < 30.0 {
        set_if_hold(&mut direction, Direction::Buy);
        score += 30;
        reasons.push(format!("RSI oversold ({:.1})", ind.rsi));
    } else if ind.rsi > 70.0 {
        set_if_hold(&mut direction, Direction::Sell);
        score += 30;
        reasons.push(format!("RSI overbought ({:.1})", ind.rsi));
    } else if ind.rsi < 40.0 {
        score += 15;
        reasons.push(format!("RSI bearish ({:.1})", ind.rsi));
    } else if ind.rsi > 60.0 {
        score += 15;
        reasons.push(format!("RSI bullish ({:.1})", ind.rsi));
    } else {
        score += 5;
        reasons.push(format!("RSI neutral ({:.1})", ind.rsi));
    }

    // MACD
    if ind.macd > ind.macd_signal {
        set_if_hold(&mut direction, Direction::Buy);
        score += 25;
        reasons.push("MACD bullish crossover".to_string());
    } else {
        set_if_hold(&mut direction, Direction::Sell);
        score += 25;
        reasons.push("MACD bearish crossover".to_string());
    }

    // Bollinger bands (skipped when collapsed onto the price in degraded mode)
    if ind.bb_upper > ind.bb_lower {
        if price <= ind.bb_lower {
            set_if_hold(&mut direction, Direction::Buy);
            score += 20;
            reasons.push("price at lower Bollinger band".to_string());
        } else if price >= ind.bb_upper {
            set_if_hold(&mut direction, Direction::Sell);
            score += 20;
            reasons.push("price at upper Bollinger band".to_string());
        } else if price > ind.bb_middle && direction == Direction::Buy {
            score += 10;
            reasons.push("price above Bollinger middle".to_string());
        } else if price < ind.bb_middle && direction == Direction::Sell {
            score += 10;
            reasons.push("price below Bollinger middle".to_string());
        }
    }

    // moving averages
    if price > ind.ma20 {
        set_if_hold(&mut direction, Direction::Buy);
        score += 15;
        reasons.push("price above MA20".to_string());
    } else if price < ind.ma20 {
        set_if_hold(&mut direction, Direction::Sell);
        score += 15;
        reasons.push("price below MA20".to_string());
    }
    if direction == Direction::Buy && price > ind.ma20 && ind.ma20 > ind.ma50 {
        score += 10;
        reasons.push("bullish MA stack (price > MA20 > MA50)".to_string());
    } else if direction == Direction::Sell && price < ind.ma20 && ind.ma20 < ind.ma50 {
        score += 10;
        reasons.push("bearish MA stack (price < MA20 < MA50)".to_string());
    }

    // stochastic extremes
    if ind.stoch_k < 20.0 && ind.stoch_d < 20.0 {
        set_if_hold(&mut direction, Direction::Buy);
        score += 10;
        reasons.push("stochastic oversold".to_string());
    } else if ind.stoch_k > 80.0 && ind.stoch_d > 80.0 {
        set_if_hold(&mut direction, Direction::Sell);
        score += 10;
        reasons.push("stochastic overbought".to_string());
    }

    // momentum confirmation
    if ind.momentum_1 > 0.02 {
        set_if_hold(&mut direction, Direction::Buy);
        score += 15;
        reasons.push(format!("strong positive momentum (+{:.2}%)", ind.momentum_1));
    } else if ind.momentum_1 < -0.02 {
        set_if_hold(&mut direction, Direction::Sell);
        score += 15;
        reasons.push(format!("strong negative momentum ({:.2}%)", ind.momentum_1));
    } else if ind.momentum_1 > 0.0 {
        score += 5;
        reasons.push(format!("positive momentum (+{:.2}%)", ind.momentum_1));
    } else if ind.momentum_1 < 0.0 {
        score += 5;
        reasons.push(format!("negative momentum ({:.2}%)", ind.momentum_1));
    }

    // candlestick reversals reinforce only an agreeing direction
    if patterns.bullish_engulfing {
        set_if_hold(&mut direction, Direction::Buy);
        if direction == Direction::Buy {
            score += 25;
            reasons.push("bullish engulfing pattern".to_string());
        }
    }
    if patterns.bearish_engulfing {
        set_if_hold(&mut direction, Direction::Sell);
        if direction == Direction::Sell {
            score += 25;
            reasons.push("bearish engulfing pattern".to_string());
        }
    }
    if patterns.hammer {
        set_if_hold(&mut direction, Direction::Buy);
        if direction == Direction::Buy {
            score += 20;
            reasons.push("hammer pattern".to_string());
        }
    }
    if patterns.shooting_star {
        set_if_hold(&mut direction, Direction::Sell);
        if direction == Direction::Sell {
            score += 20;
            reasons.push("shooting star pattern".to_string());
        }
    }
    if patterns.morning_star {
        set_if_hold(&mut direction, Direction::Buy);
        if direction == Direction::Buy {
            score += 25;
            reasons.push("morning star pattern".to_string());
        }
    }
    if patterns.evening_star {
        set_if_hold(&mut direction, Direction::Sell);
        if direction == Direction::Sell {
            score += 25;
            reasons.push("evening star pattern".to_string());
        }
    }

    let confidence = score.clamp(0, CONFIDENCE_CEILING) as u8;
    let (stop_loss, take_profit) = price_levels(direction, price, ind.atr);

    Signal {
        symbol: symbol.to_string(),
        timeframe,
        expiry,
        direction,
        confidence,
        current_price: price,
        entry_price: price,
        stop_loss,
        take_profit,
        reasons,
        indicators: ind.clone(),
        patterns: *patterns,
        freshness,
        generated_at: Utc::now(),
    }
}

/// Volatility-proportional stop/target, asymmetric by direction. HOLD gets
/// the short-side geometry so the risk stage always sees finite distances.
fn price_levels(direction: Direction, entry: f64, atr: f64) -> (f64, f64) {
    let dist = if atr > 0.0 {
        atr
    } else {
        entry * FALLBACK_DIST_PCT
    };
    match direction {
        Direction::Buy => (
            entry - STOP_ATR_MULT * dist,
            entry + TARGET_ATR_MULT * dist,
        ),
        Direction::Sell | Direction::Hold => (
            entry + STOP_ATR_MULT * dist,
            entry - TARGET_ATR_MULT * dist,
        ),
    }
}

// ============================================================
// Service facade
// ============================================================

/// Front-facing entry point: Provider → Indicators/Patterns → Aggregator →
/// Limiter increment, then (separately) the risk stage.
pub struct SignalService {
    provider: Arc<dyn PriceProvider>,
    settings: Settings,
    limiter: SessionLimiter,
}

impl SignalService {
    pub fn new(provider: Arc<dyn PriceProvider>, settings: Settings) -> Self {
        let limiter = SessionLimiter::new(settings.max_daily_signals);
        Self {
            provider,
            settings,
            limiter,
        }
    }

    /// Swap in a pre-built limiter (tests inject a fake clock through this).
    pub fn with_limiter(
        provider: Arc<dyn PriceProvider>,
        settings: Settings,
        limiter: SessionLimiter,
    ) -> Self {
        Self {
            provider,
            settings,
            limiter,
        }
    }

    /// Generate one signal. Never fails: provider trouble degrades to the
    /// simulated fixture, short series to neutral placeholders.
    pub async fn generate_signal(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        expiry: Timeframe,
    ) -> Signal {
        let signal = match self
            .provider
            .fetch(symbol, timeframe, self.settings.lookback_bars)
            .await
        {
            Ok(series) if !series.bars.is_empty() => {
                match IndicatorSet::compute(&series, &self.settings) {
                    Ok(indicators) => {
                        let patterns = PatternSet::detect(&series.bars);
                        let freshness = if series.bars.len() >= MIN_BARS {
                            Freshness::Live
                        } else {
                            log::warn!(
                                "{symbol}: only {} bars, running degraded",
                                series.bars.len()
                            );
                            Freshness::Degraded
                        };
                        aggregate(&indicators, &patterns, symbol, timeframe, expiry, freshness)
                    }
                    Err(e) => {
                        log::warn!("{symbol}: indicator battery failed: {e}");
                        Signal::simulated(symbol, timeframe, expiry)
                    }
                }
            }
            Ok(_) => {
                log::warn!("{symbol}: provider returned an empty series");
                Signal::simulated(symbol, timeframe, expiry)
            }
            Err(e) => {
                log::warn!("{symbol}: provider error: {e}");
                Signal::simulated(symbol, timeframe, expiry)
            }
        };

        self.limiter.record_signal_sent();
        log::info!(
            "{symbol} {timeframe} -> {:?} ({}%, {:?})",
            signal.direction,
            signal.confidence,
            signal.freshness
        );
        signal
    }

    pub fn assess_risk(&self, signal: &Signal, account_balance: f64) -> RiskAssessment {
        risk::assess(signal, account_balance, &self.settings, &self.limiter)
    }

    pub fn session_summary(&self) -> DailySummary {
        self.limiter.summary()
    }

    pub fn record_trade(&self, profit_loss: f64) {
        self.limiter.record_trade(profit_loss);
    }
}

// =======================================================================
// UNIT TESTS
// =======================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn base_indicators(price: f64) -> IndicatorSet {
        IndicatorSet {
            current_price: price,
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            bb_upper: price * 1.01,
            bb_middle: price,
            bb_lower: price * 0.99,
            ma10: price,
            ma20: price,
            ma50: price,
            stoch_k: 50.0,
            stoch_d: 50.0,
            adx: 20.0,
            williams_r: -50.0,
            cci: 0.0,
            atr: price * 0.002,
            volume_sma: 100.0,
            momentum_1: 0.0,
            momentum_5: 0.0,
            volatility_pct: 0.5,
            support: price * 0.985,
            resistance: price * 1.015,
        }
    }

    fn run(ind: &IndicatorSet, patterns: &PatternSet) -> Signal {
        aggregate(
            ind,
            patterns,
            "EURUSD=X",
            Timeframe::M5,
            Timeframe::M5,
            Freshness::Live,
        )
    }

    //------------------------------------------------------------------
    // Scenario A: oversold + bullish MACD + lower-band touch + above MA20
    //------------------------------------------------------------------
    #[test]
    fn oversold_confluence_is_a_confident_buy() {
        let mut ind = base_indicators(1.0850);
        ind.rsi = 25.0;
        ind.macd = 0.0020;
        ind.macd_signal = 0.0010;
        ind.bb_lower = 1.0850; // price sits on the lower band
        ind.bb_middle = 1.0880;
        ind.bb_upper = 1.0910;
        ind.ma20 = 1.0800;

        let signal = run(&ind, &PatternSet::default());
        assert_eq!(signal.direction, Direction::Buy);
        assert!(signal.confidence >= 60, "confidence {}", signal.confidence);
        assert!(signal.take_profit > signal.entry_price);
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.reasons.iter().any(|r| r.contains("RSI oversold")));
    }

    //------------------------------------------------------------------
    // Scenario B: overbought + bearish MACD + upper-band touch
    //------------------------------------------------------------------
    #[test]
    fn overbought_confluence_is_a_confident_sell() {
        let mut ind = base_indicators(1.0950);
        ind.rsi = 75.0;
        ind.macd = -0.0020;
        ind.macd_signal = -0.0010;
        ind.bb_lower = 1.0890;
        ind.bb_middle = 1.0920;
        ind.bb_upper = 1.0950; // price sits on the upper band

        let signal = run(&ind, &PatternSet::default());
        assert_eq!(signal.direction, Direction::Sell);
        assert!(signal.confidence >= 60, "confidence {}", signal.confidence);
        assert!(signal.take_profit < signal.entry_price);
        assert!(signal.stop_loss > signal.entry_price);
    }

    //------------------------------------------------------------------
    // Tie-break: first mover wins, later rules only add score
    //------------------------------------------------------------------
    #[test]
    fn later_bearish_rule_cannot_flip_an_earlier_buy() {
        let mut ind = base_indicators(1.0960);
        ind.rsi = 50.0; // neutral, sets nothing
        ind.macd = 0.0020; // bullish crossover fires first -> BUY
        ind.macd_signal = 0.0010;
        ind.bb_lower = 1.0890;
        ind.bb_middle = 1.0920;
        ind.bb_upper = 1.0950; // price above upper band: strongly bearish
        ind.momentum_1 = -0.5; // strongly negative momentum, also bearish

        let signal = run(&ind, &PatternSet::default());
        assert_eq!(
            signal.direction,
            Direction::Buy,
            "a later bearish rule must not overturn the first mover"
        );
        // the bearish evidence still shows up in score and reasons
        assert!(signal
            .reasons
            .iter()
            .any(|r| r.contains("upper Bollinger band")));
    }

    #[test]
    fn disagreeing_pattern_adds_no_score() {
        let mut ind = base_indicators(1.0960);
        ind.macd = 0.0020; // BUY first
        ind.macd_signal = 0.0010;
        let mut bearish = PatternSet::default();
        bearish.evening_star = true;

        let with_pattern = run(&ind, &bearish);
        let without = run(&ind, &PatternSet::default());
        assert_eq!(with_pattern.direction, Direction::Buy);
        assert_eq!(with_pattern.confidence, without.confidence);
    }

    //------------------------------------------------------------------
    // Confidence ceiling & determinism
    //------------------------------------------------------------------
    #[test]
    fn confidence_never_exceeds_95() {
        let mut ind = base_indicators(1.0850);
        ind.rsi = 15.0;
        ind.macd = 0.0030;
        ind.macd_signal = 0.0010;
        ind.bb_lower = 1.0850;
        ind.bb_middle = 1.0900;
        ind.bb_upper = 1.0950;
        ind.ma20 = 1.0800;
        ind.ma50 = 1.0750;
        ind.stoch_k = 10.0;
        ind.stoch_d = 12.0;
        ind.momentum_1 = 0.30;
        let mut patterns = PatternSet::default();
        patterns.bullish_engulfing = true;
        patterns.hammer = true;
        patterns.morning_star = true;

        let signal = run(&ind, &patterns);
        assert_eq!(signal.confidence, 95);
        assert_eq!(signal.confidence_label(), "VERY HIGH");
    }

    #[test]
    fn aggregation_is_deterministic() {
        let mut ind = base_indicators(1.0900);
        ind.rsi = 35.0;
        ind.macd = 0.0004;
        ind.macd_signal = 0.0007;
        let a = run(&ind, &PatternSet::default());
        let b = run(&ind, &PatternSet::default());
        assert_eq!(a.direction, b.direction);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reasons, b.reasons);
        assert_eq!(a.stop_loss, b.stop_loss);
        assert_eq!(a.take_profit, b.take_profit);
    }

    //------------------------------------------------------------------
    // Levels & fallback
    //------------------------------------------------------------------
    #[test]
    fn zero_atr_still_yields_finite_stop_distance() {
        let mut ind = base_indicators(1.0900);
        ind.atr = 0.0;
        let signal = run(&ind, &PatternSet::default());
        assert!(signal.stop_loss != signal.entry_price);
        assert!(signal.take_profit != signal.entry_price);
    }

    #[test]
    fn simulated_signal_is_flagged_and_well_formed() {
        let signal = Signal::simulated("GBPUSD=X", Timeframe::M15, Timeframe::M30);
        assert_eq!(signal.freshness, Freshness::Simulated);
        assert_eq!(signal.symbol, "GBPUSD=X");
        assert!(signal.confidence <= 95);
        assert!(signal.current_price > 0.0);
        assert!(signal.stop_loss > 0.0);
        assert!(signal
            .reasons
            .first()
            .expect("fallback reason present")
            .contains("market simulation"));
    }

    #[test]
    fn confidence_buckets() {
        let mut signal = Signal::simulated("EURUSD=X", Timeframe::M5, Timeframe::M5);
        signal.confidence = 85;
        assert_eq!(signal.confidence_label(), "VERY HIGH");
        signal.confidence = 60;
        assert_eq!(signal.confidence_label(), "HIGH");
        signal.confidence = 45;
        assert_eq!(signal.confidence_label(), "MEDIUM");
        signal.confidence = 20;
        assert_eq!(signal.confidence_label(), "LOW");
    }
}
