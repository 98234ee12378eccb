//! ──────────────────────────────────────────────────────────────────────────
//! Technical-indicator battery
//! ──────────────────────────────────────────────────────────────────────────
//! * Recomputed fresh on every request – the series is request-scoped,
//!   there is no incremental/streaming state.
//! * Indicators whose window exceeds the series length degrade to a neutral
//!   placeholder instead of failing the whole computation; downstream stages
//!   rely on every field always being present.
//! ──────────────────────────────────────────────────────────────────────────

use serde::Serialize;
use statrs::statistics::{Data as StatsData, Distribution};

use crate::config::settings::Settings;
use crate::services::market_data::{PriceBar, PriceSeries};
use crate::utils::errors::IndicatorError;

/// Bars needed for the full battery; below this the set is degraded.
pub const MIN_BARS: usize = 20;

const STOCH_PERIOD: usize = 14;
const STOCH_SMOOTH: usize = 3;
const ADX_PERIOD: usize = 14;
const WILLIAMS_PERIOD: usize = 14;
const CCI_PERIOD: usize = 20;
const ATR_PERIOD: usize = 14;
const ENVELOPE_WINDOW: usize = 20;
const VOLUME_SMA_PERIOD: usize = 20;

/// Most-recent scalar value of every indicator the aggregator and the risk
/// stage consume.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSet {
    pub current_price: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub ma10: f64,
    pub ma20: f64,
    pub ma50: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub adx: f64,
    pub williams_r: f64,
    pub cci: f64,
    pub atr: f64,
    pub volume_sma: f64,
    /// Close-over-close change at a 1-bar lag, in percent.
    pub momentum_1: f64,
    /// Close-over-close change at a 5-bar lag, in percent.
    pub momentum_5: f64,
    /// Standard deviation of percent returns, in percent.
    pub volatility_pct: f64,
    pub support: f64,
    pub resistance: f64,
}

impl IndicatorSet {
    /// Compute the battery for a series. Fails only on an empty series;
    /// anything shorter than an individual window degrades that indicator
    /// to its neutral placeholder.
    pub fn compute(series: &PriceSeries, settings: &Settings) -> Result<Self, IndicatorError> {
        let bars = &series.bars;
        if bars.is_empty() {
            return Err(IndicatorError::InsufficientData { got: 0, need: 1 });
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let price = *closes.last().expect("non-empty");
        let last_volume = bars.last().map(|b| b.volume).unwrap_or(0.0);

        let (macd, macd_signal) = macd_lines(
            &closes,
            settings.macd_fast,
            settings.macd_slow,
            settings.macd_signal,
        )
        .unwrap_or((0.0, 0.0));

        let (bb_middle, bb_upper, bb_lower) =
            bollinger(&closes, settings.bollinger_period, settings.bollinger_std)
                .unwrap_or((price, price, price));

        let (stoch_k, stoch_d) =
            stochastic(bars, STOCH_PERIOD, STOCH_SMOOTH).unwrap_or((50.0, 50.0));

        let (support, resistance) =
            rolling_envelope(bars, ENVELOPE_WINDOW).unwrap_or((price, price));

        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        Ok(Self {
            current_price: price,
            rsi: rsi(&closes, settings.rsi_period).unwrap_or(50.0),
            macd,
            macd_signal,
            macd_histogram: macd - macd_signal,
            bb_upper,
            bb_middle,
            bb_lower,
            ma10: sma_tail(&closes, 10).unwrap_or(price),
            ma20: sma_tail(&closes, 20).unwrap_or(price),
            ma50: sma_tail(&closes, 50).unwrap_or(price),
            stoch_k,
            stoch_d,
            adx: adx(bars, ADX_PERIOD).unwrap_or(0.0),
            williams_r: williams_r(bars, WILLIAMS_PERIOD).unwrap_or(-50.0),
            cci: cci(bars, CCI_PERIOD).unwrap_or(0.0),
            atr: average_true_range(bars, ATR_PERIOD).unwrap_or(0.0),
            volume_sma: sma_tail(&volumes, VOLUME_SMA_PERIOD).unwrap_or(last_volume),
            momentum_1: momentum(&closes, 1).unwrap_or(0.0),
            momentum_5: momentum(&closes, 5).unwrap_or(0.0),
            volatility_pct: volatility_pct(&closes).unwrap_or(0.0),
            support,
            resistance,
        })
    }
}

// ============================================================
// Rolling-window helpers
// ============================================================

/// SMA over the last `period` values. None if the slice is shorter.
fn sma_tail(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let slice = &values[values.len() - period..];
    Some(slice.iter().sum::<f64>() / period as f64)
}

/// Recursive EMA over the whole slice, seeded with the first value.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = match values.first() {
        Some(&v) => v,
        None => return out,
    };
    out.push(prev);
    for &v in &values[1..] {
        prev = prev + alpha * (v - prev);
        out.push(prev);
    }
    out
}

/// RSI over a rolling window of price deltas.
///
/// Zero average loss is defined as RSI = 100 (strong uptrend); a completely
/// flat window reads neutral 50.
fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 || period == 0 {
        return None;
    }
    let window = &closes[closes.len() - period - 1..];
    let (mut gains, mut losses) = (0.0, 0.0);
    for w in window.windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line (EMA fast − EMA slow) and its signal line (EMA of the MACD).
fn macd_lines(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<(f64, f64)> {
    if closes.len() < 2 {
        return None;
    }
    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    let macd: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd, signal);
    Some((*macd.last()?, *signal_line.last()?))
}

/// Calculate mid, upper, lower bands. Returns None if insufficient data.
fn bollinger(closes: &[f64], period: usize, std_dev_factor: f64) -> Option<(f64, f64, f64)> {
    if closes.len() < period || period == 0 {
        return None;
    }
    let slice = &closes[closes.len() - period..];
    let sma = slice.iter().sum::<f64>() / period as f64;
    let var = slice.iter().map(|&p| (p - sma).powi(2)).sum::<f64>() / period as f64;
    let std = var.sqrt();
    Some((sma, sma + std_dev_factor * std, sma - std_dev_factor * std))
}

/// %K over the window, %D = SMA of the last `smooth` %K values.
/// A flat window (high == low) reads as 50.
fn stochastic(bars: &[PriceBar], period: usize, smooth: usize) -> Option<(f64, f64)> {
    if bars.len() < period + smooth - 1 {
        return None;
    }
    let k_at = |end: usize| -> f64 {
        let window = &bars[end - period..end];
        let hh = window.iter().fold(f64::MIN, |a, b| a.max(b.high));
        let ll = window.iter().fold(f64::MAX, |a, b| a.min(b.low));
        let close = bars[end - 1].close;
        if hh - ll <= f64::EPSILON {
            50.0
        } else {
            100.0 * (close - ll) / (hh - ll)
        }
    };
    let n = bars.len();
    let ks: Vec<f64> = (0..smooth).map(|i| k_at(n - i)).collect();
    let k = ks[0];
    let d = ks.iter().sum::<f64>() / smooth as f64;
    Some((k, d))
}

fn true_range(prev: &PriceBar, curr: &PriceBar) -> f64 {
    (curr.high - curr.low)
        .max((curr.high - prev.close).abs())
        .max((curr.low - prev.close).abs())
}

/// Arithmetic mean of the last `n` true ranges.
fn average_true_range(bars: &[PriceBar], n: usize) -> Option<f64> {
    if bars.len() <= n {
        return None;
    }
    let mut trs = Vec::with_capacity(n);
    for w in bars.windows(2).rev().take(n) {
        trs.push(true_range(&w[0], &w[1]));
    }
    Some(trs.iter().sum::<f64>() / n as f64)
}

/// Wilder smoothing (alpha = 1/period), seeded with the first value.
fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = match values.first() {
        Some(&v) => v,
        None => return out,
    };
    out.push(prev);
    for &v in &values[1..] {
        prev = prev + (v - prev) / period as f64;
        out.push(prev);
    }
    out
}

/// ADX: ±DM and TR are Wilder-smoothed into ±DI, whose spread (DX) is
/// Wilder-smoothed again. Needs roughly two full periods of bars.
fn adx(bars: &[PriceBar], period: usize) -> Option<f64> {
    if bars.len() < 2 * period + 1 {
        return None;
    }
    let n = bars.len();
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut tr = Vec::with_capacity(n - 1);

    for w in bars.windows(2) {
        let high_diff = w[1].high - w[0].high;
        let low_diff = w[0].low - w[1].low;
        plus_dm.push(if high_diff > low_diff && high_diff > 0.0 {
            high_diff
        } else {
            0.0
        });
        minus_dm.push(if low_diff > high_diff && low_diff > 0.0 {
            low_diff
        } else {
            0.0
        });
        tr.push(true_range(&w[0], &w[1]));
    }

    let s_tr = wilder_smooth(&tr, period);
    let s_plus = wilder_smooth(&plus_dm, period);
    let s_minus = wilder_smooth(&minus_dm, period);

    let dx: Vec<f64> = (0..s_tr.len())
        .map(|i| {
            if s_tr[i] == 0.0 {
                return 0.0;
            }
            let plus_di = 100.0 * s_plus[i] / s_tr[i];
            let minus_di = 100.0 * s_minus[i] / s_tr[i];
            let di_sum = plus_di + minus_di;
            if di_sum == 0.0 {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / di_sum
            }
        })
        .collect();

    wilder_smooth(&dx, period).last().copied()
}

/// Williams %R: −100·(HH − C)/(HH − LL); a flat window reads −50.
fn williams_r(bars: &[PriceBar], period: usize) -> Option<f64> {
    if bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    let hh = window.iter().fold(f64::MIN, |a, b| a.max(b.high));
    let ll = window.iter().fold(f64::MAX, |a, b| a.min(b.low));
    let close = bars.last()?.close;
    if hh - ll <= f64::EPSILON {
        return Some(-50.0);
    }
    Some(-100.0 * (hh - close) / (hh - ll))
}

/// CCI over typical prices; zero mean deviation reads 0.
fn cci(bars: &[PriceBar], period: usize) -> Option<f64> {
    if bars.len() < period {
        return None;
    }
    let tps: Vec<f64> = bars[bars.len() - period..]
        .iter()
        .map(|b| (b.high + b.low + b.close) / 3.0)
        .collect();
    let sma = tps.iter().sum::<f64>() / period as f64;
    let mean_dev = tps.iter().map(|tp| (tp - sma).abs()).sum::<f64>() / period as f64;
    if mean_dev == 0.0 {
        return Some(0.0);
    }
    Some((tps.last()? - sma) / (0.015 * mean_dev))
}

/// Percent change of the last close against the close `lag` bars back.
fn momentum(closes: &[f64], lag: usize) -> Option<f64> {
    if closes.len() < lag + 1 {
        return None;
    }
    let curr = *closes.last()?;
    let past = closes[closes.len() - 1 - lag];
    if past == 0.0 {
        return None;
    }
    Some((curr - past) / past * 100.0)
}

/// Standard deviation of percent returns, in percent.
fn volatility_pct(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return None;
    }
    StatsData::new(returns).std_dev().map(|sd| sd * 100.0)
}

/// Simple support/resistance envelope: rolling min(low)/max(high) over the
/// trailing window. Not a level-clustering algorithm.
fn rolling_envelope(bars: &[PriceBar], window: usize) -> Option<(f64, f64)> {
    if bars.len() < window {
        return None;
    }
    let slice = &bars[bars.len() - window..];
    let resistance = slice.iter().fold(f64::MIN, |a, b| a.max(b.high));
    let support = slice.iter().fold(f64::MAX, |a, b| a.min(b.low));
    Some((support, resistance))
}

// =======================================================================
// UNIT TESTS
// =======================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::market_data::Timeframe;
    use chrono::{TimeZone, Utc};

    fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar {
            ts: Utc.timestamp_opt(1_700_000_000 + (i as i64) * 60, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    fn series_from_closes(closes: &[f64]) -> PriceSeries {
        PriceSeries {
            symbol: "EURUSD=X".into(),
            timeframe: Timeframe::M5,
            bars: closes
                .iter()
                .enumerate()
                .map(|(i, &c)| bar(i, c, c + 0.5, c - 0.5, c))
                .collect(),
        }
    }

    //------------------------------------------------------------------
    // RSI
    //------------------------------------------------------------------
    #[test]
    fn rsi_zero_loss_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_zero_gain_is_0() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let v = rsi(&closes, 14).unwrap();
        assert!(v.abs() < 1e-9);
    }

    #[test]
    fn rsi_flat_is_neutral() {
        let closes = vec![100.0; 20];
        assert_eq!(rsi(&closes, 14), Some(50.0));
    }

    #[test]
    fn rsi_always_bounded() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i * 37) % 11) as f64 - 5.0)
            .collect();
        let v = rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&v), "RSI out of bounds: {v}");
    }

    //------------------------------------------------------------------
    // Bollinger
    //------------------------------------------------------------------
    #[test]
    fn bollinger_hand_check() {
        // constant series: std = 0, all three bands collapse onto the SMA
        let closes = vec![10.0; 25];
        let (mid, upper, lower) = bollinger(&closes, 20, 2.0).unwrap();
        assert_eq!(mid, 10.0);
        assert_eq!(upper, 10.0);
        assert_eq!(lower, 10.0);
    }

    #[test]
    fn bollinger_bands_bracket_mean() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i % 5) as f64).collect();
        let (mid, upper, lower) = bollinger(&closes, 20, 2.0).unwrap();
        assert!(lower < mid && mid < upper);
    }

    #[test]
    fn bollinger_len_guard() {
        assert!(bollinger(&[1.0; 10], 20, 2.0).is_none());
    }

    //------------------------------------------------------------------
    // ATR / ADX / envelope
    //------------------------------------------------------------------
    #[test]
    fn atr_len_guard() {
        assert!(average_true_range(&[], 14).is_none());
    }

    #[test]
    fn atr_of_unit_ranges() {
        let bars: Vec<PriceBar> = (0..20).map(|i| bar(i, 10.0, 10.5, 9.5, 10.0)).collect();
        let atr = average_true_range(&bars, 14).unwrap();
        assert!((atr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn adx_bounded_and_elevated_in_trend() {
        let bars: Vec<PriceBar> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 5.0;
                bar(i, base - 1.0, base + 3.0, base - 3.0, base + 2.0)
            })
            .collect();
        let v = adx(&bars, 14).unwrap();
        assert!((0.0..=100.0).contains(&v), "ADX out of bounds: {v}");
        assert!(v > 10.0, "ADX should be elevated in a strong trend, got {v}");
    }

    #[test]
    fn adx_too_few_bars() {
        let bars: Vec<PriceBar> = (0..10).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0)).collect();
        assert!(adx(&bars, 14).is_none());
    }

    #[test]
    fn envelope_brackets_closes() {
        let bars: Vec<PriceBar> = (0..25)
            .map(|i| bar(i, 10.0, 10.0 + (i % 3) as f64, 9.0 - (i % 2) as f64, 10.0))
            .collect();
        let (support, resistance) = rolling_envelope(&bars, 20).unwrap();
        assert!(support <= 9.0);
        assert!(resistance >= 12.0);
    }

    //------------------------------------------------------------------
    // Oscillators
    //------------------------------------------------------------------
    #[test]
    fn stochastic_at_window_top() {
        let mut bars: Vec<PriceBar> = (0..20).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0)).collect();
        let last = bars.last_mut().unwrap();
        last.close = 11.0; // close at the window high
        let (k, _d) = stochastic(&bars, 14, 3).unwrap();
        assert!((k - 100.0).abs() < 1e-9);
    }

    #[test]
    fn stochastic_flat_window_is_50() {
        let bars: Vec<PriceBar> = (0..20).map(|i| bar(i, 10.0, 10.0, 10.0, 10.0)).collect();
        let (k, d) = stochastic(&bars, 14, 3).unwrap();
        assert_eq!(k, 50.0);
        assert_eq!(d, 50.0);
    }

    #[test]
    fn williams_r_range() {
        let bars: Vec<PriceBar> = (0..20).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0)).collect();
        let v = williams_r(&bars, 14).unwrap();
        assert!((-100.0..=0.0).contains(&v));
    }

    //------------------------------------------------------------------
    // Full battery & degradation
    //------------------------------------------------------------------
    #[test]
    fn empty_series_is_insufficient_data() {
        let series = PriceSeries {
            symbol: "EURUSD=X".into(),
            timeframe: Timeframe::M5,
            bars: vec![],
        };
        assert!(matches!(
            IndicatorSet::compute(&series, &Settings::default()),
            Err(IndicatorError::InsufficientData { .. })
        ));
    }

    #[test]
    fn short_series_degrades_to_neutral_placeholders() {
        let series = series_from_closes(&[1.10, 1.11, 1.12]);
        let set = IndicatorSet::compute(&series, &Settings::default()).unwrap();
        assert_eq!(set.rsi, 50.0);
        assert_eq!(set.bb_middle, set.current_price);
        assert_eq!(set.bb_upper, set.current_price);
        assert_eq!(set.bb_lower, set.current_price);
        assert_eq!(set.ma50, set.current_price);
        assert_eq!(set.adx, 0.0);
        assert_eq!(set.atr, 0.0);
        assert_eq!(set.stoch_k, 50.0);
        assert_eq!(set.williams_r, -50.0);
    }

    #[test]
    fn full_series_populates_every_field() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 1.09 + ((i * 13) % 7) as f64 * 0.001)
            .collect();
        let series = series_from_closes(&closes);
        let set = IndicatorSet::compute(&series, &Settings::default()).unwrap();
        assert!((0.0..=100.0).contains(&set.rsi));
        assert!(set.bb_lower <= set.bb_middle && set.bb_middle <= set.bb_upper);
        assert!(set.atr > 0.0);
        assert!(set.support <= set.resistance);
        assert!(set.volatility_pct >= 0.0);
    }

    #[test]
    fn momentum_matches_hand_calc() {
        let closes = vec![100.0, 100.0, 100.0, 100.0, 100.0, 102.0];
        let m1 = momentum(&closes, 1).unwrap();
        let m5 = momentum(&closes, 5).unwrap();
        assert!((m1 - 2.0).abs() < 1e-9);
        assert!((m5 - 2.0).abs() < 1e-9);
    }
}
