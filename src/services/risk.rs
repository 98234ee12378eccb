//! ──────────────────────────────────────────────────────────────────────────
//! Trade risk screening
//! ──────────────────────────────────────────────────────────────────────────
//! * Risk-reward + stop-distance + confidence + indicator-alignment scoring
//! * Position sizing against the account balance, capped by configuration
//! * Fails closed – bad price data yields REJECTED, never a crash
//! * The daily signal cap (session limiter) can downgrade any outcome
//! ──────────────────────────────────────────────────────────────────────────

use serde::Serialize;

use crate::config::settings::Settings;
use crate::services::session::SessionLimiter;
use crate::services::signal_engine::{Direction, Signal};

/// ─── Scoring constants ───────────────────────────────────────────────────
const MAX_STOP_PCT: f64 = 5.0; // stop further than 5% of price is risky
const MIN_STOP_PCT: f64 = 1.0; // tighter than 1% gets shaken out
const TRENDING_ADX: f64 = 30.0;
const REJECT_SCORE: i32 = 4; // above this the trade is refused
const REJECT_CONFIDENCE: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    #[serde(rename = "VERY_LOW")]
    VeryLow,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "VERY_HIGH")]
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recommendation {
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "CAUTION")]
    Caution,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "ERROR")]
    Error,
}

/// Stateless verdict on one signal; not persisted by the core.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub score: i32,
    pub risk_reward_ratio: f64,
    /// Stop distance in price units – the most that can be lost per unit.
    pub max_loss: f64,
    pub position_size: f64,
    pub recommendation: Recommendation,
    pub warnings: Vec<String>,
}

impl RiskAssessment {
    fn refused(recommendation: Recommendation, warning: &str) -> Self {
        Self {
            risk_level: RiskLevel::VeryHigh,
            score: 0,
            risk_reward_ratio: 0.0,
            max_loss: 0.0,
            position_size: 0.0,
            recommendation,
            warnings: vec![warning.to_string()],
        }
    }
}

/// ─── Public helpers ──────────────────────────────────────────────────────
/// `risk_amount = balance × risk% / 100`, `size = risk_amount / stop`,
/// capped at the configured maximum.
pub fn calculate_position_size(
    account_balance: f64,
    risk_percentage: f64,
    stop_distance: f64,
    max_position: f64,
) -> f64 {
    if stop_distance <= 0.0 {
        return 0.0;
    }
    let risk_amount = account_balance * (risk_percentage / 100.0);
    (risk_amount / stop_distance).min(max_position)
}

/// Score a signal for risk and issue the final recommendation.
///
/// Ordering matters: the daily-cap check runs last so it can downgrade an
/// otherwise-approved assessment unconditionally.
pub fn assess(
    signal: &Signal,
    account_balance: f64,
    settings: &Settings,
    limiter: &SessionLimiter,
) -> RiskAssessment {
    let price = signal.current_price;
    let stop_loss = signal.stop_loss;
    let take_profit = signal.take_profit;

    if !price.is_finite() || !stop_loss.is_finite() || !take_profit.is_finite() {
        return RiskAssessment::refused(Recommendation::Error, "non-finite price data");
    }
    if price == 0.0 || stop_loss == 0.0 {
        return RiskAssessment::refused(Recommendation::Rejected, "invalid price data");
    }

    let stop_distance = (price - stop_loss).abs();
    if stop_distance == 0.0 {
        return RiskAssessment::refused(
            Recommendation::Rejected,
            "stop loss equals entry price",
        );
    }

    let mut warnings: Vec<String> = Vec::new();
    let mut score: i32 = 0;

    // 1. risk-reward ratio, directionally correct
    let profit_distance = match signal.direction {
        Direction::Buy => take_profit - price,
        Direction::Sell | Direction::Hold => price - take_profit,
    };
    let risk_reward_ratio = profit_distance / stop_distance;

    if risk_reward_ratio < 1.0 {
        score += 3;
        warnings.push("poor risk-reward ratio".to_string());
    } else if risk_reward_ratio < 1.5 {
        score += 1;
    } else {
        score -= 1; // good risk-reward is rewarded
    }

    // 2. stop distance as a percentage of price
    let stop_pct = stop_distance / price * 100.0;
    if stop_pct > MAX_STOP_PCT {
        score += 2;
        warnings.push("high stop loss percentage".to_string());
    } else if stop_pct < MIN_STOP_PCT {
        score += 1;
        warnings.push("very tight stop loss".to_string());
    }

    // 3. signal confidence
    if signal.confidence < 30 {
        score += 2;
        warnings.push("low signal confidence".to_string());
    } else if signal.confidence > 70 {
        score -= 2;
    }

    // 4. indicator alignment with the called direction
    let ind = &signal.indicators;
    if ind.rsi > 30.0 && ind.rsi < 70.0 {
        score += 1;
    } else {
        score -= 1;
    }
    let macd_agrees = match signal.direction {
        Direction::Buy => ind.macd > ind.macd_signal,
        Direction::Sell | Direction::Hold => ind.macd < ind.macd_signal,
    };
    if macd_agrees {
        score += 1;
    } else {
        score -= 1;
    }

    // 5. trend strength
    if ind.adx > TRENDING_ADX {
        score += 1;
        warnings.push("high market volatility".to_string());
    }

    let risk_level = match score {
        i32::MIN..=-2 => RiskLevel::VeryLow,
        -1..=0 => RiskLevel::Low,
        1..=2 => RiskLevel::Medium,
        3..=4 => RiskLevel::High,
        _ => RiskLevel::VeryHigh,
    };

    let position_size = calculate_position_size(
        account_balance,
        settings.risk_percentage,
        stop_distance,
        settings.max_position_size,
    );

    let mut recommendation = if score > REJECT_SCORE || signal.confidence < REJECT_CONFIDENCE {
        Recommendation::Rejected
    } else if score > 2 {
        Recommendation::Caution
    } else {
        Recommendation::Approved
    };

    // the daily cap overrides everything above
    if limiter.is_daily_limit_reached() {
        recommendation = Recommendation::Rejected;
        warnings.push("daily signal limit reached".to_string());
    }

    RiskAssessment {
        risk_level,
        score,
        risk_reward_ratio,
        max_loss: stop_distance,
        position_size,
        recommendation,
        warnings,
    }
}

// ======================================================================
// UNIT TESTS
// ======================================================================
