use dotenv::dotenv;
use std::env;

/// Runtime configuration for the signal core.
///
/// Every knob has a documented default so the engine runs without a `.env`
/// file; overrides come from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Percent of the account risked per trade.
    pub risk_percentage: f64,
    /// Hard cap on the computed position size.
    pub max_position_size: f64,
    /// Daily signal cap enforced by the session limiter.
    pub max_daily_signals: u32,
    /// Balance assumed when the caller does not supply one.
    pub account_balance: f64,

    // indicator windows
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,

    /// How many bars to request from the provider.
    pub lookback_bars: usize,
    /// Bounded wait for the provider fetch, in seconds.
    pub http_timeout_secs: u64,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // loads `.env` file automatically

        Ok(Self {
            risk_percentage: parse_var("RISK_PERCENTAGE", 2.0)?,
            max_position_size: parse_var("MAX_POSITION_SIZE", 100.0)?,
            max_daily_signals: parse_var("MAX_DAILY_SIGNALS", 50u32)?,
            account_balance: parse_var("ACCOUNT_BALANCE", 1000.0)?,
            rsi_period: parse_var("RSI_PERIOD", 14usize)?,
            macd_fast: parse_var("MACD_FAST", 12usize)?,
            macd_slow: parse_var("MACD_SLOW", 26usize)?,
            macd_signal: parse_var("MACD_SIGNAL", 9usize)?,
            bollinger_period: parse_var("BOLLINGER_PERIOD", 20usize)?,
            bollinger_std: parse_var("BOLLINGER_STD", 2.0)?,
            lookback_bars: parse_var("LOOKBACK_BARS", 120usize)?,
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", 10u64)?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            risk_percentage: 2.0,
            max_position_size: 100.0,
            max_daily_signals: 50,
            account_balance: 1000.0,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
            lookback_bars: 120,
            http_timeout_secs: 10,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    key: &str,
    default: T,
) -> Result<T, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{key} must be a valid {}", std::any::type_name::<T>()).into()),
        Err(_) => Ok(default),
    }
}

// ======================================================================
// UNIT TESTS
// ======================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.risk_percentage, 2.0);
        assert_eq!(s.max_position_size, 100.0);
        assert_eq!(s.max_daily_signals, 50);
        assert_eq!(s.account_balance, 1000.0);
        assert_eq!(s.rsi_period, 14);
        assert_eq!(s.macd_fast, 12);
        assert_eq!(s.macd_slow, 26);
        assert_eq!(s.macd_signal, 9);
        assert_eq!(s.bollinger_period, 20);
    }

    #[test]
    fn env_override_wins() {
        env::set_var("ONNIX_TEST_PARSE", "7");
        let v: u32 = parse_var("ONNIX_TEST_PARSE", 3u32).unwrap();
        assert_eq!(v, 7);
        env::remove_var("ONNIX_TEST_PARSE");
    }

    #[test]
    fn bad_env_value_errors() {
        env::set_var("ONNIX_TEST_BAD", "not-a-number");
        assert!(parse_var::<u32>("ONNIX_TEST_BAD", 3).is_err());
        env::remove_var("ONNIX_TEST_BAD");
    }
}
