//! Centralised market-data access for the signal pipeline.
//! -----------------------------------------------------------------
//! ‣ Keeps provider code in *one* place (separation of concerns).
//! ‣ Exposes the narrow [`PriceProvider`] seam the pipeline depends on.
//! ‣ Agnostic to data source – add new connectors behind the trait.
//!
//! Usage from the signal engine:
//! ```ignore
//! let series = provider.fetch("EURUSD=X", Timeframe::M5, 120).await?;
//! ```
//! -----------------------------------------------------------------

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::errors::ProviderError;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Chronological bar series for one symbol/timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// Analysis/expiry timeframes the caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Interval string understood by the Yahoo chart endpoint.
    ///
    /// Yahoo has no native 2h/4h interval; those map to 1h and the caller
    /// gets finer bars than asked for, which is harmless for the envelope
    /// maths downstream.
    fn yahoo_interval(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 | Timeframe::H2 | Timeframe::H4 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    /// Fetch range wide enough to cover a ~120-bar lookback per interval.
    fn yahoo_range(&self) -> &'static str {
        match self {
            Timeframe::M1 | Timeframe::M5 => "1d",
            Timeframe::M15 | Timeframe::M30 => "5d",
            Timeframe::H1 | Timeframe::H2 | Timeframe::H4 => "1mo",
            Timeframe::D1 => "6mo",
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "2h" => Ok(Timeframe::H2),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(ProviderError::Other(format!("unknown timeframe '{other}'"))),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------------------------------------------------------------
// Provider seam – gives the pipeline a surface for mocking
// -------------------------------------------------------------------------

/// Narrow interface the pipeline depends on. Any error or empty series is
/// treated as "no live data", never as a fatal condition.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback_bars: usize,
    ) -> Result<PriceSeries, ProviderError>;
}

// ================================================================
// Yahoo Finance chart connector
// ================================================================

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// REST connector for the public Yahoo v8 chart endpoint.
pub struct YahooChartProvider {
    client: reqwest::Client,
}

impl YahooChartProvider {
    pub fn new(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PriceProvider for YahooChartProvider {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback_bars: usize,
    ) -> Result<PriceSeries, ProviderError> {
        let url = format!(
            "{YAHOO_CHART_URL}/{symbol}?interval={}&range={}",
            timeframe.yahoo_interval(),
            timeframe.yahoo_range(),
        );

        let body = self.client.get(&url).send().await?.text().await?;
        let payload: YahooChartResponse = serde_json::from_str(&body)?;

        let mut series = decode_chart(symbol, timeframe, payload)?;

        // keep only the requested tail
        if series.bars.len() > lookback_bars {
            let cut = series.bars.len() - lookback_bars;
            series.bars.drain(..cut);
        }
        Ok(series)
    }
}

/// Turn the decoded chart payload into a clean bar series, dropping the
/// null rows Yahoo emits for halted minutes.
fn decode_chart(
    symbol: &str,
    timeframe: Timeframe,
    payload: YahooChartResponse,
) -> Result<PriceSeries, ProviderError> {
    let result = payload
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| ProviderError::Empty(symbol.to_string()))?;

    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Empty(symbol.to_string()))?;

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let row = (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
        );
        if let (Some(open), Some(high), Some(low), Some(close)) = row {
            let volume = quote
                .volume
                .get(i)
                .copied()
                .flatten()
                .unwrap_or(0.0);
            let ts = DateTime::<Utc>::from_timestamp(ts, 0)
                .ok_or_else(|| ProviderError::Decode(format!("bad timestamp {ts}")))?;
            bars.push(PriceBar {
                ts,
                open,
                high,
                low,
                close,
                volume,
            });
        }
    }

    if bars.is_empty() {
        return Err(ProviderError::Empty(symbol.to_string()));
    }

    Ok(PriceSeries {
        symbol: symbol.to_string(),
        timeframe,
        bars,
    })
}

/* ─────────────────────────────────────────  Yahoo wire structs ─ */

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooChartResult>>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}
