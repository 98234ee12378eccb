// src/utils/errors.rs

use thiserror::Error;

/// Errors coming from the price-series provider (HTTP, JSON, empty payloads).
///
/// Any of these mean "no live data" to the pipeline; callers never see them
/// directly, they see a `Simulated` signal instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no price data returned for {0}")]
    Empty(String),
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

/// Errors at the indicator-engine level.
///
/// `InsufficientData` is only raised for an empty series; a series that is
/// merely shorter than an indicator window degrades to neutral placeholders.
#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("series too short: {got} bars, need at least {need}")]
    InsufficientData { got: usize, need: usize },
}
