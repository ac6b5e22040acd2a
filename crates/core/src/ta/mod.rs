pub mod analyzer;
pub mod indicators;
pub mod source;

pub use analyzer::TechnicalAnalyzer;
pub use source::AlphaVantageDaily;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    OneYear,
    TwoYears,
}

impl Lookback {
    /// Trading-day bar counts.
    pub fn bars(&self) -> usize {
        match self {
            Lookback::OneYear => 252,
            Lookback::TwoYears => 504,
        }
    }
}

/// Opaque daily price history source. Bars are returned oldest first.
#[async_trait::async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn daily_bars(&self, symbol: &str, lookback: Lookback) -> anyhow::Result<Vec<DailyBar>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Neutral,
}

impl MarketRegime {
    /// Multiplier applied to sentiment aggregates and technical confidence.
    pub fn multiplier(&self) -> f64 {
        match self {
            MarketRegime::Bull => 1.1,
            MarketRegime::Bear => 0.9,
            MarketRegime::Neutral => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: MarketRegime,
    pub confidence: f64,
}

impl RegimeReading {
    pub fn neutral() -> Self {
        Self {
            regime: MarketRegime::Neutral,
            confidence: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PercentileRank {
    pub sector: f64,
    pub market: f64,
}

impl Default for PercentileRank {
    fn default() -> Self {
        Self {
            sector: 50.0,
            market: 50.0,
        }
    }
}

/// Price-derived indicator snapshot. Ephemeral: recomputed per request,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    pub rsi_14: f64,
    pub volatility: f64,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub obv: Option<f64>,
    pub adx: Option<f64>,
    pub regime: RegimeReading,
    pub percentile_rank: PercentileRank,
    pub confidence: f64,
}

impl TechnicalSnapshot {
    /// Degraded snapshot returned when price data cannot be fetched. The
    /// zero price is the downstream signal that analysis failed; fusion
    /// refuses to recommend on it.
    pub fn neutral(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            current_price: 0.0,
            sma_50: 0.0,
            sma_200: 0.0,
            rsi_14: 50.0,
            volatility: 0.0,
            macd: None,
            macd_signal: None,
            obv: None,
            adx: None,
            regime: RegimeReading::neutral(),
            percentile_rank: PercentileRank::default(),
            confidence: 0.0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.current_price == 0.0
    }
}
