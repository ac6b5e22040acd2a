use crate::ta::indicators::{adx, annualized_volatility, macd, obv, sma, wilder_rsi};
use crate::ta::{
    DailyBar, Lookback, MarketRegime, PercentileRank, PriceHistorySource, RegimeReading,
    TechnicalSnapshot,
};
use std::sync::Arc;

/// Fewer bars than this at the default lookback triggers a silent widening
/// of the window before giving up.
const MIN_BARS: usize = 60;
const DEFAULT_BENCHMARK: &str = "SPY";

const LOW_VOLATILITY: f64 = 0.2;
const HIGH_VOLATILITY: f64 = 0.3;
const REGIME_THRESHOLD: f64 = 0.6;

pub struct TechnicalAnalyzer {
    source: Arc<dyn PriceHistorySource>,
    benchmark: String,
}

impl TechnicalAnalyzer {
    pub fn new(source: Arc<dyn PriceHistorySource>) -> Self {
        let benchmark =
            std::env::var("REGIME_BENCHMARK").unwrap_or_else(|_| DEFAULT_BENCHMARK.to_string());
        Self { source, benchmark }
    }

    /// Compute a snapshot for `symbol`. Never fails: any data problem
    /// degrades to the neutral snapshot so downstream fusion has a single
    /// shape to branch on.
    pub async fn analyze(&self, symbol: &str) -> TechnicalSnapshot {
        let Some(bars) = self.fetch_bars(symbol).await else {
            return TechnicalSnapshot::neutral(symbol);
        };
        let regime = self.market_regime().await;
        compute_snapshot(symbol, &bars, regime)
    }

    async fn fetch_bars(&self, symbol: &str) -> Option<Vec<DailyBar>> {
        let bars = match self.source.daily_bars(symbol, Lookback::OneYear).await {
            Ok(bars) => bars,
            Err(err) => {
                tracing::warn!(%symbol, error = %err, "price history fetch failed");
                return None;
            }
        };
        if bars.len() >= MIN_BARS {
            return Some(bars);
        }

        tracing::debug!(%symbol, bars = bars.len(), "thin history; widening lookback to 2y");
        match self.source.daily_bars(symbol, Lookback::TwoYears).await {
            Ok(wide) if wide.len() >= 2 => Some(wide),
            Ok(_) | Err(_) => {
                if bars.len() >= 2 {
                    Some(bars)
                } else {
                    None
                }
            }
        }
    }

    /// Coarse bull/bear/neutral vote over a benchmark index. A full year of
    /// bars so the 200-day average can actually form. Degrades to neutral
    /// with confidence 50 when the benchmark cannot be read.
    async fn market_regime(&self) -> RegimeReading {
        let bars = match self
            .source
            .daily_bars(&self.benchmark, Lookback::OneYear)
            .await
        {
            Ok(bars) if bars.len() >= 2 => bars,
            Ok(_) => return RegimeReading::neutral(),
            Err(err) => {
                tracing::warn!(benchmark = %self.benchmark, error = %err, "regime fetch failed");
                return RegimeReading::neutral();
            }
        };
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        regime_vote(&closes)
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Weighted regime vote: price above the 50- and 200-day averages and calm
/// trailing volatility push bull; the inverse pushes bear. An average that
/// cannot be formed from the window contributes to neither side.
fn regime_vote(closes: &[f64]) -> RegimeReading {
    let price = *closes.last().expect("non-empty closes");
    let sma_50 = sma(closes, 50);
    let sma_200 = sma(closes, 200);
    let vol = annualized_volatility(closes).unwrap_or(0.0);

    let above = |avg: Option<f64>| avg.map(|a| price > a).unwrap_or(false);
    let below = |avg: Option<f64>| avg.map(|a| price < a).unwrap_or(false);

    let bull = 0.4 * flag(above(sma_50))
        + 0.4 * flag(above(sma_200))
        + 0.2 * flag(vol < LOW_VOLATILITY);
    let bear = 0.4 * flag(below(sma_50))
        + 0.4 * flag(below(sma_200))
        + 0.2 * flag(vol > HIGH_VOLATILITY);

    let confidence = (100.0 * (bull - bear).abs()).clamp(0.0, 100.0);
    let regime = if bull > REGIME_THRESHOLD {
        MarketRegime::Bull
    } else if bear > REGIME_THRESHOLD {
        MarketRegime::Bear
    } else {
        MarketRegime::Neutral
    };
    RegimeReading { regime, confidence }
}

fn compute_snapshot(symbol: &str, bars: &[DailyBar], regime: RegimeReading) -> TechnicalSnapshot {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let current_price = *closes.last().expect("analyzer requires bars");

    // Thin histories fall back to the mean of everything available rather
    // than producing NaN comparisons downstream.
    let mean_all = closes.iter().sum::<f64>() / closes.len() as f64;
    let sma_50 = sma(&closes, 50).unwrap_or(mean_all);
    let sma_200 = sma(&closes, 200).unwrap_or(mean_all);
    let rsi_14 = wilder_rsi(&closes, 14).unwrap_or(50.0);
    let volatility = annualized_volatility(&closes).unwrap_or(0.0);
    let macd_pair = macd(&closes);
    let obv_value = obv(&closes, &volumes);
    let adx_value = adx(bars, 14);

    let confidence = composite_confidence(
        current_price,
        sma_50,
        sma_200,
        rsi_14,
        macd_pair,
        &volumes,
        adx_value,
        obv_value,
        volatility,
        regime.regime,
    );

    TechnicalSnapshot {
        symbol: symbol.to_string(),
        current_price,
        sma_50,
        sma_200,
        rsi_14,
        volatility,
        macd: macd_pair.map(|(line, _)| line),
        macd_signal: macd_pair.map(|(_, signal)| signal),
        obv: obv_value,
        adx: adx_value,
        regime,
        percentile_rank: PercentileRank::default(),
        confidence,
    }
}

/// Weighted sum of boolean/continuous signals, weights summing to 100,
/// scaled by the regime multiplier and clamped to [0, 100].
#[allow(clippy::too_many_arguments)]
fn composite_confidence(
    price: f64,
    sma_50: f64,
    sma_200: f64,
    rsi: f64,
    macd_pair: Option<(f64, f64)>,
    volumes: &[f64],
    adx: Option<f64>,
    obv: Option<f64>,
    volatility: f64,
    regime: MarketRegime,
) -> f64 {
    let above_50 = price > sma_50;
    let above_200 = price > sma_200;
    let rsi_healthy = rsi > 30.0 && rsi < 70.0;
    let macd_bullish = macd_pair.map(|(line, signal)| line > signal).unwrap_or(false);
    let volume_ok = match (volumes.last(), sma(volumes, 20)) {
        (Some(last), Some(avg)) => *last > avg,
        _ => false,
    };
    let trend_strength = adx.map(|a| (a / 25.0).min(1.0)).unwrap_or(0.0);
    let obv_sign = obv.map(f64::signum).unwrap_or(0.0);
    let volatility_penalty = ((volatility - 0.2) / 0.3).clamp(0.0, 1.0);

    let raw = 20.0 * flag(above_50)
        + 20.0 * flag(above_200)
        + 15.0 * flag(rsi_healthy)
        + 10.0 * flag(macd_bullish)
        + 10.0 * flag(volume_ok)
        + 10.0 * trend_strength
        + 5.0 * obv_sign
        + 10.0 * (1.0 - volatility_penalty);

    (raw * regime.multiplier()).clamp(0.0, 100.0)
}
