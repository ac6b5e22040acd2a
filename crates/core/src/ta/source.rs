use crate::config::Settings;
use crate::ta::{DailyBar, Lookback, PriceHistorySource};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const BASE_URL: &str = "https://www.alphavantage.co";
const TIMEOUT_SECS: u64 = 15;

/// Daily OHLCV history from the Alpha Vantage TIME_SERIES_DAILY endpoint.
#[derive(Debug, Clone)]
pub struct AlphaVantageDaily {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct DailySeriesResponse {
    #[serde(rename = "Time Series (Daily)", default)]
    series: BTreeMap<String, DailyEntry>,
}

#[derive(Debug, Deserialize)]
struct DailyEntry {
    #[serde(rename = "1. open", default)]
    open: String,
    #[serde(rename = "2. high", default)]
    high: String,
    #[serde(rename = "3. low", default)]
    low: String,
    #[serde(rename = "4. close", default)]
    close: String,
    #[serde(rename = "5. volume", default)]
    volume: String,
}

impl AlphaVantageDaily {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_alpha_vantage_api_key()?.to_string();
        let base_url =
            std::env::var("ALPHA_VANTAGE_BASE_URL").unwrap_or_else(|_| BASE_URL.to_string());
        let timeout_secs = crate::config::env_u64("MARKET_DATA_TIMEOUT_SECS", TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build market data http client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl PriceHistorySource for AlphaVantageDaily {
    async fn daily_bars(&self, symbol: &str, lookback: Lookback) -> Result<Vec<DailyBar>> {
        let url = format!("{}/query", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .get(url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("outputsize", "full"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("market data request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read market data response")?;
        if !status.is_success() {
            anyhow::bail!("market data HTTP {status}: {text}");
        }

        let body: DailySeriesResponse = serde_json::from_str(&text)
            .with_context(|| format!("unexpected market data response: {text}"))?;
        anyhow::ensure!(!body.series.is_empty(), "empty daily series for {symbol}");

        // BTreeMap keys are ISO dates, so iteration is already oldest first.
        let mut bars = Vec::with_capacity(body.series.len());
        for (date, entry) in &body.series {
            let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
                continue;
            };
            let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
                parse_num(&entry.open),
                parse_num(&entry.high),
                parse_num(&entry.low),
                parse_num(&entry.close),
                parse_num(&entry.volume),
            ) else {
                continue;
            };
            bars.push(DailyBar {
                date,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        anyhow::ensure!(!bars.is_empty(), "no parsable bars for {symbol}");

        if bars.len() > lookback.bars() {
            bars.drain(..bars.len() - lookback.bars());
        }
        Ok(bars)
    }
}

fn parse_num(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_daily_series_shape() {
        let v = json!({
            "Meta Data": {"2. Symbol": "IBM"},
            "Time Series (Daily)": {
                "2026-02-02": {
                    "1. open": "101.0", "2. high": "103.0", "3. low": "100.0",
                    "4. close": "102.5", "5. volume": "4100000"
                },
                "2026-02-03": {
                    "1. open": "102.5", "2. high": "105.0", "3. low": "102.0",
                    "4. close": "104.0", "5. volume": "3900000"
                }
            }
        });
        let body: DailySeriesResponse = serde_json::from_value(v).unwrap();
        assert_eq!(body.series.len(), 2);
        let first = body.series.values().next().unwrap();
        assert_eq!(parse_num(&first.close), Some(102.5));
    }

    #[test]
    fn skips_malformed_entries() {
        assert_eq!(parse_num(""), None);
        assert_eq!(parse_num("n/a"), None);
        assert_eq!(parse_num(" 12.5 "), Some(12.5));
    }
}
