use crate::config::Settings;
use crate::domain::recommendation::{Action, Horizon, RiskProfile};
use crate::fusion::SentimentAggregate;
use crate::ta::TechnicalSnapshot;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;

const ADVISOR_TIMEOUT_SECS: u64 = 45;
const MAX_NEW_TOKENS: u32 = 400;

/// Optional free-text advisory opinion on top of the deterministic fusion
/// path. Any failure here falls back silently; the advisor can never make a
/// request fail.
#[async_trait::async_trait]
pub trait AdvisoryClient: Send + Sync {
    async fn advise(&self, prompt: &str) -> Result<String>;
}

/// Hosted text-generation endpoint (Hugging Face Inference API shape).
#[derive(Debug, Clone)]
pub struct HttpAdvisoryClient {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    #[serde(default)]
    generated_text: String,
}

impl HttpAdvisoryClient {
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let Some(url) = settings.advisor_api_url.clone() else {
            return Ok(None);
        };
        let timeout_secs = crate::config::env_u64("ADVISOR_TIMEOUT_SECS", ADVISOR_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build advisor http client")?;
        Ok(Some(Self {
            http,
            url,
            token: settings.advisor_api_token.clone(),
        }))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl AdvisoryClient for HttpAdvisoryClient {
    async fn advise(&self, prompt: &str) -> Result<String> {
        let res = self
            .http
            .post(&self.url)
            .headers(self.headers()?)
            .json(&serde_json::json!({
                "inputs": prompt,
                "parameters": { "max_new_tokens": MAX_NEW_TOKENS },
            }))
            .send()
            .await
            .context("advisor request failed")?;

        let status = res.status();
        let text = res.text().await.context("failed to read advisor response")?;
        if !status.is_success() {
            anyhow::bail!("advisor HTTP {status}: {text}");
        }

        let body: Vec<GeneratedText> = serde_json::from_str(&text)
            .with_context(|| format!("unexpected advisor response: {text}"))?;
        let generated = body
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .unwrap_or_default();
        anyhow::ensure!(!generated.trim().is_empty(), "advisor returned empty text");
        Ok(generated)
    }
}

/// Structured prompt handed to the advisory model. Numbers only, no raw
/// article text: the model sees the same evidence the fallback logic uses.
pub fn build_prompt(
    snapshot: &TechnicalSnapshot,
    aggregate: &SentimentAggregate,
    risk: RiskProfile,
    horizon: Horizon,
) -> String {
    let trend = if snapshot.current_price > snapshot.sma_50 {
        "bullish"
    } else {
        "bearish"
    };
    let regime = serde_json::to_value(snapshot.regime.regime)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "neutral".to_string());
    let key_themes = if aggregate.key_phrases.is_empty() {
        "none identified".to_string()
    } else {
        aggregate.key_phrases.join(", ")
    };

    format!(
        "### TECHNICAL ###\n\
         price: {price:.2}\n\
         trend: {trend} (50d {sma50:.2}, 200d {sma200:.2})\n\
         rsi14: {rsi:.1}\n\
         volatility: {vol:.2}\n\
         market regime: {regime} (confidence {regime_conf:.0})\n\
         ### SENTIMENT ###\n\
         score: {score:+.2} over {count} articles\n\
         distribution: +{pos} ={neu} -{neg}\n\
         key themes: {key_themes}\n\
         ### CONTEXT ###\n\
         risk tolerance: {risk:?}\n\
         horizon: {horizon:?}\n\
         ### INSTRUCTIONS ###\n\
         Respond with:\n\
         [RECOMMENDATION]\n\
         <STRONG_BUY|BUY|HOLD|SELL|STRONG_SELL> - one sentence\n",
        price = snapshot.current_price,
        trend = trend,
        sma50 = snapshot.sma_50,
        sma200 = snapshot.sma_200,
        rsi = snapshot.rsi_14,
        vol = snapshot.volatility,
        regime = regime,
        regime_conf = snapshot.regime.confidence,
        score = aggregate.score,
        count = aggregate.article_count,
        pos = aggregate.distribution.positive,
        neu = aggregate.distribution.neutral,
        neg = aggregate.distribution.negative,
        key_themes = key_themes,
        risk = risk,
        horizon = horizon,
    )
}

/// Pull the verdict line out of advisory text. Looks for the
/// `[RECOMMENDATION]` marker first, then falls back to the first non-empty
/// line.
pub fn parse_advisory_action(text: &str) -> Option<Action> {
    let after_marker = text
        .split("[RECOMMENDATION]")
        .nth(1)
        .unwrap_or(text);
    after_marker
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(Action::from_advisory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ta::{RegimeReading, TechnicalSnapshot};

    #[test]
    fn parses_marked_recommendation() {
        let text = "some preamble\n[RECOMMENDATION]\nBUY - earnings momentum\n[RATIONALE]\n- x";
        assert_eq!(parse_advisory_action(text), Some(Action::Buy));
    }

    #[test]
    fn parses_unmarked_first_line() {
        assert_eq!(
            parse_advisory_action("STRONG_SELL - deteriorating fundamentals"),
            Some(Action::StrongSell)
        );
    }

    #[test]
    fn unknown_verdicts_yield_none() {
        assert_eq!(parse_advisory_action("[RECOMMENDATION]\nACCUMULATE"), None);
        assert_eq!(parse_advisory_action(""), None);
    }

    #[test]
    fn prompt_includes_the_evidence() {
        let mut snapshot = TechnicalSnapshot::neutral("IBM");
        snapshot.current_price = 105.0;
        snapshot.sma_50 = 100.0;
        snapshot.sma_200 = 95.0;
        snapshot.regime = RegimeReading::neutral();
        let aggregate = SentimentAggregate::empty();

        let prompt = build_prompt(
            &snapshot,
            &aggregate,
            RiskProfile::Medium,
            Horizon::MediumTerm,
        );
        assert!(prompt.contains("price: 105.00"));
        assert!(prompt.contains("trend: bullish"));
        assert!(prompt.contains("[RECOMMENDATION]"));
    }
}
