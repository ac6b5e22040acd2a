use crate::config::Settings;
use crate::domain::article::SentimentLabel;
use crate::sentiment::guard::{CircuitBreaker, RollingWindowLimiter};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const MIN_TEXT_CHARS: usize = 20;
const DEFAULT_MAX_CALLS_PER_MINUTE: usize = 100;
const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_COOLDOWN_SECS: u64 = 120;
const MODEL_TIMEOUT_SECS: u64 = 30;
const MAX_BATCH_SHRINKS: u32 = 2;

/// Raw classifier output before normalization. `score` stays a JSON value
/// because hosted models have shipped floats, percentage numbers, and
/// stringly-typed scores.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSentiment {
    pub label: String,
    pub score: Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentScore {
    pub label: SentimentLabel,
    pub confidence: f64,
}

impl SentimentScore {
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            confidence: 0.0,
        }
    }
}

/// Opaque text classifier. Implementations must be safe to call
/// concurrently; batch calls preserve input order.
#[async_trait::async_trait]
pub trait SentimentModel: Send + Sync {
    async fn classify(&self, text: &str) -> Result<RawSentiment>;

    async fn classify_batch(&self, texts: &[String]) -> Result<Vec<RawSentiment>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.classify(text).await?);
        }
        Ok(out)
    }
}

/// Hosted inference endpoint speaking the Hugging Face Inference API shape:
/// `POST {base}` with `{"inputs": ...}`, response `[[{label, score}]]`.
#[derive(Debug, Clone)]
pub struct HttpSentimentModel {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpSentimentModel {
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let Some(url) = settings.sentiment_api_url.clone() else {
            return Ok(None);
        };
        let timeout_secs = crate::config::env_u64("SENTIMENT_TIMEOUT_SECS", MODEL_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build sentiment model http client")?;
        Ok(Some(Self {
            http,
            url,
            token: settings.sentiment_api_token.clone(),
        }))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }
        Ok(headers)
    }

    async fn infer(&self, inputs: Value) -> Result<Vec<RawSentiment>> {
        let res = self
            .http
            .post(&self.url)
            .headers(self.headers()?)
            .json(&serde_json::json!({ "inputs": inputs }))
            .send()
            .await
            .context("sentiment model request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read sentiment model response")?;
        if !status.is_success() {
            anyhow::bail!("sentiment model HTTP {status}: {text}");
        }

        // Each input yields a list of (label, score) candidates; the first
        // entry is the dominant class.
        let candidates: Vec<Vec<RawSentiment>> = serde_json::from_str(&text)
            .with_context(|| format!("unexpected sentiment model response: {text}"))?;
        candidates
            .into_iter()
            .map(|mut c| {
                anyhow::ensure!(!c.is_empty(), "sentiment model returned no candidates");
                Ok(c.swap_remove(0))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SentimentModel for HttpSentimentModel {
    async fn classify(&self, text: &str) -> Result<RawSentiment> {
        let mut results = self.infer(Value::String(text.to_string())).await?;
        anyhow::ensure!(!results.is_empty(), "sentiment model returned empty result");
        Ok(results.swap_remove(0))
    }

    async fn classify_batch(&self, texts: &[String]) -> Result<Vec<RawSentiment>> {
        let results = self.infer(serde_json::to_value(texts)?).await?;
        anyhow::ensure!(
            results.len() == texts.len(),
            "sentiment model returned {} results for {} inputs",
            results.len(),
            texts.len()
        );
        Ok(results)
    }
}

/// Rate-limited, circuit-broken wrapper around an opaque classifier.
/// Every failure path degrades to `{neutral, 0.0}`; callers are never
/// blocked and never see an error.
pub struct SentimentScorer {
    model: Option<Arc<dyn SentimentModel>>,
    limiter: RollingWindowLimiter,
    breaker: CircuitBreaker,
    warmup: tokio::sync::OnceCell<()>,
}

impl SentimentScorer {
    pub fn new(model: Option<Arc<dyn SentimentModel>>) -> Self {
        let max_calls =
            crate::config::env_usize("SENTIMENT_MAX_CALLS_PER_MINUTE", DEFAULT_MAX_CALLS_PER_MINUTE);
        Self {
            model,
            limiter: RollingWindowLimiter::new(max_calls, Duration::from_secs(60)),
            breaker: CircuitBreaker::new(
                BREAKER_THRESHOLD,
                Duration::from_secs(crate::config::env_u64(
                    "SENTIMENT_BREAKER_COOLDOWN_SECS",
                    BREAKER_COOLDOWN_SECS,
                )),
            ),
            warmup: tokio::sync::OnceCell::new(),
        }
    }

    /// Single-flight warm probe: hosted models cold-start, and the first
    /// real scoring call should not eat that latency alone. Failures are
    /// ignored; the breaker only tracks real calls.
    async fn ensure_warm(&self, model: &Arc<dyn SentimentModel>) {
        self.warmup
            .get_or_init(|| async {
                if let Err(err) = model.classify("warming up the sentiment model").await {
                    tracing::debug!(error = %err, "sentiment warmup probe failed");
                }
            })
            .await;
    }

    pub async fn score(&self, text: &str) -> SentimentScore {
        if text.trim().chars().count() < MIN_TEXT_CHARS {
            return SentimentScore::neutral();
        }
        let Some(model) = self.model.as_ref() else {
            return SentimentScore::neutral();
        };
        self.ensure_warm(model).await;
        if !self.breaker.allow().await {
            tracing::debug!("sentiment circuit open; degrading to neutral");
            return SentimentScore::neutral();
        }
        if !self.limiter.try_acquire().await {
            tracing::warn!("sentiment rate limit exceeded; degrading to neutral");
            return SentimentScore::neutral();
        }

        match model.classify(text).await {
            Ok(raw) => {
                self.breaker.record_success().await;
                normalize(&raw)
            }
            Err(err) => {
                self.breaker.record_failure().await;
                tracing::warn!(error = %err, "sentiment model call failed; degrading to neutral");
                SentimentScore::neutral()
            }
        }
    }

    /// Batch variant with the same degradation rules. Output is 1:1 with
    /// input: gated entries (too short, over budget) get a synthetic neutral
    /// result at their original position.
    pub async fn score_batch(&self, texts: &[String]) -> Vec<SentimentScore> {
        let mut out = vec![SentimentScore::neutral(); texts.len()];
        let Some(model) = self.model.as_ref() else {
            return out;
        };
        self.ensure_warm(model).await;
        if !self.breaker.allow().await {
            tracing::debug!("sentiment circuit open; degrading batch to neutral");
            return out;
        }

        let mut eligible: Vec<(usize, String)> = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            if text.trim().chars().count() < MIN_TEXT_CHARS {
                continue;
            }
            if !self.limiter.try_acquire().await {
                tracing::warn!(
                    dropped = texts.len() - idx,
                    "sentiment rate limit exhausted mid-batch; remaining inputs degrade to neutral"
                );
                break;
            }
            eligible.push((idx, text.clone()));
        }
        if eligible.is_empty() {
            return out;
        }

        // Explicit shrink loop: a failing oversized batch is retried in
        // halves a bounded number of times, then degraded, never recursed.
        let mut shrinks = 0;
        let mut queue: std::collections::VecDeque<Vec<(usize, String)>> =
            std::collections::VecDeque::new();
        queue.push_back(eligible);
        while let Some(chunk) = queue.pop_front() {
            let inputs: Vec<String> = chunk.iter().map(|(_, t)| t.clone()).collect();
            match model.classify_batch(&inputs).await {
                Ok(results) => {
                    self.breaker.record_success().await;
                    for ((idx, _), raw) in chunk.iter().zip(results.iter()) {
                        out[*idx] = normalize(raw);
                    }
                }
                Err(err) if chunk.len() > 1 && shrinks < MAX_BATCH_SHRINKS => {
                    shrinks += 1;
                    let mid = chunk.len() / 2;
                    tracing::warn!(
                        error = %err,
                        batch = chunk.len(),
                        shrinks,
                        "sentiment batch failed; splitting and retrying"
                    );
                    let mut chunk = chunk;
                    let tail = chunk.split_off(mid);
                    queue.push_front(tail);
                    queue.push_front(chunk);
                }
                Err(err) => {
                    self.breaker.record_failure().await;
                    tracing::warn!(error = %err, "sentiment batch failed; degrading chunk to neutral");
                }
            }
        }
        out
    }
}

/// Clamp model confidence into [0, 1]. Values reported as percentages are
/// scaled down; non-numeric scores fall back to 0.5.
fn normalize(raw: &RawSentiment) -> SentimentScore {
    let confidence = match raw.score.as_f64() {
        Some(v) if v > 1.0 => (v / 100.0).clamp(0.0, 1.0),
        Some(v) => v.clamp(0.0, 1.0),
        None => raw
            .score
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|v| if v > 1.0 { v / 100.0 } else { v })
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(0.5),
    };
    SentimentScore {
        label: SentimentLabel::parse(&raw.label),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedModel {
        label: &'static str,
        score: Value,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn new(label: &'static str, score: Value) -> Self {
            Self {
                label,
                score,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SentimentModel for FixedModel {
        async fn classify(&self, _text: &str) -> Result<RawSentiment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawSentiment {
                label: self.label.to_string(),
                score: self.score.clone(),
            })
        }
    }

    struct FailingModel;

    #[async_trait::async_trait]
    impl SentimentModel for FailingModel {
        async fn classify(&self, _text: &str) -> Result<RawSentiment> {
            anyhow::bail!("model offline")
        }
    }

    const LONG_TEXT: &str = "market rallies on strong quarterly earnings data";

    #[tokio::test]
    async fn missing_model_degrades_to_neutral() {
        let scorer = SentimentScorer::new(None);
        let s = scorer.score(LONG_TEXT).await;
        assert_eq!(s, SentimentScore::neutral());
    }

    #[tokio::test]
    async fn short_text_degrades_without_calling_model() {
        let model = Arc::new(FixedModel::new("positive", json!(0.9)));
        let scorer = SentimentScorer::new(Some(model.clone()));
        let s = scorer.score("market rallies").await;
        assert_eq!(s, SentimentScore::neutral());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scores_and_normalizes_percentages() {
        let model = Arc::new(FixedModel::new("positive", json!(87.5)));
        let scorer = SentimentScorer::new(Some(model));
        let s = scorer.score(LONG_TEXT).await;
        assert_eq!(s.label, SentimentLabel::Positive);
        assert!((s.confidence - 0.875).abs() < 1e-9);
    }

    #[tokio::test]
    async fn non_numeric_score_falls_back_to_half() {
        let model = Arc::new(FixedModel::new("negative", json!({"weird": true})));
        let scorer = SentimentScorer::new(Some(model));
        let s = scorer.score(LONG_TEXT).await;
        assert_eq!(s.label, SentimentLabel::Negative);
        assert!((s.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures() {
        let scorer = SentimentScorer::new(Some(Arc::new(FailingModel)));
        for _ in 0..3 {
            assert_eq!(scorer.score(LONG_TEXT).await, SentimentScore::neutral());
        }
        // Circuit is open now; the model is no longer consulted but callers
        // still get a neutral answer.
        assert_eq!(scorer.score(LONG_TEXT).await, SentimentScore::neutral());
    }

    #[tokio::test]
    async fn batch_preserves_order_with_gated_inputs() {
        let model = Arc::new(FixedModel::new("positive", json!(0.8)));
        let scorer = SentimentScorer::new(Some(model));
        let texts = vec![
            "too short".to_string(),
            LONG_TEXT.to_string(),
            "".to_string(),
            "regulators approve the long awaited merger deal".to_string(),
        ];
        let scores = scorer.score_batch(&texts).await;
        assert_eq!(scores.len(), 4);
        assert_eq!(scores[0], SentimentScore::neutral());
        assert_eq!(scores[1].label, SentimentLabel::Positive);
        assert_eq!(scores[2], SentimentScore::neutral());
        assert_eq!(scores[3].label, SentimentLabel::Positive);
    }
}
