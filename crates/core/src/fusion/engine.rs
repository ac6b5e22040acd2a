use crate::domain::article::{validate_symbol, Article, SentimentLabel};
use crate::domain::recommendation::{
    Action, PriceTargets, Recommendation, RecommendationResponse, RiskMetrics,
};
use crate::fusion::advisor::{build_prompt, parse_advisory_action, AdvisoryClient};
use crate::fusion::{SentimentAggregate, SentimentDistribution};
use crate::sentiment::reliability::tier_weight;
use crate::ta::{MarketRegime, TechnicalAnalyzer, TechnicalSnapshot};
use crate::storage::ArticleStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Articles older than this do not contribute to the aggregate.
const NEWS_WINDOW_HOURS: i64 = 72;
const NEWS_LIMIT: i64 = 100;
/// Sentiment decay half-life works out to ~16.6h with this divisor.
const RECENCY_DECAY_HOURS: f64 = 24.0;
const SENTIMENT_ACTION_THRESHOLD: f64 = 0.3;
const MAX_AGGREGATE_PHRASES: usize = 10;

const STOP_LOSS_FACTOR: f64 = 0.95;
const TAKE_PROFIT_FACTOR: f64 = 1.05;

#[derive(Debug, Clone, Copy, Default)]
pub struct FusionOptions {
    pub risk: crate::domain::recommendation::RiskProfile,
    pub horizon: crate::domain::recommendation::Horizon,
}

/// Combines the technical snapshot with aggregated news sentiment into one
/// risk-annotated recommendation.
pub struct SignalFusionEngine {
    analyzer: Arc<TechnicalAnalyzer>,
    store: Arc<dyn ArticleStore>,
    advisor: Option<Arc<dyn AdvisoryClient>>,
}

impl SignalFusionEngine {
    pub fn new(
        analyzer: Arc<TechnicalAnalyzer>,
        store: Arc<dyn ArticleStore>,
        advisor: Option<Arc<dyn AdvisoryClient>>,
    ) -> Self {
        Self {
            analyzer,
            store,
            advisor,
        }
    }

    pub async fn fuse(&self, symbol: &str, opts: FusionOptions) -> RecommendationResponse {
        let symbol = match validate_symbol(symbol) {
            Ok(s) => s,
            Err(err) => {
                return RecommendationResponse::Error {
                    symbol: symbol.to_string(),
                    message: err.to_string(),
                    generated_at: Utc::now(),
                };
            }
        };

        let snapshot = self.analyzer.analyze(&symbol).await;
        if snapshot.is_degraded() {
            tracing::warn!(%symbol, "technical analysis degraded; refusing to recommend");
            return RecommendationResponse::Error {
                symbol,
                message: "technical analysis failed".to_string(),
                generated_at: Utc::now(),
            };
        }

        let now = Utc::now();
        let since = now - ChronoDuration::hours(NEWS_WINDOW_HOURS);
        let articles = match self.store.recent(&symbol, since, NEWS_LIMIT).await {
            Ok(articles) => articles,
            Err(err) => {
                tracing::warn!(%symbol, error = %err, "article query failed; fusing without news");
                Vec::new()
            }
        };

        let aggregate = aggregate_sentiment(&articles, snapshot.regime.regime, now);
        let composite_confidence = composite_confidence(
            snapshot.confidence,
            aggregate.confidence,
            aggregate.avg_reliability,
        );

        let (action, source) = self.resolve_action(&snapshot, &aggregate, opts).await;
        let targets = price_targets(&snapshot, &aggregate, opts.risk);
        let risk = risk_metrics(&snapshot);
        let warnings = contrarian_warnings(&snapshot, &aggregate);
        let rationale = rationale(&snapshot, &aggregate);

        RecommendationResponse::Success {
            recommendation: Recommendation {
                symbol,
                action,
                action_confidence: action.confidence_tier(),
                horizon: opts.horizon,
                targets,
                risk,
                warnings,
                composite_confidence,
                rationale,
                source: source.to_string(),
                generated_at: now,
            },
        }
    }

    async fn resolve_action(
        &self,
        snapshot: &TechnicalSnapshot,
        aggregate: &SentimentAggregate,
        opts: FusionOptions,
    ) -> (Action, &'static str) {
        if let Some(advisor) = &self.advisor {
            let prompt = build_prompt(snapshot, aggregate, opts.risk, opts.horizon);
            match advisor.advise(&prompt).await {
                Ok(text) => match parse_advisory_action(&text) {
                    Some(action) => return (action, "advisor"),
                    None => {
                        tracing::warn!(symbol = %snapshot.symbol, "advisory text had no usable verdict");
                    }
                },
                Err(err) => {
                    tracing::warn!(symbol = %snapshot.symbol, error = %err, "advisor call failed");
                }
            }
        }
        (fallback_action(snapshot, aggregate.score), "fallback")
    }
}

/// Deterministic action when no advisory verdict is available: strong
/// sentiment confirmed by the 200-day trend buys or sells, anything else
/// holds.
pub fn fallback_action(snapshot: &TechnicalSnapshot, sentiment: f64) -> Action {
    if sentiment > SENTIMENT_ACTION_THRESHOLD && snapshot.current_price > snapshot.sma_200 {
        Action::Buy
    } else if sentiment < -SENTIMENT_ACTION_THRESHOLD && snapshot.current_price < snapshot.sma_200 {
        Action::Sell
    } else {
        Action::Hold
    }
}

/// Weighted sentiment over the article set. Each article contributes
/// `signed_label x confidence x (reliability/100) x recency x tier_weight`,
/// with exponential recency decay. The weighted mean is clipped, adjusted
/// for the market regime, and clipped again.
pub fn aggregate_sentiment(
    articles: &[Article],
    regime: MarketRegime,
    now: DateTime<Utc>,
) -> SentimentAggregate {
    if articles.is_empty() {
        return SentimentAggregate::empty();
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut confidence_sum = 0.0;
    let mut reliability_sum = 0.0;
    let mut distribution = SentimentDistribution::default();
    let mut source_weights = BTreeMap::new();
    let mut phrases = BTreeSet::new();

    for article in articles {
        let hours_old = (now - article.published_at).num_seconds().max(0) as f64 / 3600.0;
        let recency = (-hours_old / RECENCY_DECAY_HOURS).exp();
        let source_weight = tier_weight(&article.source);
        source_weights.insert(article.source.clone(), source_weight);

        let weight = article.sentiment_confidence
            * (article.source_reliability as f64 / 100.0)
            * recency
            * source_weight;
        weighted_sum += article.sentiment.signed_value() * weight;
        weight_total += weight;

        confidence_sum += article.sentiment_confidence;
        reliability_sum += article.source_reliability as f64;
        match article.sentiment {
            SentimentLabel::Positive => distribution.positive += 1,
            SentimentLabel::Neutral => distribution.neutral += 1,
            SentimentLabel::Negative => distribution.negative += 1,
        }
        phrases.extend(article.key_phrases.iter().cloned());
    }

    let count = articles.len() as f64;
    let mean = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    };
    let score = (mean.clamp(-1.0, 1.0) * regime.multiplier()).clamp(-1.0, 1.0);

    let mut key_phrases: Vec<String> = phrases.into_iter().collect();
    // Longest phrases first: they carry the most topical signal.
    key_phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    key_phrases.truncate(MAX_AGGREGATE_PHRASES);

    SentimentAggregate {
        score,
        confidence: (confidence_sum / count * 100.0).clamp(0.0, 100.0),
        distribution,
        key_phrases,
        source_weights,
        avg_reliability: reliability_sum / count,
        article_count: articles.len(),
    }
}

/// Weighted blend: technical 0.5, sentiment 0.3, source reliability 0.2.
pub fn composite_confidence(technical: f64, sentiment: f64, reliability: f64) -> f64 {
    (0.5 * technical + 0.3 * sentiment + 0.2 * reliability).clamp(0.0, 100.0)
}

/// Price targets scaled off the current price, nudged by sentiment and
/// widened or narrowed by risk appetite.
pub fn price_targets(
    snapshot: &TechnicalSnapshot,
    aggregate: &SentimentAggregate,
    risk: crate::domain::recommendation::RiskProfile,
) -> PriceTargets {
    use crate::domain::recommendation::RiskProfile;

    let nudge = aggregate.score * 0.1;
    let (bull_adj, bear_adj) = match risk {
        RiskProfile::High => (0.05, -0.05),
        RiskProfile::Medium => (0.0, 0.0),
        RiskProfile::Low => (-0.02, 0.02),
    };
    let price = snapshot.current_price;
    PriceTargets {
        base: price * (1.05 + nudge),
        bull: price * (1.15 + nudge + bull_adj),
        bear: price * (0.95 + nudge + bear_adj),
    }
}

/// Stop/take levels anchored on the long and short moving averages. A
/// degenerate stop (price at or below it) yields a zero ratio rather than
/// an infinite one.
pub fn risk_metrics(snapshot: &TechnicalSnapshot) -> RiskMetrics {
    let stop_loss = snapshot.sma_200 * STOP_LOSS_FACTOR;
    let take_profit = snapshot.sma_50 * TAKE_PROFIT_FACTOR;
    let denominator = snapshot.current_price - stop_loss;
    let risk_reward_ratio = if denominator.abs() > f64::EPSILON {
        (take_profit - snapshot.current_price) / denominator
    } else {
        tracing::warn!(symbol = %snapshot.symbol, "price sits on the stop level; zeroing risk/reward");
        0.0
    };
    RiskMetrics {
        stop_loss,
        take_profit,
        risk_reward_ratio,
    }
}

/// Overbought momentum against positive news (or the oversold inverse) is
/// flagged rather than silently fused away.
pub fn contrarian_warnings(
    snapshot: &TechnicalSnapshot,
    aggregate: &SentimentAggregate,
) -> Vec<String> {
    let mut warnings = Vec::new();
    if snapshot.rsi_14 > 70.0 && aggregate.score > 0.2 {
        warnings.push(format!(
            "overbought (RSI {:.1}) while sentiment is positive; upside may be priced in",
            snapshot.rsi_14
        ));
    }
    if snapshot.rsi_14 < 30.0 && aggregate.score < -0.2 {
        warnings.push(format!(
            "oversold (RSI {:.1}) while sentiment is negative; downside may be priced in",
            snapshot.rsi_14
        ));
    }
    warnings
}

fn rationale(snapshot: &TechnicalSnapshot, aggregate: &SentimentAggregate) -> Vec<String> {
    let trend = if snapshot.current_price > snapshot.sma_200 {
        "bullish"
    } else {
        "bearish"
    };
    let regime = match snapshot.regime.regime {
        MarketRegime::Bull => "bull",
        MarketRegime::Bear => "bear",
        MarketRegime::Neutral => "neutral",
    };
    vec![
        format!("technical trend: {trend} (price vs 200-day average)"),
        format!(
            "sentiment score {:+.2} across {} recent articles",
            aggregate.score, aggregate.article_count
        ),
        format!(
            "market regime: {regime} (confidence {:.0})",
            snapshot.regime.confidence
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::RiskProfile;
    use crate::storage::MemoryArticleStore;
    use crate::ta::{DailyBar, Lookback, PriceHistorySource, RegimeReading};
    use anyhow::Result;
    use serde_json::json;

    fn snapshot(price: f64, sma_50: f64, sma_200: f64, regime: MarketRegime) -> TechnicalSnapshot {
        TechnicalSnapshot {
            symbol: "IBM".to_string(),
            current_price: price,
            sma_50,
            sma_200,
            rsi_14: 55.0,
            volatility: 0.18,
            macd: Some(0.5),
            macd_signal: Some(0.3),
            obv: Some(1.0e6),
            adx: Some(28.0),
            regime: RegimeReading {
                regime,
                confidence: 80.0,
            },
            percentile_rank: Default::default(),
            confidence: 70.0,
        }
    }

    fn article(
        sentiment: SentimentLabel,
        confidence: f64,
        reliability: u8,
        source: &str,
        hours_old: i64,
        now: DateTime<Utc>,
    ) -> Article {
        let published_at = now - ChronoDuration::hours(hours_old);
        Article {
            symbol: "IBM".to_string(),
            title: "t".to_string(),
            raw_title: "T".to_string(),
            summary: String::new(),
            source: source.to_string(),
            source_reliability: reliability,
            url: None,
            banner_url: None,
            published_at,
            sentiment,
            sentiment_confidence: confidence,
            key_phrases: vec!["earnings".to_string()],
            fingerprint: format!("fp-{hours_old}-{source}"),
            raw_payload: json!({}),
            created_at: published_at,
            updated_at: published_at,
        }
    }

    #[test]
    fn scenario_bullish_fusion_resolves_to_buy_with_expected_risk_levels() {
        let snap = snapshot(105.0, 100.0, 95.0, MarketRegime::Bull);
        assert_eq!(fallback_action(&snap, 0.5), Action::Buy);

        let risk = risk_metrics(&snap);
        assert!((risk.stop_loss - 90.25).abs() < 1e-9);
        assert!((risk.take_profit - 105.0).abs() < 1e-9);
        assert!((risk.risk_reward_ratio - 0.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_requires_trend_confirmation() {
        // Positive sentiment but price below the 200-day average: hold.
        let below_trend = snapshot(90.0, 100.0, 95.0, MarketRegime::Neutral);
        assert_eq!(fallback_action(&below_trend, 0.5), Action::Hold);

        let bearish = snapshot(90.0, 100.0, 95.0, MarketRegime::Neutral);
        assert_eq!(fallback_action(&bearish, -0.5), Action::Sell);

        let weak_signal = snapshot(105.0, 100.0, 95.0, MarketRegime::Bull);
        assert_eq!(fallback_action(&weak_signal, 0.2), Action::Hold);
    }

    #[test]
    fn aggregate_is_empty_for_no_articles() {
        let agg = aggregate_sentiment(&[], MarketRegime::Bull, Utc::now());
        assert_eq!(agg.score, 0.0);
        assert_eq!(agg.confidence, 0.0);
        assert_eq!(agg.article_count, 0);
    }

    #[test]
    fn aggregate_weights_recency_and_tier() {
        let now = Utc::now();
        // A fresh tier-1 positive against a day-old low-tier negative.
        let articles = vec![
            article(SentimentLabel::Positive, 0.9, 95, "Reuters", 1, now),
            article(SentimentLabel::Negative, 0.9, 50, "Random Blog", 24, now),
        ];
        let agg = aggregate_sentiment(&articles, MarketRegime::Neutral, now);
        assert!(agg.score > 0.0, "got {}", agg.score);
        assert!((-1.0..=1.0).contains(&agg.score));
        assert_eq!(agg.distribution.positive, 1);
        assert_eq!(agg.distribution.negative, 1);
        assert_eq!(agg.source_weights["Reuters"], 2.0);
        assert_eq!(agg.source_weights["Random Blog"], 1.0);
        assert!((agg.avg_reliability - 72.5).abs() < 1e-9);
    }

    #[test]
    fn regime_adjustment_scales_and_reclips() {
        let now = Utc::now();
        let positive = vec![
            article(SentimentLabel::Positive, 1.0, 100, "Reuters", 0, now),
        ];
        let neutral_agg = aggregate_sentiment(&positive, MarketRegime::Neutral, now);
        let bull_agg = aggregate_sentiment(&positive, MarketRegime::Bull, now);
        let bear_agg = aggregate_sentiment(&positive, MarketRegime::Bear, now);
        // All weight on one fully positive article: the weighted mean is 1.0,
        // so bull scaling must re-clip to the bound.
        assert!((neutral_agg.score - 1.0).abs() < 1e-9);
        assert!((bull_agg.score - 1.0).abs() < 1e-9);
        assert!((bear_agg.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn composite_blend_uses_fixed_weights() {
        let c = composite_confidence(80.0, 60.0, 70.0);
        assert!((c - (0.5 * 80.0 + 0.3 * 60.0 + 0.2 * 70.0)).abs() < 1e-9);
        assert_eq!(composite_confidence(0.0, 0.0, 0.0), 0.0);
        assert!((0.0..=100.0).contains(&composite_confidence(150.0, 150.0, 150.0)));
    }

    #[test]
    fn contrarian_warning_fires_on_overbought_positive() {
        let mut snap = snapshot(105.0, 100.0, 95.0, MarketRegime::Bull);
        snap.rsi_14 = 75.0;
        let mut agg = SentimentAggregate::empty();
        agg.score = 0.5;
        let warnings = contrarian_warnings(&snap, &agg);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("overbought"));

        snap.rsi_14 = 25.0;
        agg.score = -0.5;
        let warnings = contrarian_warnings(&snap, &agg);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("oversold"));

        snap.rsi_14 = 50.0;
        assert!(contrarian_warnings(&snap, &agg).is_empty());
    }

    #[test]
    fn degenerate_stop_produces_zero_ratio() {
        // price == sma_200 * 0.95
        let snap = snapshot(95.0 * 0.95, 100.0, 95.0, MarketRegime::Neutral);
        let risk = risk_metrics(&snap);
        assert_eq!(risk.risk_reward_ratio, 0.0);
    }

    #[test]
    fn targets_scale_with_sentiment_and_risk() {
        let snap = snapshot(100.0, 100.0, 95.0, MarketRegime::Neutral);
        let mut agg = SentimentAggregate::empty();
        agg.score = 0.5;

        let medium = price_targets(&snap, &agg, RiskProfile::Medium);
        assert!((medium.base - 110.0).abs() < 1e-9);
        assert!((medium.bull - 120.0).abs() < 1e-9);
        assert!((medium.bear - 100.0).abs() < 1e-9);

        let high = price_targets(&snap, &agg, RiskProfile::High);
        assert!(high.bull > medium.bull);
        assert!(high.bear < medium.bear);
    }

    // ------------------------------------------------------------------
    // End-to-end fuse() with fakes.

    struct FixedSource {
        closes: Vec<f64>,
    }

    #[async_trait::async_trait]
    impl PriceHistorySource for FixedSource {
        async fn daily_bars(&self, _symbol: &str, _lookback: Lookback) -> Result<Vec<DailyBar>> {
            anyhow::ensure!(!self.closes.is_empty(), "no data");
            Ok(self
                .closes
                .iter()
                .enumerate()
                .map(|(i, c)| DailyBar {
                    date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
                        + ChronoDuration::days(i as i64),
                    open: *c,
                    high: c * 1.01,
                    low: c * 0.99,
                    close: *c,
                    volume: 1.0e6,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn invalid_symbol_is_rejected_as_caller_error() {
        let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::new(FixedSource {
            closes: vec![],
        })));
        let engine = SignalFusionEngine::new(analyzer, Arc::new(MemoryArticleStore::new()), None);
        match engine.fuse("not a ticker", FusionOptions::default()).await {
            RecommendationResponse::Error { message, .. } => {
                assert!(message.contains("symbol"));
            }
            RecommendationResponse::Success { .. } => panic!("expected error response"),
        }
    }

    #[tokio::test]
    async fn degraded_technicals_produce_error_shaped_response() {
        let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::new(FixedSource {
            closes: vec![],
        })));
        let engine = SignalFusionEngine::new(analyzer, Arc::new(MemoryArticleStore::new()), None);
        match engine.fuse("IBM", FusionOptions::default()).await {
            RecommendationResponse::Error { symbol, message, .. } => {
                assert_eq!(symbol, "IBM");
                assert!(message.contains("technical analysis"));
            }
            RecommendationResponse::Success { .. } => panic!("expected error response"),
        }
    }

    #[tokio::test]
    async fn healthy_inputs_produce_a_bounded_recommendation() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 * 1.001f64.powi(i)).collect();
        let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::new(FixedSource { closes })));
        let store = Arc::new(MemoryArticleStore::new());
        let now = Utc::now();
        for i in 0..3 {
            store
                .upsert(&article(
                    SentimentLabel::Positive,
                    0.9,
                    95,
                    "Reuters",
                    i,
                    now,
                ))
                .await
                .unwrap();
        }

        let engine = SignalFusionEngine::new(analyzer, store, None);
        match engine.fuse("ibm", FusionOptions::default()).await {
            RecommendationResponse::Success { recommendation } => {
                assert_eq!(recommendation.symbol, "IBM");
                assert!((0.0..=100.0).contains(&recommendation.composite_confidence));
                assert_eq!(recommendation.source, "fallback");
                assert_eq!(
                    recommendation.action_confidence,
                    recommendation.action.confidence_tier()
                );
                assert_eq!(recommendation.action, Action::Buy);
            }
            RecommendationResponse::Error { message, .. } => {
                panic!("expected success, got error: {message}")
            }
        }
    }

    struct FixedAdvisor {
        text: &'static str,
    }

    #[async_trait::async_trait]
    impl AdvisoryClient for FixedAdvisor {
        async fn advise(&self, _prompt: &str) -> Result<String> {
            Ok(self.text.to_string())
        }
    }

    #[tokio::test]
    async fn advisory_verdict_wins_when_parsable() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 * 1.001f64.powi(i)).collect();
        let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::new(FixedSource { closes })));
        let engine = SignalFusionEngine::new(
            analyzer,
            Arc::new(MemoryArticleStore::new()),
            Some(Arc::new(FixedAdvisor {
                text: "[RECOMMENDATION]\nSTRONG_BUY - breakout",
            })),
        );
        match engine.fuse("IBM", FusionOptions::default()).await {
            RecommendationResponse::Success { recommendation } => {
                assert_eq!(recommendation.action, Action::StrongBuy);
                assert_eq!(recommendation.source, "advisor");
                assert_eq!(recommendation.action_confidence, 90);
            }
            RecommendationResponse::Error { message, .. } => panic!("unexpected error: {message}"),
        }
    }

    #[tokio::test]
    async fn unparsable_advisory_falls_back_deterministically() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 * 1.001f64.powi(i)).collect();
        let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::new(FixedSource { closes })));
        let engine = SignalFusionEngine::new(
            analyzer,
            Arc::new(MemoryArticleStore::new()),
            Some(Arc::new(FixedAdvisor {
                text: "the outlook is complicated",
            })),
        );
        match engine.fuse("IBM", FusionOptions::default()).await {
            RecommendationResponse::Success { recommendation } => {
                assert_eq!(recommendation.source, "fallback");
            }
            RecommendationResponse::Error { message, .. } => panic!("unexpected error: {message}"),
        }
    }
}
