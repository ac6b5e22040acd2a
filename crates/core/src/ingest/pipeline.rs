use crate::domain::article::{validate_symbol, Article, MAX_SUMMARY_CHARS};
use crate::ingest::normalize::{fingerprint, normalize_title, parse_published};
use crate::ingest::provider::{NewsProviderClient, ProviderError, RawArticle};
use crate::sentiment::reliability::source_reliability;
use crate::sentiment::{KeyPhraseExtractor, SentimentScorer};
use crate::storage::ArticleStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Articles already stored within this window short-circuit a run.
const FRESHNESS_WINDOW_HOURS: i64 = 24;
/// Recency filter cutoff when the caller asks for latest-only ingestion.
const RECENCY_WINDOW_HOURS: i64 = 24;
/// Enrichment happens in chunks of this size to bound peak memory.
const DEFAULT_CHUNK_SIZE: usize = 20;
/// Bounded retries on the same provider, only for rate-limited responses.
const MAX_PROVIDER_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Skipped,
    Error,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Success => "success",
            IngestStatus::Skipped => "skipped",
            IngestStatus::Error => "error",
        }
    }
}

/// Caller-facing run summary. The pipeline never fails hard: an exhausted
/// provider chain or invalid symbol comes back as `Error` with zero counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub status: IngestStatus,
    pub symbol: String,
    pub new_articles: usize,
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngestSummary {
    fn error(symbol: &str, message: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Error,
            symbol: symbol.to_string(),
            new_articles: 0,
            duplicates: 0,
            provider: None,
            message: Some(message.into()),
        }
    }

    fn skipped(symbol: &str) -> Self {
        Self {
            status: IngestStatus::Skipped,
            symbol: symbol.to_string(),
            new_articles: 0,
            duplicates: 0,
            provider: None,
            message: None,
        }
    }
}

/// Article draft after normalization, before enrichment.
#[derive(Debug, Clone)]
struct Draft {
    raw: RawArticle,
    normalized_title: String,
    published_at: DateTime<Utc>,
    fingerprint: String,
}

pub struct NewsIngestionPipeline {
    providers: Vec<Arc<dyn NewsProviderClient>>,
    scorer: Arc<SentimentScorer>,
    phrases: Arc<dyn KeyPhraseExtractor>,
    store: Arc<dyn ArticleStore>,
    chunk_size: usize,
}

impl NewsIngestionPipeline {
    pub fn new(
        providers: Vec<Arc<dyn NewsProviderClient>>,
        scorer: Arc<SentimentScorer>,
        phrases: Arc<dyn KeyPhraseExtractor>,
        store: Arc<dyn ArticleStore>,
    ) -> Self {
        Self {
            providers,
            scorer,
            phrases,
            store,
            chunk_size: crate::config::env_usize("INGEST_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
        }
    }

    /// Run one ingestion for `symbol`. `latest_only` drops articles older
    /// than 24h before enrichment.
    pub async fn ingest(&self, symbol: &str, latest_only: bool) -> IngestSummary {
        let symbol = match validate_symbol(symbol) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting ingest for invalid symbol");
                return IngestSummary::error(symbol, err.to_string());
            }
        };

        let now = Utc::now();
        let fresh_since = now - ChronoDuration::hours(FRESHNESS_WINDOW_HOURS);
        match self.store.fresh_count(&symbol, fresh_since).await {
            Ok(n) if n > 0 => {
                tracing::info!(%symbol, fresh = n, "fresh articles already stored; skipping fetch");
                return IngestSummary::skipped(&symbol);
            }
            Ok(_) => {}
            Err(err) => {
                // A store read failure is not fatal to the run; providers may
                // still yield new data that upserts fine.
                tracing::warn!(%symbol, error = %err, "freshness check failed; continuing");
            }
        }

        let Some((provider, articles)) = self.fetch_with_fallback(&symbol).await else {
            tracing::error!(%symbol, "all providers exhausted");
            return IngestSummary::error(&symbol, "no articles found across all providers");
        };

        let mut drafts = self.normalize(&symbol, articles);
        if latest_only {
            let cutoff = now - ChronoDuration::hours(RECENCY_WINDOW_HOURS);
            let before = drafts.len();
            drafts.retain(|d| d.published_at >= cutoff);
            tracing::debug!(%symbol, kept = drafts.len(), dropped = before - drafts.len(), "recency filter applied");
        }

        let (new_articles, duplicates) = self.enrich_and_persist(&symbol, drafts).await;

        tracing::info!(%symbol, provider, new_articles, duplicates, "ingest complete");
        IngestSummary {
            status: IngestStatus::Success,
            symbol,
            new_articles,
            duplicates,
            provider: Some(provider.to_string()),
            message: None,
        }
    }

    /// Try providers in fixed priority order. Rate-limited responses get a
    /// bounded backoff-retry on the same provider; any other failure skips
    /// to the next. The chain stops at the first non-empty result.
    async fn fetch_with_fallback(&self, symbol: &str) -> Option<(&'static str, Vec<RawArticle>)> {
        for provider in &self.providers {
            match self.fetch_one(provider.as_ref(), symbol).await {
                Ok(articles) => {
                    tracing::info!(
                        %symbol,
                        provider = provider.name(),
                        count = articles.len(),
                        "provider returned articles"
                    );
                    return Some((provider.name(), articles));
                }
                Err(err) => {
                    tracing::warn!(
                        %symbol,
                        provider = provider.name(),
                        error = %err,
                        "provider failed; advancing chain"
                    );
                }
            }
        }
        None
    }

    async fn fetch_one(
        &self,
        provider: &dyn NewsProviderClient,
        symbol: &str,
    ) -> Result<Vec<RawArticle>, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match provider.fetch(symbol).await {
                Ok(articles) if !articles.is_empty() => return Ok(articles),
                Ok(_) => return Err(ProviderError::Empty),
                Err(ProviderError::RateLimited { retry_after }) if attempt < MAX_PROVIDER_ATTEMPTS => {
                    let backoff = retry_after.max(Duration::from_secs(1 << (attempt - 1)));
                    tracing::warn!(
                        %symbol,
                        provider = provider.name(),
                        attempt,
                        ?backoff,
                        "provider rate limited; retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Normalize raw articles into drafts. Articles without a usable title
    /// or a parsable publish date are dropped: unordered articles cannot be
    /// deduplicated or ranked by recency.
    fn normalize(&self, symbol: &str, articles: Vec<RawArticle>) -> Vec<Draft> {
        let mut out = Vec::with_capacity(articles.len());
        for raw in articles {
            let normalized_title = normalize_title(&raw.title);
            if normalized_title.is_empty() {
                tracing::debug!(%symbol, "dropping article with empty title");
                continue;
            }
            let Some(published_at) = parse_published(&raw.published) else {
                tracing::debug!(%symbol, published = ?raw.published, "dropping article with unparsable date");
                continue;
            };
            let fingerprint = fingerprint(&normalized_title, published_at);
            out.push(Draft {
                raw,
                normalized_title,
                published_at,
                fingerprint,
            });
        }
        out
    }

    /// Enrich drafts chunk by chunk and upsert. Returns (new, duplicates).
    /// Sentiment runs as one batch call per chunk; a draft that fails
    /// enrichment or persistence is skipped and counted as neither.
    async fn enrich_and_persist(&self, symbol: &str, drafts: Vec<Draft>) -> (usize, usize) {
        let mut new_articles = 0usize;
        let mut duplicates = 0usize;
        let mut batch_seen: HashSet<String> = HashSet::with_capacity(drafts.len());

        for chunk in drafts.chunks(self.chunk_size.max(1)) {
            let mut fresh: Vec<&Draft> = Vec::with_capacity(chunk.len());
            for draft in chunk {
                if batch_seen.insert(draft.fingerprint.clone()) {
                    fresh.push(draft);
                } else {
                    duplicates += 1;
                }
            }

            let texts: Vec<String> = fresh.iter().map(|d| enrichment_text(d)).collect();
            let scores = self.scorer.score_batch(&texts).await;

            for (draft, score) in fresh.iter().zip(scores) {
                let article = match self.build_article(symbol, draft, score).await {
                    Ok(a) => a,
                    Err(err) => {
                        tracing::warn!(
                            %symbol,
                            title = %draft.normalized_title,
                            error = %err,
                            "enrichment failed; skipping article"
                        );
                        continue;
                    }
                };

                match self.store.upsert(&article).await {
                    Ok(true) => new_articles += 1,
                    Ok(false) => duplicates += 1,
                    Err(err) => {
                        tracing::warn!(
                            %symbol,
                            fingerprint = %draft.fingerprint,
                            error = %err,
                            "upsert failed; skipping article"
                        );
                    }
                }
            }
        }

        (new_articles, duplicates)
    }

    async fn build_article(
        &self,
        symbol: &str,
        draft: &Draft,
        score: crate::sentiment::SentimentScore,
    ) -> anyhow::Result<Article> {
        let key_phrases = self.phrases.extract(&enrichment_text(draft)).await?;

        let now = Utc::now();
        Ok(Article {
            symbol: symbol.to_string(),
            title: draft.normalized_title.clone(),
            raw_title: draft.raw.title.clone(),
            summary: truncated_summary(draft),
            source: draft.raw.source.clone(),
            source_reliability: source_reliability(&draft.raw.source),
            url: draft.raw.url.clone(),
            banner_url: draft.raw.banner_url.clone(),
            published_at: draft.published_at,
            sentiment: score.label,
            sentiment_confidence: score.confidence,
            key_phrases,
            fingerprint: draft.fingerprint.clone(),
            raw_payload: draft.raw.raw.clone(),
            created_at: now,
            updated_at: now,
        })
    }
}

fn truncated_summary(draft: &Draft) -> String {
    draft.raw.summary.chars().take(MAX_SUMMARY_CHARS).collect()
}

/// Text handed to the scorer and phrase extractor: headline plus truncated
/// summary.
fn enrichment_text(draft: &Draft) -> String {
    format!("{} {}", draft.raw.title, truncated_summary(draft))
}
