use crate::domain::article::{Article, SentimentLabel};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// Key-based upsert interface to the persistent article store. The
/// ingestion pipeline owns writes; the fusion engine only reads.
#[async_trait::async_trait]
pub trait ArticleStore: Send + Sync {
    /// Number of stored articles for `symbol` published at or after `since`.
    async fn fresh_count(&self, symbol: &str, since: DateTime<Utc>) -> Result<i64>;

    /// Upsert by `(fingerprint, symbol)`. Returns true when a new row was
    /// created, false when an existing row was updated.
    async fn upsert(&self, article: &Article) -> Result<bool>;

    /// Recent articles for `symbol`, newest first.
    async fn recent(&self, symbol: &str, since: DateTime<Utc>, limit: i64) -> Result<Vec<Article>>;
}

#[derive(Debug, Clone)]
pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type ArticleRow = (
    String,
    String,
    String,
    String,
    String,
    i16,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    String,
    f64,
    Vec<String>,
    String,
    serde_json::Value,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_to_article(row: ArticleRow) -> Article {
    let (
        symbol,
        title,
        raw_title,
        summary,
        source,
        source_reliability,
        url,
        banner_url,
        published_at,
        sentiment,
        sentiment_confidence,
        key_phrases,
        fingerprint,
        raw_payload,
        created_at,
        updated_at,
    ) = row;
    Article {
        symbol,
        title,
        raw_title,
        summary,
        source,
        source_reliability: source_reliability.clamp(0, 100) as u8,
        url,
        banner_url,
        published_at,
        sentiment: SentimentLabel::parse(&sentiment),
        sentiment_confidence,
        key_phrases,
        fingerprint,
        raw_payload,
        created_at,
        updated_at,
    }
}

#[async_trait::async_trait]
impl ArticleStore for PgArticleStore {
    async fn fresh_count(&self, symbol: &str, since: DateTime<Utc>) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles WHERE symbol = $1 AND published_at >= $2",
        )
        .persistent(false)
        .bind(symbol)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("count fresh articles failed")?;
        Ok(count.0)
    }

    async fn upsert(&self, article: &Article) -> Result<bool> {
        // (xmax = 0) is true only for rows created by this statement, which
        // distinguishes insert from conflict-update in one round trip.
        let created: (bool,) = sqlx::query_as(
            "INSERT INTO articles \
               (symbol, title, raw_title, summary, source, source_reliability, url, banner_url, \
                published_at, sentiment, sentiment_confidence, key_phrases, fingerprint, raw_payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (fingerprint, symbol) DO UPDATE SET \
               summary = EXCLUDED.summary, \
               source = EXCLUDED.source, \
               source_reliability = EXCLUDED.source_reliability, \
               published_at = EXCLUDED.published_at, \
               sentiment = EXCLUDED.sentiment, \
               sentiment_confidence = EXCLUDED.sentiment_confidence, \
               key_phrases = EXCLUDED.key_phrases, \
               raw_payload = EXCLUDED.raw_payload, \
               updated_at = now() \
             RETURNING (xmax = 0)",
        )
        .persistent(false)
        .bind(&article.symbol)
        .bind(&article.title)
        .bind(&article.raw_title)
        .bind(&article.summary)
        .bind(&article.source)
        .bind(article.source_reliability as i16)
        .bind(&article.url)
        .bind(&article.banner_url)
        .bind(article.published_at)
        .bind(article.sentiment.as_str())
        .bind(article.sentiment_confidence)
        .bind(&article.key_phrases)
        .bind(&article.fingerprint)
        .bind(&article.raw_payload)
        .fetch_one(&self.pool)
        .await
        .context("upsert article failed")?;
        Ok(created.0)
    }

    async fn recent(&self, symbol: &str, since: DateTime<Utc>, limit: i64) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            "SELECT symbol, title, raw_title, summary, source, source_reliability, url, \
                    banner_url, published_at, sentiment, sentiment_confidence, key_phrases, \
                    fingerprint, raw_payload, created_at, updated_at \
             FROM articles \
             WHERE symbol = $1 AND published_at >= $2 \
             ORDER BY published_at DESC \
             LIMIT $3",
        )
        .persistent(false)
        .bind(symbol)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("query recent articles failed")?;

        Ok(rows.into_iter().map(row_to_article).collect())
    }
}

/// In-memory store for worker dry runs and tests. Same upsert semantics as
/// the Postgres store.
#[derive(Debug, Default)]
pub struct MemoryArticleStore {
    rows: tokio::sync::Mutex<HashMap<(String, String), Article>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn fresh_count(&self, symbol: &str, since: DateTime<Utc>) -> Result<i64> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|a| a.symbol == symbol && a.published_at >= since)
            .count() as i64)
    }

    async fn upsert(&self, article: &Article) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        let key = (article.fingerprint.clone(), article.symbol.clone());
        let created = !rows.contains_key(&key);
        rows.insert(key, article.clone());
        Ok(created)
    }

    async fn recent(&self, symbol: &str, since: DateTime<Utc>, limit: i64) -> Result<Vec<Article>> {
        let rows = self.rows.lock().await;
        let mut out: Vec<Article> = rows
            .values()
            .filter(|a| a.symbol == symbol && a.published_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

/// Audit row for one ingestion run.
pub async fn record_ingest_run(
    pool: &PgPool,
    symbol: &str,
    provider: Option<&str>,
    status: &str,
    new_articles: i64,
    duplicates: i64,
    error: Option<&str>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO ingest_runs (id, symbol, provider, status, new_articles, duplicates, error, ran_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, now())",
    )
    .persistent(false)
    .bind(id)
    .bind(symbol)
    .bind(provider)
    .bind(status)
    .bind(new_articles)
    .bind(duplicates)
    .bind(error)
    .execute(pool)
    .await
    .context("insert ingest_runs failed")?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn article(symbol: &str, fingerprint: &str, published_at: DateTime<Utc>) -> Article {
        Article {
            symbol: symbol.to_string(),
            title: "ibm reports strong earnings".to_string(),
            raw_title: "IBM Reports Strong Earnings".to_string(),
            summary: "Quarterly beat.".to_string(),
            source: "Reuters".to_string(),
            source_reliability: 95,
            url: None,
            banner_url: None,
            published_at,
            sentiment: SentimentLabel::Positive,
            sentiment_confidence: 0.9,
            key_phrases: vec!["earnings".to_string()],
            fingerprint: fingerprint.to_string(),
            raw_payload: json!({}),
            created_at: published_at,
            updated_at: published_at,
        }
    }

    #[tokio::test]
    async fn memory_store_upsert_reports_created_then_updated() {
        let store = MemoryArticleStore::new();
        let now = Utc::now();
        let a = article("IBM", "fp1", now);
        assert!(store.upsert(&a).await.unwrap());
        assert!(!store.upsert(&a).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn memory_store_scopes_fingerprints_per_symbol() {
        let store = MemoryArticleStore::new();
        let now = Utc::now();
        assert!(store.upsert(&article("IBM", "fp1", now)).await.unwrap());
        assert!(store.upsert(&article("MSFT", "fp1", now)).await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn memory_store_recent_is_windowed_and_sorted() {
        let store = MemoryArticleStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::hours(48);
        store.upsert(&article("IBM", "fp1", now)).await.unwrap();
        store.upsert(&article("IBM", "fp2", old)).await.unwrap();
        store
            .upsert(&article("IBM", "fp3", now - chrono::Duration::hours(1)))
            .await
            .unwrap();

        let since = now - chrono::Duration::hours(24);
        let recent = store.recent("IBM", since, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].fingerprint, "fp1");
        assert_eq!(recent[1].fingerprint, "fp3");
        assert_eq!(store.fresh_count("IBM", since).await.unwrap(), 2);
    }
}
