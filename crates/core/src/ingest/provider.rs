use crate::config::Settings;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

const PROVIDER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const MAX_ARTICLES: usize = 100;

const ALPHA_VANTAGE_BASE_URL: &str = "https://www.alphavantage.co";
const FINNHUB_BASE_URL: &str = "https://finnhub.io";
const YAHOO_BASE_URL: &str = "https://apidojo-yahoo-finance-v1.p.rapidapi.com";
const YAHOO_RAPIDAPI_HOST: &str = "apidojo-yahoo-finance-v1.p.rapidapi.com";

/// Failure classes for one provider call. The pipeline recovers every one of
/// these locally: `RateLimited` gets a bounded same-provider retry, the rest
/// advance the fallback chain.
#[derive(Debug)]
pub enum ProviderError {
    RateLimited { retry_after: Duration },
    Http { status: StatusCode },
    Transport(reqwest::Error),
    Decode(serde_json::Error),
    Empty,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::RateLimited { retry_after } => {
                write!(f, "rate limited (retry after {retry_after:?})")
            }
            ProviderError::Http { status } => write!(f, "HTTP {status}"),
            ProviderError::Transport(err) => write!(f, "transport error: {err}"),
            ProviderError::Decode(err) => write!(f, "decode error: {err}"),
            ProviderError::Empty => write!(f, "empty feed"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// When a publish timestamp arrives from the wire it is either a numeric
/// epoch (seconds or millis, provider-dependent) or one of several string
/// layouts. Parsing is deferred to `normalize::parse_published`.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishedHint {
    Epoch(i64),
    Text(String),
}

/// Canonical article draft: every provider's wire shape is adapted into this
/// before any shared logic runs.
#[derive(Debug, Clone)]
pub struct RawArticle {
    pub title: String,
    pub summary: String,
    pub source: String,
    pub url: Option<String>,
    pub banner_url: Option<String>,
    pub published: PublishedHint,
    pub raw: Value,
}

#[async_trait::async_trait]
pub trait NewsProviderClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, symbol: &str) -> Result<Vec<RawArticle>, ProviderError>;
}

fn build_http_client() -> Result<reqwest::Client> {
    let timeout_secs = crate::config::env_u64("PROVIDER_TIMEOUT_SECS", PROVIDER_TIMEOUT_SECS);
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build provider http client")
}

fn classify_status(status: StatusCode, headers: &HeaderMap) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        ProviderError::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        }
    } else {
        ProviderError::Http { status }
    }
}

async fn decode_body<T: serde::de::DeserializeOwned>(
    res: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = res.status();
    let headers = res.headers().clone();
    if !status.is_success() {
        return Err(classify_status(status, &headers));
    }
    let text = res.text().await.map_err(ProviderError::Transport)?;
    serde_json::from_str::<T>(&text).map_err(ProviderError::Decode)
}

// ---------------------------------------------------------------------------
// Alpha Vantage (primary)

#[derive(Debug, Clone)]
pub struct AlphaVantageNews {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AvNewsResponse {
    #[serde(default)]
    feed: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct AvFeedItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    banner_image: Option<String>,
    #[serde(default)]
    time_published: String,
}

impl AlphaVantageNews {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_alpha_vantage_api_key()?.to_string();
        let base_url = std::env::var("ALPHA_VANTAGE_BASE_URL")
            .unwrap_or_else(|_| ALPHA_VANTAGE_BASE_URL.to_string());
        Ok(Self {
            http: build_http_client()?,
            base_url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl NewsProviderClient for AlphaVantageNews {
    fn name(&self) -> &'static str {
        "alphavantage"
    }

    async fn fetch(&self, symbol: &str) -> Result<Vec<RawArticle>, ProviderError> {
        let url = format!("{}/query", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .get(url)
            .query(&[
                ("function", "NEWS_SENTIMENT"),
                ("tickers", symbol),
                ("apikey", self.api_key.as_str()),
                ("limit", "50"),
                ("sort", "LATEST"),
            ])
            .send()
            .await
            .map_err(ProviderError::Transport)?;

        let body: AvNewsResponse = decode_body(res).await?;
        if body.feed.is_empty() {
            return Err(ProviderError::Empty);
        }

        let mut out = Vec::with_capacity(body.feed.len().min(MAX_ARTICLES));
        for raw in body.feed.into_iter().take(MAX_ARTICLES) {
            let item: AvFeedItem =
                serde_json::from_value(raw.clone()).map_err(ProviderError::Decode)?;
            out.push(RawArticle {
                title: item.title,
                summary: item.summary,
                source: if item.source.is_empty() {
                    "Alpha Vantage".to_string()
                } else {
                    item.source
                },
                url: item.url,
                banner_url: item.banner_image,
                published: PublishedHint::Text(item.time_published),
                raw,
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Finnhub (secondary)

#[derive(Debug, Clone)]
pub struct FinnhubNews {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FinnhubItem {
    #[serde(default)]
    headline: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    datetime: i64,
}

impl FinnhubNews {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_finnhub_api_key()?.to_string();
        let base_url =
            std::env::var("FINNHUB_BASE_URL").unwrap_or_else(|_| FINNHUB_BASE_URL.to_string());
        Ok(Self {
            http: build_http_client()?,
            base_url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl NewsProviderClient for FinnhubNews {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    async fn fetch(&self, symbol: &str) -> Result<Vec<RawArticle>, ProviderError> {
        let url = format!("{}/api/v1/company-news", self.base_url.trim_end_matches('/'));
        let to = Utc::now().date_naive();
        let from = (to - ChronoDuration::days(7)).format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        let res = self
            .http
            .get(url)
            .query(&[
                ("symbol", symbol),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("token", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(ProviderError::Transport)?;

        let body: Vec<Value> = decode_body(res).await?;
        if body.is_empty() {
            return Err(ProviderError::Empty);
        }

        let mut out = Vec::with_capacity(body.len().min(MAX_ARTICLES));
        for raw in body.into_iter().take(MAX_ARTICLES) {
            let item: FinnhubItem =
                serde_json::from_value(raw.clone()).map_err(ProviderError::Decode)?;
            out.push(RawArticle {
                title: item.headline,
                summary: item.summary,
                source: if item.source.is_empty() {
                    "Finnhub".to_string()
                } else {
                    item.source
                },
                url: item.url,
                banner_url: item.image,
                published: PublishedHint::Epoch(item.datetime),
                raw,
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Yahoo Finance via RapidAPI (tertiary)

#[derive(Debug, Clone)]
pub struct YahooNews {
    http: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooNewsResponse {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    news: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooItem {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "summary")]
    description: String,
    #[serde(default)]
    publisher: String,
    #[serde(default, alias = "url")]
    link: Option<String>,
    #[serde(default, alias = "main_image")]
    thumbnail: Option<Value>,
    #[serde(default, alias = "publishedAt", alias = "pubDate")]
    pub_date: Option<String>,
    #[serde(default)]
    provider_publish_time: Option<i64>,
}

impl YahooNews {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_rapidapi_key()?;
        let base_url =
            std::env::var("YAHOO_NEWS_BASE_URL").unwrap_or_else(|_| YAHOO_BASE_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-rapidapi-key",
            HeaderValue::from_str(api_key).context("invalid RAPIDAPI_KEY")?,
        );
        headers.insert(
            "x-rapidapi-host",
            HeaderValue::from_static(YAHOO_RAPIDAPI_HOST),
        );
        Ok(Self {
            http: build_http_client()?,
            base_url,
            headers,
        })
    }
}

#[async_trait::async_trait]
impl NewsProviderClient for YahooNews {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, symbol: &str) -> Result<Vec<RawArticle>, ProviderError> {
        let url = format!(
            "{}/stock/v3/get-news",
            self.base_url.trim_end_matches('/')
        );
        let res = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .query(&[("symbol", symbol), ("count", "50")])
            .send()
            .await
            .map_err(ProviderError::Transport)?;

        let body: YahooNewsResponse = decode_body(res).await?;
        // The endpoint has shipped both envelope keys over time.
        let feed = if !body.items.is_empty() { body.items } else { body.news };
        if feed.is_empty() {
            return Err(ProviderError::Empty);
        }

        let mut out = Vec::with_capacity(feed.len().min(MAX_ARTICLES));
        for raw in feed.into_iter().take(MAX_ARTICLES) {
            let item: YahooItem =
                serde_json::from_value(raw.clone()).map_err(ProviderError::Decode)?;
            let published = match (item.provider_publish_time, item.pub_date) {
                (Some(epoch), _) => PublishedHint::Epoch(epoch),
                (None, Some(text)) => PublishedHint::Text(text),
                (None, None) => PublishedHint::Text(String::new()),
            };
            let banner_url = item.thumbnail.as_ref().and_then(banner_from_thumbnail);
            out.push(RawArticle {
                title: item.title,
                summary: item.description,
                source: if item.publisher.is_empty() {
                    "Yahoo Finance".to_string()
                } else {
                    item.publisher
                },
                url: item.link,
                banner_url,
                published,
                raw,
            });
        }
        Ok(out)
    }
}

fn banner_from_thumbnail(v: &Value) -> Option<String> {
    if let Some(s) = v.as_str() {
        return Some(s.to_string());
    }
    v.get("original_url")
        .or_else(|| v.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adapts_alpha_vantage_feed_item() {
        let raw = json!({
            "title": "IBM Reports Strong Earnings",
            "summary": "Quarterly results beat expectations.",
            "source": "Reuters",
            "url": "https://example.com/a",
            "banner_image": "https://example.com/a.png",
            "time_published": "20260203T143000"
        });
        let item: AvFeedItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.title, "IBM Reports Strong Earnings");
        assert_eq!(item.time_published, "20260203T143000");
        assert_eq!(item.banner_image.as_deref(), Some("https://example.com/a.png"));
    }

    #[test]
    fn adapts_finnhub_item_with_epoch() {
        let raw = json!({
            "headline": "IBM expands cloud unit",
            "summary": "",
            "source": "Finnhub",
            "url": "https://example.com/b",
            "datetime": 1770122400
        });
        let item: FinnhubItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.headline, "IBM expands cloud unit");
        assert_eq!(item.datetime, 1770122400);
    }

    #[test]
    fn yahoo_items_accept_either_envelope_key() {
        let with_news: YahooNewsResponse =
            serde_json::from_value(json!({"news": [{"title": "x"}]})).unwrap();
        assert_eq!(with_news.news.len(), 1);
        let with_items: YahooNewsResponse =
            serde_json::from_value(json!({"items": [{"title": "x"}]})).unwrap();
        assert_eq!(with_items.items.len(), 1);
    }

    #[test]
    fn yahoo_banner_accepts_string_or_object() {
        assert_eq!(
            banner_from_thumbnail(&json!("https://e.com/i.png")).as_deref(),
            Some("https://e.com/i.png")
        );
        assert_eq!(
            banner_from_thumbnail(&json!({"original_url": "https://e.com/j.png"})).as_deref(),
            Some("https://e.com/j.png")
        );
        assert_eq!(banner_from_thumbnail(&json!(42)), None);
    }

    #[test]
    fn classifies_429_with_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        match classify_status(StatusCode::TOO_MANY_REQUESTS, &headers) {
            ProviderError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(17));
            }
            other => panic!("expected RateLimited, got {other}"),
        }
        match classify_status(StatusCode::BAD_GATEWAY, &HeaderMap::new()) {
            ProviderError::Http { status } => assert_eq!(status, StatusCode::BAD_GATEWAY),
            other => panic!("expected Http, got {other}"),
        }
    }
}
