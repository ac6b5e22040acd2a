use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_SUMMARY_CHARS: usize = 500;
pub const MAX_KEY_PHRASES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    /// Lenient parse for labels coming back from models and the database.
    /// Anything unrecognized reads as neutral.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "bullish" => SentimentLabel::Positive,
            "negative" | "bearish" => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        }
    }

    pub fn signed_value(&self) -> f64 {
        match self {
            SentimentLabel::Positive => 1.0,
            SentimentLabel::Neutral => 0.0,
            SentimentLabel::Negative => -1.0,
        }
    }
}

/// A fully enriched article as persisted by the ingestion pipeline.
/// `(fingerprint, symbol)` is the upsert key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub symbol: String,
    /// Normalized title (lowercased, punctuation stripped, whitespace collapsed).
    pub title: String,
    pub raw_title: String,
    pub summary: String,
    pub source: String,
    pub source_reliability: u8,
    pub url: Option<String>,
    pub banner_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub sentiment: SentimentLabel,
    pub sentiment_confidence: f64,
    pub key_phrases: Vec<String>,
    pub fingerprint: String,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validate and canonicalize a ticker symbol: 1-5 ASCII alphanumeric
/// characters, uppercased. Invalid symbols are a caller error.
pub fn validate_symbol(symbol: &str) -> anyhow::Result<String> {
    let canonical = symbol.trim().to_ascii_uppercase();
    ensure!(
        (1..=5).contains(&canonical.len()),
        "symbol must be 1-5 characters (got {:?})",
        symbol
    );
    ensure!(
        canonical.bytes().all(|b| b.is_ascii_alphanumeric()),
        "symbol must be alphanumeric (got {:?})",
        symbol
    );
    Ok(canonical)
}

pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
