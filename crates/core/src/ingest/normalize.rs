use crate::ingest::provider::PublishedHint;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

/// Epoch values at or above this are treated as milliseconds. The boundary
/// (year 33658 in seconds, 2001 in millis) is unambiguous for news data.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// String layouts observed across the providers, tried in order. RFC 2822
/// ("Tue, 03 Feb 2026 14:30:00 GMT") and RFC 3339 parses run last.
const DATE_FORMATS: [&str; 3] = [
    "%Y%m%dT%H%M%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S",
];

/// Lowercase, strip punctuation, collapse whitespace. Two providers
/// reporting the same headline with different casing or quoting normalize
/// to the same string.
pub fn normalize_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

pub fn parse_published(hint: &PublishedHint) -> Option<DateTime<Utc>> {
    match hint {
        PublishedHint::Epoch(v) => parse_epoch(*v),
        PublishedHint::Text(s) => parse_text(s),
    }
}

fn parse_epoch(v: i64) -> Option<DateTime<Utc>> {
    if v <= 0 {
        return None;
    }
    let secs = if v >= EPOCH_MILLIS_THRESHOLD { v / 1000 } else { v };
    Utc.timestamp_opt(secs, 0).single()
}

fn parse_text(s: &str) -> Option<DateTime<Utc>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

/// Dedup key for one (symbol, article) pair: sha256 over the normalized
/// title joined with the publish time rounded down to the minute. Rounding
/// absorbs sub-minute timestamp jitter between providers reporting the same
/// event; distinct same-title stories more than a minute apart stay
/// distinct.
pub fn fingerprint(normalized_title: &str, published_at: DateTime<Utc>) -> String {
    let bucket = published_at.timestamp().div_euclid(60) * 60;
    let mut hasher = Sha256::new();
    hasher.update(normalized_title.as_bytes());
    hasher.update(b"_");
    hasher.update(bucket.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
