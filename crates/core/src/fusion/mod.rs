pub mod advisor;
pub mod engine;

pub use advisor::{AdvisoryClient, HttpAdvisoryClient};
pub use engine::{FusionOptions, SignalFusionEngine};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

/// Time-decayed, reliability- and tier-weighted sentiment over recent
/// articles. Derived per request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAggregate {
    /// Regime-adjusted weighted score in [-1, 1].
    pub score: f64,
    /// Aggregate confidence, 0-100.
    pub confidence: f64,
    pub distribution: SentimentDistribution,
    pub key_phrases: Vec<String>,
    pub source_weights: BTreeMap<String, f64>,
    pub avg_reliability: f64,
    pub article_count: usize,
}

impl SentimentAggregate {
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            confidence: 0.0,
            distribution: SentimentDistribution::default(),
            key_phrases: Vec::new(),
            source_weights: BTreeMap::new(),
            avg_reliability: 0.0,
            article_count: 0,
        }
    }
}
