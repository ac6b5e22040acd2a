use crate::domain::article::{truncate_chars, MAX_KEY_PHRASES};
use anyhow::Result;
use std::collections::{HashMap, HashSet};

/// Inputs longer than this are truncated, not rejected.
const MAX_INPUT_CHARS: usize = 10_000;
const MIN_TOKEN_CHARS: usize = 4;

/// Extracts a short topical fingerprint from article text. The default
/// implementation is local and deterministic; the trait seam exists so a
/// hosted NLP extractor can be slotted in.
#[async_trait::async_trait]
pub trait KeyPhraseExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<String>>;
}

pub struct FrequencyKeyPhraseExtractor {
    stop_words: HashSet<&'static str>,
}

impl Default for FrequencyKeyPhraseExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyKeyPhraseExtractor {
    pub fn new() -> Self {
        let stop_words: HashSet<&'static str> = [
            "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
            "had", "do", "does", "did", "will", "would", "could", "should", "may", "might",
            "must", "shall", "can", "need", "ought", "used", "to", "of", "in", "for", "on",
            "with", "at", "by", "from", "as", "into", "through", "during", "before", "after",
            "this", "that", "these", "those", "its", "their", "his", "her", "our", "your",
            "about", "over", "under", "than", "then", "when", "while", "where", "which", "who",
            "what", "how", "why", "and", "but", "or", "nor", "not", "also", "more", "most",
            "some", "such", "only", "other", "new", "says", "said",
        ]
        .into_iter()
        .collect();
        Self { stop_words }
    }

    fn rank_tokens(&self, text: &str) -> Vec<String> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for (position, raw) in text.split_whitespace().enumerate() {
            let token: String = raw
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(|c| c.to_lowercase())
                .collect();
            if token.chars().count() < MIN_TOKEN_CHARS {
                continue;
            }
            if self.stop_words.contains(token.as_str()) {
                continue;
            }
            let entry = counts.entry(token).or_insert((0, position));
            entry.0 += 1;
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(token, (count, first_pos))| (token, count, first_pos))
            .collect();
        // Frequency first, earliest mention breaks ties, then alphabetical
        // so the output is fully deterministic.
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.into_iter().map(|(token, _, _)| token).collect()
    }
}

#[async_trait::async_trait]
impl KeyPhraseExtractor for FrequencyKeyPhraseExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<String>> {
        let text = truncate_chars(text, MAX_INPUT_CHARS);
        let mut out = Vec::with_capacity(MAX_KEY_PHRASES);
        let mut seen = HashSet::new();
        for token in self.rank_tokens(text) {
            if seen.insert(token.clone()) {
                out.push(token);
            }
            if out.len() == MAX_KEY_PHRASES {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_at_most_five_deduplicated_phrases() {
        let extractor = FrequencyKeyPhraseExtractor::new();
        let text = "Earnings beat expectations. Earnings growth drives cloud momentum; \
                    cloud revenue and earnings outlook raised amid cloud expansion plans.";
        let phrases = extractor.extract(text).await.unwrap();
        assert!(phrases.len() <= 5);
        assert_eq!(phrases[0], "earnings");
        assert_eq!(phrases[1], "cloud");
        let unique: HashSet<_> = phrases.iter().collect();
        assert_eq!(unique.len(), phrases.len());
    }

    #[tokio::test]
    async fn filters_stop_words_and_short_tokens() {
        let extractor = FrequencyKeyPhraseExtractor::new();
        let phrases = extractor
            .extract("The stock is up and the CEO said it will be fine")
            .await
            .unwrap();
        assert!(!phrases.contains(&"the".to_string()));
        assert!(!phrases.contains(&"up".to_string()));
        assert!(phrases.contains(&"stock".to_string()));
    }

    #[tokio::test]
    async fn long_input_is_truncated_not_rejected() {
        let extractor = FrequencyKeyPhraseExtractor::new();
        let text = "merger ".repeat(5_000);
        let phrases = extractor.extract(&text).await.unwrap();
        assert_eq!(phrases, vec!["merger".to_string()]);
    }

    #[tokio::test]
    async fn empty_text_yields_no_phrases() {
        let extractor = FrequencyKeyPhraseExtractor::new();
        assert!(extractor.extract("   ").await.unwrap().is_empty());
    }
}
