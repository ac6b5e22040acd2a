pub mod guard;
pub mod phrases;
pub mod reliability;
pub mod scorer;

pub use phrases::{FrequencyKeyPhraseExtractor, KeyPhraseExtractor};
pub use scorer::{HttpSentimentModel, RawSentiment, SentimentModel, SentimentScore, SentimentScorer};
