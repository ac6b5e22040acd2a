pub mod domain;
pub mod fusion;
pub mod ingest;
pub mod sentiment;
pub mod storage;
pub mod ta;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub finnhub_api_key: Option<String>,
        pub rapidapi_key: Option<String>,
        pub sentiment_api_url: Option<String>,
        pub sentiment_api_token: Option<String>,
        pub advisor_api_url: Option<String>,
        pub advisor_api_token: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                alpha_vantage_api_key: std::env::var("ALPHA_VANTAGE_API_KEY").ok(),
                finnhub_api_key: std::env::var("FINNHUB_API_KEY").ok(),
                rapidapi_key: std::env::var("RAPIDAPI_KEY").ok(),
                sentiment_api_url: std::env::var("SENTIMENT_API_URL").ok(),
                sentiment_api_token: std::env::var("SENTIMENT_API_TOKEN").ok(),
                advisor_api_url: std::env::var("ADVISOR_API_URL").ok(),
                advisor_api_token: std::env::var("ADVISOR_API_TOKEN").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_alpha_vantage_api_key(&self) -> anyhow::Result<&str> {
            self.alpha_vantage_api_key
                .as_deref()
                .context("ALPHA_VANTAGE_API_KEY is required")
        }

        pub fn require_finnhub_api_key(&self) -> anyhow::Result<&str> {
            self.finnhub_api_key
                .as_deref()
                .context("FINNHUB_API_KEY is required")
        }

        pub fn require_rapidapi_key(&self) -> anyhow::Result<&str> {
            self.rapidapi_key
                .as_deref()
                .context("RAPIDAPI_KEY is required")
        }
    }

    pub fn env_u64(key: &str, default: u64) -> u64 {
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(default)
    }

    pub fn env_usize(key: &str, default: usize) -> usize {
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(default)
    }
}
