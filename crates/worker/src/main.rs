use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsfuse_core::config::Settings;
use newsfuse_core::domain::article::validate_symbol;
use newsfuse_core::ingest::pipeline::NewsIngestionPipeline;
use newsfuse_core::ingest::provider::{
    AlphaVantageNews, FinnhubNews, NewsProviderClient, YahooNews,
};
use newsfuse_core::sentiment::{
    FrequencyKeyPhraseExtractor, HttpSentimentModel, SentimentModel, SentimentScorer,
};
use newsfuse_core::storage::{self, ArticleStore, MemoryArticleStore, PgArticleStore};

#[derive(Debug, Parser)]
#[command(name = "newsfuse_worker")]
struct Args {
    /// Comma-separated ticker symbols. Falls back to the SYMBOLS env var.
    #[arg(long)]
    symbols: Option<String>,

    /// Drop articles older than 24 hours before enrichment.
    #[arg(long)]
    latest_only: bool,

    /// Run against an in-memory store; nothing is written to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let symbols = resolve_symbols(args.symbols.as_deref())?;

    let pool = if args.dry_run {
        None
    } else {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        storage::migrate(&pool).await?;
        Some(pool)
    };

    let store: Arc<dyn ArticleStore> = match &pool {
        Some(pool) => Arc::new(PgArticleStore::new(pool.clone())),
        None => {
            tracing::info!("dry run: using in-memory article store");
            Arc::new(MemoryArticleStore::new())
        }
    };

    let model = match HttpSentimentModel::from_settings(&settings)? {
        Some(m) => Some(Arc::new(m) as Arc<dyn SentimentModel>),
        None => {
            tracing::warn!("SENTIMENT_API_URL not set; sentiment degrades to neutral");
            None
        }
    };
    let pipeline = NewsIngestionPipeline::new(
        build_providers(&settings),
        Arc::new(SentimentScorer::new(model)),
        Arc::new(FrequencyKeyPhraseExtractor::new()),
        store,
    );

    let mut failures = 0usize;
    for symbol in &symbols {
        let summary = pipeline.ingest(symbol, args.latest_only).await;
        if summary.status == newsfuse_core::ingest::pipeline::IngestStatus::Error {
            failures += 1;
        }
        tracing::info!(
            %symbol,
            status = summary.status.as_str(),
            new_articles = summary.new_articles,
            duplicates = summary.duplicates,
            "symbol ingest finished"
        );

        if let Some(pool) = &pool {
            let run = storage::articles::record_ingest_run(
                pool,
                &summary.symbol,
                summary.provider.as_deref(),
                summary.status.as_str(),
                summary.new_articles as i64,
                summary.duplicates as i64,
                summary.message.as_deref(),
            )
            .await;
            if let Err(err) = run {
                sentry_anyhow::capture_anyhow(&err);
                tracing::warn!(%symbol, error = %err, "failed to record ingest run");
            }
        }
    }

    tracing::info!(
        symbols = symbols.len(),
        failures,
        dry_run = args.dry_run,
        "worker run complete"
    );
    Ok(())
}

fn resolve_symbols(arg: Option<&str>) -> anyhow::Result<Vec<String>> {
    let raw = match arg {
        Some(s) => s.to_string(),
        None => std::env::var("SYMBOLS").context("pass --symbols or set SYMBOLS")?,
    };
    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        out.push(validate_symbol(part)?);
    }
    anyhow::ensure!(!out.is_empty(), "no symbols to ingest");
    Ok(out)
}

fn build_providers(settings: &Settings) -> Vec<Arc<dyn NewsProviderClient>> {
    let mut providers: Vec<Arc<dyn NewsProviderClient>> = Vec::new();
    match AlphaVantageNews::from_settings(settings) {
        Ok(p) => providers.push(Arc::new(p)),
        Err(e) => tracing::warn!(error = %e, "alpha vantage news disabled"),
    }
    match FinnhubNews::from_settings(settings) {
        Ok(p) => providers.push(Arc::new(p)),
        Err(e) => tracing::warn!(error = %e, "finnhub news disabled"),
    }
    match YahooNews::from_settings(settings) {
        Ok(p) => providers.push(Arc::new(p)),
        Err(e) => tracing::warn!(error = %e, "yahoo news disabled"),
    }
    if providers.is_empty() {
        tracing::error!("no news providers configured; ingestion will fail soft");
    }
    providers
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_validates_symbol_lists() {
        let symbols = resolve_symbols(Some("ibm, msft ,aapl")).unwrap();
        assert_eq!(symbols, vec!["IBM", "MSFT", "AAPL"]);
        assert!(resolve_symbols(Some("ibm,not-a-ticker")).is_err());
        assert!(resolve_symbols(Some(" , ")).is_err());
    }
}
