use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsfuse_core::config::Settings;
use newsfuse_core::domain::article::{validate_symbol, Article};
use newsfuse_core::domain::recommendation::{Horizon, RecommendationResponse, RiskProfile};
use newsfuse_core::fusion::{FusionOptions, HttpAdvisoryClient, SignalFusionEngine};
use newsfuse_core::ingest::pipeline::{IngestSummary, NewsIngestionPipeline};
use newsfuse_core::ingest::provider::{
    AlphaVantageNews, FinnhubNews, NewsProviderClient, YahooNews,
};
use newsfuse_core::sentiment::{
    FrequencyKeyPhraseExtractor, HttpSentimentModel, SentimentModel, SentimentScorer,
};
use newsfuse_core::storage::{ArticleStore, PgArticleStore};
use newsfuse_core::ta::{AlphaVantageDaily, TechnicalAnalyzer};

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match newsfuse_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let state = build_state(&settings, pool);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ingest/:symbol", post(ingest_symbol))
        .route("/recommendations/:symbol", get(get_recommendation))
        .route("/news/:symbol", get(get_recent_news))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    store: Option<Arc<dyn ArticleStore>>,
    pipeline: Option<Arc<NewsIngestionPipeline>>,
    fusion: Option<Arc<SignalFusionEngine>>,
}

/// Wire the component graph. Each piece degrades independently: a missing
/// provider key only shortens the fallback chain, a missing market data key
/// disables recommendations, a missing database disables everything that
/// needs the store.
fn build_state(settings: &Settings, pool: Option<PgPool>) -> AppState {
    let store: Option<Arc<dyn ArticleStore>> =
        pool.map(|p| Arc::new(PgArticleStore::new(p)) as Arc<dyn ArticleStore>);

    let model = match HttpSentimentModel::from_settings(settings) {
        Ok(Some(m)) => Some(Arc::new(m) as Arc<dyn SentimentModel>),
        Ok(None) => {
            tracing::warn!("SENTIMENT_API_URL not set; sentiment degrades to neutral");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "sentiment model setup failed; degrading to neutral");
            None
        }
    };
    let scorer = Arc::new(SentimentScorer::new(model));
    let phrases = Arc::new(FrequencyKeyPhraseExtractor::new());

    let pipeline = store.as_ref().map(|store| {
        Arc::new(NewsIngestionPipeline::new(
            build_providers(settings),
            scorer,
            phrases,
            store.clone(),
        ))
    });

    let fusion = match (AlphaVantageDaily::from_settings(settings), store.as_ref()) {
        (Ok(source), Some(store)) => {
            let advisor = match HttpAdvisoryClient::from_settings(settings) {
                Ok(client) => client.map(|c| Arc::new(c) as Arc<dyn newsfuse_core::fusion::AdvisoryClient>),
                Err(e) => {
                    tracing::warn!(error = %e, "advisor setup failed; using deterministic fallback");
                    None
                }
            };
            let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::new(source)));
            Some(Arc::new(SignalFusionEngine::new(
                analyzer,
                store.clone(),
                advisor,
            )))
        }
        (Err(e), _) => {
            tracing::error!(error = %e, "market data setup failed; recommendations disabled");
            None
        }
        (_, None) => None,
    };

    AppState {
        store,
        pipeline,
        fusion,
    }
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

#[derive(Debug, Deserialize)]
struct IngestParams {
    #[serde(default)]
    latest_only: bool,
}

async fn ingest_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<IngestParams>,
) -> Result<Json<IngestSummary>, StatusCode> {
    let Some(pipeline) = &state.pipeline else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let symbol = validate_symbol(&symbol).map_err(|_| StatusCode::BAD_REQUEST)?;

    let summary = pipeline.ingest(&symbol, params.latest_only).await;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct RecommendationParams {
    risk: Option<RiskProfile>,
    horizon: Option<Horizon>,
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<RecommendationParams>,
) -> Result<Json<RecommendationResponse>, StatusCode> {
    let Some(fusion) = &state.fusion else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let symbol = validate_symbol(&symbol).map_err(|_| StatusCode::BAD_REQUEST)?;

    let opts = FusionOptions {
        risk: params.risk.unwrap_or_default(),
        horizon: params.horizon.unwrap_or_default(),
    };
    Ok(Json(fusion.fuse(&symbol, opts).await))
}

#[derive(Debug, Deserialize)]
struct NewsParams {
    hours: Option<i64>,
}

async fn get_recent_news(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<NewsParams>,
) -> Result<Json<Vec<Article>>, StatusCode> {
    let Some(store) = &state.store else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let symbol = validate_symbol(&symbol).map_err(|_| StatusCode::BAD_REQUEST)?;

    let hours = params.hours.unwrap_or(24).clamp(1, 24 * 30);
    let since = Utc::now() - ChronoDuration::hours(hours);
    let articles = store.recent(&symbol, since, 100).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(articles))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
