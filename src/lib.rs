pub mod config;
pub mod core;
pub mod error;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::core::analysis::{
    AnalysisError, AnalysisPayload, AnalysisRequest, AnalysisResult, AnalysisSource, Operation,
};
use crate::core::analysis::types::SentimentLabel;
use crate::core::catalog::FeedSource;
use crate::core::feed::types::FeedMeta;
use crate::core::feed::Article;
use crate::error::ApiError;

pub use crate::config::AppConfig;
pub use crate::core::AppServices;

const DEFAULT_SUMMARY_WORDS: i64 = 150;
const DEFAULT_KEY_POINTS: i64 = 5;

#[derive(Clone)]
pub struct AppState {
    services: AppServices,
}

#[derive(Debug, Deserialize)]
struct FetchFeedQuery {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct FetchFeedResponse {
    url: String,
    feed: FeedMeta,
    articles: Vec<Article>,
    fetched_at: DateTime<Utc>,
    cached: bool,
}

#[derive(Debug, Deserialize)]
struct SummaryRequest {
    #[serde(default)]
    title: String,
    content: String,
    max_length: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SummaryResponse {
    summary: String,
    source: AnalysisSource,
}

#[derive(Debug, Deserialize)]
struct KeyPointsRequest {
    #[serde(default)]
    title: String,
    content: String,
    num_points: Option<i64>,
}

#[derive(Debug, Serialize)]
struct KeyPointsResponse {
    key_points: Vec<String>,
    source: AnalysisSource,
}

#[derive(Debug, Deserialize)]
struct SentimentRequest {
    #[serde(default)]
    title: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct SentimentResponse {
    label: SentimentLabel,
    confidence: f64,
    explanation: Option<String>,
    source: AnalysisSource,
}

pub fn build_router(services: AppServices) -> Router {
    Router::new()
        .route("/api/feeds", get(list_feeds))
        .route("/api/fetch-feed", get(fetch_feed))
        .route("/api/generate-summary", post(generate_summary))
        .route("/api/generate-key-points", post(generate_key_points))
        .route("/api/analyze-sentiment", post(analyze_sentiment))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { services })
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<S>(listener: TcpListener, services: AppServices, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(services))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Periodically evicts expired analysis results and stale feed slots.
pub fn spawn_purge_task(services: AppServices, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = services.purge_expired();
            if purged > 0 {
                debug!(purged, "purged expired cache entries");
            }
        }
    })
}

async fn list_feeds(State(state): State<AppState>) -> Json<Vec<FeedSource>> {
    Json(state.services.feed_sources().to_vec())
}

async fn fetch_feed(
    State(state): State<AppState>,
    Query(query): Query<FetchFeedQuery>,
) -> Result<Json<FetchFeedResponse>, ApiError> {
    let url = query
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or(ApiError::MissingParameter("url"))?;
    info!(url = %url, "fetching feed");

    let snapshot = state.services.fetch_feed(url.trim()).await?;
    info!(url = %snapshot.url, articles = snapshot.articles.len(), cached = snapshot.cached, "feed ready");

    Ok(Json(FetchFeedResponse {
        url: snapshot.url,
        feed: snapshot.meta,
        articles: Vec::clone(&snapshot.articles),
        fetched_at: snapshot.fetched_at,
        cached: snapshot.cached,
    }))
}

async fn generate_summary(
    State(state): State<AppState>,
    body: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let Json(body) = body?;
    let max_words = requested_count("max_length", body.max_length.unwrap_or(DEFAULT_SUMMARY_WORDS))?;
    let request = AnalysisRequest::new(body.title, body.content, Operation::Summary { max_words });
    let result = state.services.analyze(request).await?;

    match &result.payload {
        AnalysisPayload::Summary { summary } => Ok(Json(SummaryResponse {
            summary: summary.clone(),
            source: result.source,
        })),
        _ => Err(unexpected_payload(&result)),
    }
}

async fn generate_key_points(
    State(state): State<AppState>,
    body: Result<Json<KeyPointsRequest>, JsonRejection>,
) -> Result<Json<KeyPointsResponse>, ApiError> {
    let Json(body) = body?;
    let count = requested_count("num_points", body.num_points.unwrap_or(DEFAULT_KEY_POINTS))?;
    let request = AnalysisRequest::new(body.title, body.content, Operation::KeyPoints { count });
    let result = state.services.analyze(request).await?;

    match &result.payload {
        AnalysisPayload::KeyPoints { key_points } => Ok(Json(KeyPointsResponse {
            key_points: key_points.clone(),
            source: result.source,
        })),
        _ => Err(unexpected_payload(&result)),
    }
}

async fn analyze_sentiment(
    State(state): State<AppState>,
    body: Result<Json<SentimentRequest>, JsonRejection>,
) -> Result<Json<SentimentResponse>, ApiError> {
    let Json(body) = body?;
    let request = AnalysisRequest::new(body.title, body.content, Operation::Sentiment);
    let result = state.services.analyze(request).await?;

    match result.payload {
        AnalysisPayload::Sentiment {
            label,
            confidence,
            ref explanation,
        } => Ok(Json(SentimentResponse {
            label,
            confidence,
            explanation: explanation.clone(),
            source: result.source,
        })),
        _ => Err(unexpected_payload(&result)),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "ai_available": state.services.ai_available(),
        "services": state.services.health_report(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn requested_count(name: &str, value: i64) -> Result<usize, ApiError> {
    usize::try_from(value).map_err(|_| {
        AnalysisError::InvalidArgument(format!("{name} must be a positive number, got {value}")).into()
    })
}

fn unexpected_payload(result: &AnalysisResult) -> ApiError {
    AnalysisError::Internal(format!("cached result has unexpected operation {:?}", result.operation())).into()
}
