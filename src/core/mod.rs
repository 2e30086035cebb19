pub mod analysis;
pub mod catalog;
pub mod feed;
pub mod llm;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use analysis::{AnalysisCache, AnalysisError, AnalysisRequest, AnalysisResult, AnalysisService};
use catalog::{CatalogError, FeedCatalog, FeedSource};
use feed::fetcher::FeedLoader;
use feed::{FeedCache, FeedError, FeedFetcher, FeedSnapshot};
use llm::{BackendError, ChatCompletionClient, LlmBackend};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to load feed catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("failed to build feed http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("failed to build llm client: {0}")]
    Backend(#[from] BackendError),
}

/// Everything the HTTP layer needs, cheap to clone into handlers.
#[derive(Clone)]
pub struct AppServices {
    catalog: Arc<FeedCatalog>,
    feed_cache: FeedCache,
    analysis_service: AnalysisService,
    analysis_cache: AnalysisCache,
}

impl AppServices {
    pub fn new(
        catalog: Arc<FeedCatalog>,
        loader: Arc<dyn FeedLoader>,
        backend: Option<Arc<dyn LlmBackend>>,
        feed_ttl: Duration,
        analysis_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            feed_cache: FeedCache::new(loader, feed_ttl),
            analysis_service: AnalysisService::new(backend),
            analysis_cache: AnalysisCache::new(analysis_ttl),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let catalog = Arc::new(FeedCatalog::load(config.catalog_path.as_deref())?);
        let fetcher = FeedFetcher::new(Arc::clone(&catalog), config.feed_timeout)?;
        let backend = match &config.llm {
            Some(llm) => {
                info!(model = %llm.model, base_url = %llm.base_url, "llm backend configured");
                Some(Arc::new(ChatCompletionClient::new(llm.clone())?) as Arc<dyn LlmBackend>)
            }
            None => {
                info!("no llm api key configured, running heuristic-only");
                None
            }
        };
        info!(sources = catalog.len(), "feed catalog loaded");

        Ok(Self::new(
            catalog,
            Arc::new(fetcher),
            backend,
            config.feed_ttl,
            config.analysis_ttl,
        ))
    }

    pub fn feed_sources(&self) -> &[FeedSource] {
        self.catalog.sources()
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<FeedSnapshot, FeedError> {
        self.feed_cache.get(url).await
    }

    /// Validates `request`, then serves it from the analysis cache or
    /// computes it once for every concurrent caller.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<Arc<AnalysisResult>, AnalysisError> {
        self.analysis_service.validate(&request)?;
        let key = request.cache_key();
        let service = self.analysis_service.clone();
        self.analysis_cache
            .get_or_compute(key, move || async move { service.analyze(&request).await })
            .await
    }

    pub fn purge_expired(&self) -> usize {
        self.analysis_cache.purge_expired() + self.feed_cache.purge_expired()
    }

    pub fn ai_available(&self) -> bool {
        self.analysis_service.ai_available()
    }

    pub fn health_report(&self) -> BTreeMap<String, String> {
        let mut report = BTreeMap::new();
        report.insert("catalog".to_string(), format!("ready ({} sources)", self.catalog.len()));
        report.insert(
            self.feed_cache.name().to_string(),
            self.feed_cache.status(),
        );
        report.insert(
            self.analysis_service.name().to_string(),
            self.analysis_service.status(),
        );
        report.insert(
            self.analysis_cache.name().to_string(),
            self.analysis_cache.status(),
        );
        report
    }
}
