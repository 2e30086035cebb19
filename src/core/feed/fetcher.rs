use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::normalize::normalize_feed;
use super::parser::parse_feed_bytes;
use super::types::FetchedFeed;
use crate::core::catalog::FeedCatalog;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const MAX_FEED_BYTES: usize = 5 * 1024 * 1024;
const USER_AGENT: &str = concat!("feedlens/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub body: Vec<u8>,
    pub validators: Validators,
}

/// Conditional-request validators remembered from a previous response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum FetchStatus {
    Updated(FetchedBody),
    NotModified,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Updated {
        feed: FetchedFeed,
        validators: Validators,
    },
    NotModified,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),
    #[error("feed request timed out after {0:?}")]
    Timeout(Duration),
    #[error("feed unreachable: {0}")]
    Unreachable(String),
    #[error("malformed feed: {0}")]
    MalformedFeed(String),
}

impl FeedError {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::InvalidUrl(_) => "InvalidURL",
            FeedError::Timeout(_) => "Timeout",
            FeedError::Unreachable(_) => "Unreachable",
            FeedError::MalformedFeed(_) => "MalformedFeed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("feed body exceeds {MAX_FEED_BYTES} bytes")]
    TooLarge,
}

impl RequestError {
    fn into_feed_error(self, timeout: Duration) -> FeedError {
        match self {
            RequestError::Request(error) if error.is_timeout() => FeedError::Timeout(timeout),
            RequestError::Request(error) => FeedError::Unreachable(error.to_string()),
            RequestError::HttpStatus(code) => {
                FeedError::Unreachable(format!("server answered with status {code}"))
            }
            RequestError::TooLarge => FeedError::MalformedFeed(RequestError::TooLarge.to_string()),
        }
    }
}

/// Source of feed data for the cache. The production implementation is
/// [`FeedFetcher`]; tests substitute scripted loaders.
#[async_trait]
pub trait FeedLoader: Send + Sync {
    async fn load(&self, url: &str, validators: &Validators) -> Result<FetchOutcome, FeedError>;
}

/// Checks that `raw` is an absolute http(s) URL.
pub fn validate_feed_url(raw: &str) -> Result<Url, FeedError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|error| FeedError::InvalidUrl(format!("{trimmed}: {error}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(FeedError::InvalidUrl(format!(
            "{trimmed}: unsupported scheme `{scheme}`"
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    catalog: Arc<FeedCatalog>,
    timeout: Duration,
    max_retries: usize,
}

impl FeedFetcher {
    pub fn new(catalog: Arc<FeedCatalog>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            catalog,
            timeout,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Fetches, parses and normalizes the feed at `url`.
    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed, FeedError> {
        match self.fetch_conditional(url, &Validators::default()).await? {
            FetchOutcome::Updated { feed, .. } => Ok(feed),
            FetchOutcome::NotModified => Err(FeedError::Unreachable(
                "server answered 304 to an unconditional request".to_string(),
            )),
        }
    }

    pub async fn fetch_conditional(
        &self,
        url: &str,
        validators: &Validators,
    ) -> Result<FetchOutcome, FeedError> {
        let parsed_url = validate_feed_url(url)?;
        info!(url = %parsed_url, "fetching feed");

        let retrieval = fetch_feed_with_retry(&self.client, parsed_url.as_str(), validators, self.max_retries);
        let status = match tokio::time::timeout(self.timeout, retrieval).await {
            Ok(result) => result.map_err(|error| error.into_feed_error(self.timeout))?,
            Err(_) => return Err(FeedError::Timeout(self.timeout)),
        };

        let payload = match status {
            FetchStatus::NotModified => {
                debug!(url = %parsed_url, "feed not modified");
                return Ok(FetchOutcome::NotModified);
            }
            FetchStatus::Updated(payload) => payload,
        };

        let parsed = parse_feed_bytes(&payload.body)
            .map_err(|error| FeedError::MalformedFeed(error.to_string()))?;
        let fallback_name = self.fallback_source_name(&parsed_url);
        let feed = normalize_feed(parsed, &fallback_name);
        info!(
            url = %parsed_url,
            articles = feed.articles.len(),
            "feed fetched"
        );

        Ok(FetchOutcome::Updated {
            feed,
            validators: payload.validators,
        })
    }

    fn fallback_source_name(&self, url: &Url) -> String {
        self.catalog
            .lookup(url.as_str())
            .map(|source| source.name.clone())
            .or_else(|| url.host_str().map(ToString::to_string))
            .unwrap_or_else(|| url.to_string())
    }
}

#[async_trait]
impl FeedLoader for FeedFetcher {
    async fn load(&self, url: &str, validators: &Validators) -> Result<FetchOutcome, FeedError> {
        self.fetch_conditional(url, validators).await
    }
}

async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    validators: &Validators,
) -> Result<FetchStatus, RequestError> {
    let mut request = client.get(url);
    if let Some(value) = validators.etag.as_deref() {
        request = request.header(IF_NONE_MATCH, value);
    }
    if let Some(value) = validators.last_modified.as_deref() {
        request = request.header(IF_MODIFIED_SINCE, value);
    }

    let mut response = request.send().await?;
    let status = response.status();
    if status.as_u16() == 304 {
        return Ok(FetchStatus::NotModified);
    }
    if !status.is_success() {
        return Err(RequestError::HttpStatus(status.as_u16()));
    }

    let validators = Validators {
        etag: header_value(response.headers(), reqwest::header::ETAG),
        last_modified: header_value(response.headers(), LAST_MODIFIED),
    };

    if response
        .content_length()
        .is_some_and(|length| length > MAX_FEED_BYTES as u64)
    {
        return Err(RequestError::TooLarge);
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > MAX_FEED_BYTES {
            return Err(RequestError::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(FetchStatus::Updated(FetchedBody { body, validators }))
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

async fn fetch_feed_with_retry(
    client: &reqwest::Client,
    url: &str,
    validators: &Validators,
    max_retries: usize,
) -> Result<FetchStatus, RequestError> {
    let mut attempt = 0_usize;
    loop {
        match fetch_feed(client, url, validators).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let should_retry = matches!(&err, RequestError::Request(inner) if !inner.is_timeout())
                    || matches!(err, RequestError::HttpStatus(code) if code >= 500);
                if !should_retry || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                warn!(url, attempt, error = %err, "retrying feed request");
                tokio::time::sleep(Duration::from_millis(40 * attempt as u64)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ETAG: &str = "\"feedlens-v1\"";

    #[derive(Clone)]
    struct AppState {
        request_count: Arc<AtomicUsize>,
    }

    fn xml_response(body: &'static [u8]) -> Response {
        let mut response = Response::new(axum::body::Body::from(body));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            "application/rss+xml".parse().expect("header must parse"),
        );
        response
            .headers_mut()
            .insert(reqwest::header::ETAG, ETAG.parse().expect("header must parse"));
        response
    }

    async fn flaky_feed(State(state): State<AppState>, headers: HeaderMap) -> Response {
        let counter = state.request_count.fetch_add(1, Ordering::SeqCst);
        if counter == 0 {
            let mut response = Response::new(axum::body::Body::from("temporary failure"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }
        if headers
            .get(IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            == Some(ETAG)
        {
            let mut response = Response::new(axum::body::Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            return response;
        }
        xml_response(include_bytes!("../../../fixtures/feeds/sample.rss.xml"))
    }

    async fn slow_feed() -> Response {
        tokio::time::sleep(Duration::from_secs(5)).await;
        xml_response(include_bytes!("../../../fixtures/feeds/sample.rss.xml"))
    }

    async fn not_a_feed() -> &'static str {
        "<html><body>hello</body></html>"
    }

    async fn api_status() -> axum::Json<serde_json::Value> {
        axum::Json(serde_json::json!({"status": "ok", "items": []}))
    }

    async fn missing() -> StatusCode {
        StatusCode::NOT_FOUND
    }

    async fn oversized_feed() -> Vec<u8> {
        vec![b' '; MAX_FEED_BYTES + 1]
    }

    // no content-length, so only the running total can stop it
    async fn oversized_stream() -> axum::body::Body {
        let chunks = (0..6).map(|_| Ok::<_, std::io::Error>(vec![b' '; 1024 * 1024]));
        axum::body::Body::from_stream(futures::stream::iter(chunks))
    }

    async fn spawn_test_server() -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        let state = AppState {
            request_count: Arc::clone(&request_count),
        };
        let app = Router::new()
            .route("/feed.xml", get(flaky_feed))
            .route("/slow.xml", get(slow_feed))
            .route("/page.html", get(not_a_feed))
            .route("/status.json", get(api_status))
            .route("/missing.xml", get(missing))
            .route("/huge.xml", get(oversized_feed))
            .route("/stream.xml", get(oversized_stream))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), request_count, join_handle)
    }

    fn fetcher(timeout: Duration) -> FeedFetcher {
        FeedFetcher::new(Arc::new(FeedCatalog::builtin()), timeout).expect("client should build")
    }

    #[tokio::test]
    async fn fetch_retries_and_supports_conditional_requests() {
        let (base, request_count, server_task) = spawn_test_server().await;
        let fetcher = fetcher(Duration::from_secs(5));
        let url = format!("{base}/feed.xml");

        let first = fetcher
            .fetch_conditional(&url, &Validators::default())
            .await
            .expect("first fetch should succeed with retry");
        let validators = match first {
            FetchOutcome::Updated { feed, validators } => {
                assert_eq!(feed.meta.title, "Example Engineering Blog");
                assert_eq!(feed.articles.len(), 3);
                validators
            }
            FetchOutcome::NotModified => panic!("first fetch should be updated"),
        };
        assert_eq!(validators.etag.as_deref(), Some(ETAG));
        assert_eq!(request_count.load(Ordering::SeqCst), 2);

        let second = fetcher
            .fetch_conditional(&url, &validators)
            .await
            .expect("second fetch should succeed");
        assert!(matches!(second, FetchOutcome::NotModified));

        server_task.abort();
    }

    #[tokio::test]
    async fn invalid_urls_fail_without_network() {
        let fetcher = fetcher(Duration::from_secs(1));
        for raw in ["not a url", "/relative/feed.xml", "ftp://example.com/feed", "file:///etc/passwd"] {
            let error = fetcher.fetch(raw).await.expect_err("must reject");
            assert_eq!(error.kind(), "InvalidURL", "{raw}");
        }
    }

    #[tokio::test]
    async fn slow_servers_time_out() {
        let (base, _, server_task) = spawn_test_server().await;
        let fetcher = fetcher(Duration::from_millis(300));

        let error = fetcher
            .fetch(&format!("{base}/slow.xml"))
            .await
            .expect_err("slow feed must time out");
        assert_eq!(error.kind(), "Timeout");

        server_task.abort();
    }

    #[tokio::test]
    async fn html_pages_and_plain_json_are_malformed_feeds() {
        let (base, _, server_task) = spawn_test_server().await;
        let fetcher = fetcher(Duration::from_secs(5));
        for path in ["page.html", "status.json"] {
            let error = fetcher
                .fetch(&format!("{base}/{path}"))
                .await
                .expect_err("not a feed");
            assert_eq!(error.kind(), "MalformedFeed", "{path}");
        }

        server_task.abort();
    }

    #[tokio::test]
    async fn client_errors_and_closed_ports_are_unreachable() {
        let (base, _, server_task) = spawn_test_server().await;
        let fetcher = fetcher(Duration::from_secs(5)).with_max_retries(0);

        let error = fetcher
            .fetch(&format!("{base}/missing.xml"))
            .await
            .expect_err("404 must fail");
        assert_eq!(error.kind(), "Unreachable");

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let closed = listener.local_addr().expect("addr");
        drop(listener);
        let error = fetcher
            .fetch(&format!("http://{closed}/feed.xml"))
            .await
            .expect_err("closed port must fail");
        assert_eq!(error.kind(), "Unreachable");

        server_task.abort();
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let (base, _, server_task) = spawn_test_server().await;
        let fetcher = fetcher(Duration::from_secs(10));

        for path in ["huge.xml", "stream.xml"] {
            let error = fetcher
                .fetch(&format!("{base}/{path}"))
                .await
                .expect_err("body over the cap must fail");
            assert_eq!(error.kind(), "MalformedFeed", "{path}");
            assert!(error.to_string().contains("exceeds"), "{path}: {error}");
        }

        server_task.abort();
    }
}
