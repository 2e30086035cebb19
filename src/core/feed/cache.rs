use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::fetcher::{validate_feed_url, FeedError, FeedLoader, FetchOutcome, Validators};
use super::types::{Article, FeedMeta};

pub const DEFAULT_FEED_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct FeedCacheEntry {
    meta: FeedMeta,
    articles: Arc<Vec<Article>>,
    fetched_at: DateTime<Utc>,
    expires_at: Instant,
    validators: Validators,
}

type Slot = Arc<Mutex<Option<FeedCacheEntry>>>;

/// What a caller gets back for one feed URL.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub url: String,
    pub meta: FeedMeta,
    pub articles: Arc<Vec<Article>>,
    pub fetched_at: DateTime<Utc>,
    pub cached: bool,
}

/// Short-lived per-URL memo of fetched feeds.
///
/// Each URL owns its own async mutex, so two requests for the same feed never
/// fetch it twice concurrently while unrelated feeds proceed in parallel. A
/// failed refresh leaves any previous entry untouched and reports the error;
/// a URL that never loaded successfully keeps no slot behind.
#[derive(Clone)]
pub struct FeedCache {
    loader: Arc<dyn FeedLoader>,
    ttl: Duration,
    slots: Arc<DashMap<String, Slot>>,
}

impl FeedCache {
    pub fn new(loader: Arc<dyn FeedLoader>, ttl: Duration) -> Self {
        Self {
            loader,
            ttl,
            slots: Arc::new(DashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        "feed_cache"
    }

    pub fn status(&self) -> String {
        format!("ready ({} feeds)", self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops idle slots whose entry is gone or more than one TTL past expiry.
    /// Recently expired entries stay so their validators can still revalidate.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            // the map holds one reference, anything more is an in-flight request
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard
                    .as_ref()
                    .is_some_and(|entry| entry.expires_at + ttl > now),
                Err(_) => true,
            }
        });
        let purged = before.saturating_sub(self.slots.len());
        if purged > 0 {
            debug!(purged, "purged stale feed cache slots");
        }
        purged
    }

    pub async fn get(&self, url: &str) -> Result<FeedSnapshot, FeedError> {
        let key = validate_feed_url(url)?.to_string();
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        // The refresh runs detached so a caller giving up does not abort a
        // fetch that queued callers are waiting on.
        let loader = Arc::clone(&self.loader);
        let slots = Arc::clone(&self.slots);
        let ttl = self.ttl;
        let refresh =
            tokio::spawn(async move { refresh_slot(loader, slots, slot, key, ttl).await });
        match refresh.await {
            Ok(result) => result,
            Err(error) => Err(FeedError::Unreachable(format!("feed refresh task failed: {error}"))),
        }
    }
}

async fn refresh_slot(
    loader: Arc<dyn FeedLoader>,
    slots: Arc<DashMap<String, Slot>>,
    slot: Slot,
    url: String,
    ttl: Duration,
) -> Result<FeedSnapshot, FeedError> {
    let mut guard = slot.lock().await;

    if let Some(entry) = guard.as_ref() {
        if entry.expires_at > Instant::now() {
            debug!(url = %url, "feed cache hit");
            return Ok(snapshot(&url, entry, true));
        }
    }

    let validators = guard
        .as_ref()
        .map(|entry| entry.validators.clone())
        .unwrap_or_default();
    debug!(url = %url, conditional = !validators.is_empty(), "feed cache miss");
    let outcome = match loader.load(&url, &validators).await {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(url = %url, kind = error.kind(), error = %error, "feed refresh failed");
            if guard.is_none() {
                drop(guard);
                forget_empty_slot(&slots, &url, &slot);
            }
            return Err(error);
        }
    };

    match outcome {
        FetchOutcome::NotModified => match guard.as_mut() {
            Some(entry) => {
                debug!(url = %url, "feed unchanged, extending cached entry");
                entry.expires_at = Instant::now() + ttl;
                Ok(snapshot(&url, entry, true))
            }
            None => {
                drop(guard);
                forget_empty_slot(&slots, &url, &slot);
                Err(FeedError::Unreachable(
                    "server answered 304 without a cached copy".to_string(),
                ))
            }
        },
        FetchOutcome::Updated { feed, validators } => {
            let entry = FeedCacheEntry {
                meta: feed.meta,
                articles: Arc::new(feed.articles),
                fetched_at: Utc::now(),
                expires_at: Instant::now() + ttl,
                validators,
            };
            let result = snapshot(&url, &entry, false);
            *guard = Some(entry);
            Ok(result)
        }
    }
}

/// Removes a slot that never held an entry, unless another request is
/// already queued on it and will retry the load.
fn forget_empty_slot(slots: &DashMap<String, Slot>, url: &str, slot: &Slot) {
    let removed = slots.remove_if(url, |_, current| {
        Arc::ptr_eq(current, slot) && Arc::strong_count(current) == 2
    });
    if removed.is_some() {
        debug!(url = %url, "dropped empty feed cache slot");
    }
}

fn snapshot(url: &str, entry: &FeedCacheEntry, cached: bool) -> FeedSnapshot {
    FeedSnapshot {
        url: url.to_string(),
        meta: entry.meta.clone(),
        articles: Arc::clone(&entry.articles),
        fetched_at: entry.fetched_at,
        cached,
    }
}
