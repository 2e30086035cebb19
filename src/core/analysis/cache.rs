use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::service::AnalysisError;
use super::types::{AnalysisResult, CacheKey};

pub const DEFAULT_ANALYSIS_TTL: Duration = Duration::from_secs(3_600);

type SharedResult = Shared<BoxFuture<'static, Result<Arc<AnalysisResult>, AnalysisError>>>;

enum Slot {
    Ready {
        result: Arc<AnalysisResult>,
        expires_at: Instant,
    },
    InFlight(SharedResult),
}

enum Lookup {
    Hit(Arc<AnalysisResult>),
    Pending(SharedResult),
    Stale,
}

impl Slot {
    fn lookup(&self, now: Instant) -> Lookup {
        match self {
            Slot::Ready { result, expires_at } if *expires_at > now => Lookup::Hit(Arc::clone(result)),
            Slot::Ready { .. } => Lookup::Stale,
            Slot::InFlight(pending) => Lookup::Pending(pending.clone()),
        }
    }
}

struct Inner {
    slots: DashMap<CacheKey, Slot>,
    ttl: Duration,
}

/// Memo of analysis results keyed by [`CacheKey`], with request coalescing.
///
/// The first caller for a key starts the computation on its own task; later
/// callers await the same shared future. The task settles the slot itself, so
/// callers that give up never cancel the work or leave a dangling entry.
#[derive(Clone)]
pub struct AnalysisCache {
    inner: Arc<Inner>,
}

impl AnalysisCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                ttl,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        "analysis_cache"
    }

    pub fn status(&self) -> String {
        format!("ready ({} entries)", self.len())
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<Arc<AnalysisResult>, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AnalysisResult, AnalysisError>> + Send + 'static,
    {
        let now = Instant::now();
        let pending = match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get().lookup(now) {
                Lookup::Hit(result) => {
                    debug!(key = key.as_str(), "analysis cache hit");
                    return Ok(result);
                }
                Lookup::Pending(pending) => {
                    debug!(key = key.as_str(), "joining in-flight analysis");
                    pending
                }
                Lookup::Stale => {
                    let pending = self.launch(key.clone(), compute());
                    occupied.insert(Slot::InFlight(pending.clone()));
                    pending
                }
            },
            Entry::Vacant(vacant) => {
                let pending = self.launch(key.clone(), compute());
                vacant.insert(Slot::InFlight(pending.clone()));
                pending
            }
        };
        pending.await
    }

    /// Drops ready entries whose TTL has passed and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.slots.len();
        self.inner.slots.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } => *expires_at > now,
            Slot::InFlight(_) => true,
        });
        before.saturating_sub(self.inner.slots.len())
    }

    fn launch<Fut>(&self, key: CacheKey, computation: Fut) -> SharedResult
    where
        Fut: Future<Output = Result<AnalysisResult, AnalysisError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(computation).catch_unwind().await {
                Ok(Ok(result)) => Ok(Arc::new(result)),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(AnalysisError::Internal("analysis computation panicked".to_string())),
            };
            inner.settle(&key, &result);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(error) => Err(AnalysisError::Internal(format!("analysis task failed: {error}"))),
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    fn settle(&self, key: &CacheKey, result: &Result<Arc<AnalysisResult>, AnalysisError>) {
        match result {
            Ok(result) => {
                self.slots.insert(
                    key.clone(),
                    Slot::Ready {
                        result: Arc::clone(result),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
            }
            Err(error) => {
                warn!(key = key.as_str(), kind = error.kind(), error = %error, "analysis failed");
                self.slots
                    .remove_if(key, |_, slot| matches!(slot, Slot::InFlight(_)));
            }
        }
    }
}
