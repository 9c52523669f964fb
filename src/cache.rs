//! Panorama metadata cache
//!
//! TTL cache in front of a [`PanoramaDataProvider`] with in-flight request
//! de-duplication: concurrent callers asking for the same panorama share a
//! single provider call.
//!
//! For any panorama id there is at most one cache entry *or* one in-flight
//! request. Starting a refetch removes the stale entry; a successful fetch
//! installs the new entry and drops the in-flight marker under the same lock.
//! Failures are handed to every waiter and never cached.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::CacheConfig;
use crate::error::{NavError, NavResult};
use crate::provider::PanoramaDataProvider;
use crate::types::{ConnectedPanorama, PanoramaMetadata};

type SharedFetch = Shared<BoxFuture<'static, NavResult<Arc<PanoramaMetadata>>>>;

/// A fetched panorama. Superseded, never mutated, on refetch.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Arc<PanoramaMetadata>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, SharedFetch>,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined an existing in-flight request
    pub coalesced: u64,
}

/// Outcome of a batch preload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Distinct ids after de-duplication
    pub requested: usize,
    pub skipped_fresh: usize,
    pub fetched: usize,
    pub failed: Vec<String>,
}

/// TTL cache with request coalescing for panorama metadata
pub struct PanoramaCache {
    provider: Arc<dyn PanoramaDataProvider>,
    ttl: Duration,
    preload_concurrency: usize,
    fetch_timeout: Option<Duration>,
    state: Arc<Mutex<CacheState>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl PanoramaCache {
    pub fn new(provider: Arc<dyn PanoramaDataProvider>, config: &CacheConfig) -> Self {
        Self {
            provider,
            ttl: config.ttl(),
            preload_concurrency: config.preload_concurrency.max(1),
            fetch_timeout: config.fetch_timeout(),
            state: Arc::new(Mutex::new(CacheState::default())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get panorama metadata, fetching it if there is no fresh entry
    pub async fn get(&self, panorama_id: &str) -> NavResult<Arc<PanoramaMetadata>> {
        self.get_with_cancel(panorama_id, &CancellationToken::never())
            .await
    }

    /// Like [`get`](Self::get), but stops waiting when `cancel` fires.
    ///
    /// Cancelling only abandons this caller's wait. The provider call keeps
    /// running and still populates the cache for later callers.
    pub async fn get_with_cancel(
        &self,
        panorama_id: &str,
        cancel: &CancellationToken,
    ) -> NavResult<Arc<PanoramaMetadata>> {
        let pending = {
            let mut state = self.lock_state();

            if let Some(entry) = state.entries.get(panorama_id) {
                if entry.age(Instant::now()) < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.data.clone());
                }
            }

            if let Some(in_flight) = state.in_flight.get(panorama_id) {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                in_flight.clone()
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                state.entries.remove(panorama_id);
                let fetch = self.spawn_fetch(panorama_id);
                state
                    .in_flight
                    .insert(panorama_id.to_string(), fetch.clone());
                fetch
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NavError::Cancelled),
            result = pending => result,
        }
    }

    /// Adjacent panoramas of `panorama_id` that have both a target and a heading
    pub async fn connected_panoramas(
        &self,
        panorama_id: &str,
    ) -> NavResult<Vec<ConnectedPanorama>> {
        let metadata = self.get(panorama_id).await?;
        Ok(metadata.connected())
    }

    /// Warm the cache for a set of panoramas.
    ///
    /// Duplicates and fresh entries are skipped; the rest are fetched with at
    /// most `preload_concurrency` provider calls outstanding. A failure for
    /// one id is logged and does not abort the batch.
    pub async fn batch_preload<S: AsRef<str>>(&self, panorama_ids: &[S]) -> PreloadReport {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = panorama_ids
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| seen.insert(*id))
            .collect();

        let cold: Vec<String> = unique
            .iter()
            .filter(|id| !self.contains_fresh(id))
            .map(|id| id.to_string())
            .collect();

        let mut report = PreloadReport {
            requested: unique.len(),
            skipped_fresh: unique.len() - cold.len(),
            ..Default::default()
        };

        debug!(
            requested = report.requested,
            to_fetch = cold.len(),
            concurrency = self.preload_concurrency,
            "Preloading panoramas"
        );

        let results: Vec<(String, NavResult<Arc<PanoramaMetadata>>)> = stream::iter(cold)
            .map(|id| async move {
                let result = self.get(&id).await;
                (id, result)
            })
            .buffer_unordered(self.preload_concurrency)
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(_) => report.fetched += 1,
                Err(e) => {
                    warn!(panorama_id = %id, error = %e, "Error preloading panorama");
                    report.failed.push(id);
                }
            }
        }

        report
    }

    /// Remove every entry older than the TTL. Returns the number removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut state = self.lock_state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.age(now) <= ttl);
        let evicted = before - state.entries.len();
        if evicted > 0 {
            info!(evicted, remaining = state.entries.len(), "Evicted expired panoramas");
        }
        evicted
    }

    /// Whether a fresh entry exists for `panorama_id`
    pub fn contains_fresh(&self, panorama_id: &str) -> bool {
        let now = Instant::now();
        self.lock_state()
            .entries
            .get(panorama_id)
            .map(|entry| entry.age(now) < self.ttl)
            .unwrap_or(false)
    }

    /// Stored entry for `panorama_id`, fresh or stale, without fetching
    /// or touching the hit counters
    pub fn peek(&self, panorama_id: &str) -> Option<Arc<PanoramaMetadata>> {
        self.lock_state()
            .entries
            .get(panorama_id)
            .map(|entry| entry.data.clone())
    }

    pub fn is_in_flight(&self, panorama_id: &str) -> bool {
        self.lock_state().in_flight.contains_key(panorama_id)
    }

    /// Number of stored entries, fresh or stale
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the provider call on its own task so it settles even if every
    /// caller stops waiting. Settlement updates the state before waking
    /// the waiters.
    fn spawn_fetch(&self, panorama_id: &str) -> SharedFetch {
        let (tx, rx) = oneshot::channel();
        let provider = self.provider.clone();
        let state = self.state.clone();
        let fetch_timeout = self.fetch_timeout;
        let id = panorama_id.to_string();

        tokio::spawn(async move {
            let result = fetch_once(provider.as_ref(), &id, fetch_timeout)
                .await
                .map(Arc::new);

            {
                let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
                state.in_flight.remove(&id);
                if let Ok(data) = &result {
                    state.entries.insert(
                        id.clone(),
                        CacheEntry {
                            data: data.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
            }

            match &result {
                Ok(_) => debug!(panorama_id = %id, "Cached panorama metadata"),
                Err(e) => warn!(panorama_id = %id, error = %e, "Panorama fetch failed"),
            }

            let _ = tx.send(result);
        });

        let id = panorama_id.to_string();
        async move {
            rx.await
                .unwrap_or_else(|_| Err(NavError::fetch(id, "fetch task aborted")))
        }
        .boxed()
        .shared()
    }
}

async fn fetch_once(
    provider: &dyn PanoramaDataProvider,
    panorama_id: &str,
    fetch_timeout: Option<Duration>,
) -> NavResult<PanoramaMetadata> {
    match fetch_timeout {
        Some(limit) => tokio::time::timeout(limit, provider.fetch(panorama_id))
            .await
            .unwrap_or_else(|_| {
                Err(NavError::FetchTimeout {
                    panorama_id: panorama_id.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }),
        None => provider.fetch(panorama_id).await,
    }
}
