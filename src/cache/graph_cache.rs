use futures_util::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{RelnetError, Result};
use crate::graph::GraphHandle;
use crate::model::{EntityId, NetworkEdge};

/// Default number of cached graphs
pub const DEFAULT_CAPACITY: usize = 100;

/// Default lifetime of a cached graph
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Derive the content-addressed key for a graph.
///
/// Node ids and stringified edges are sorted, so the key does not depend on
/// input order. Undirected edges are written with the smaller id first.
pub fn cache_key(nodes: &[EntityId], edges: &[NetworkEdge], directed: bool) -> String {
    let mut node_ids: Vec<EntityId> = nodes.to_vec();
    node_ids.sort_unstable();
    node_ids.dedup();

    let mut edge_strs: Vec<String> = edges
        .iter()
        .map(|e| {
            let (a, b) = if directed {
                (e.source, e.target)
            } else {
                e.pair_key()
            };
            format!("{}>{}:{}:{}", a, b, e.link_type.as_str(), e.link_code)
        })
        .collect();
    edge_strs.sort_unstable();

    let canonical = format!(
        "nodes={};edges={};directed={}",
        node_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(","),
        edge_strs.join(","),
        directed
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A built graph held by the cache.
pub struct CacheEntry<G> {
    pub key: String,
    pub graph: Arc<G>,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
}

impl<G> CacheEntry<G> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Counters describing cache behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Builder invocations
    pub builds: u64,
    pub evictions: u64,
    pub size: usize,
}

type BuildOutcome<G> = std::result::Result<Arc<G>, Arc<RelnetError>>;
type PendingBuild<G> = Shared<BoxFuture<'static, BuildOutcome<G>>>;

struct CacheState<G> {
    /// Ready entries in recency order; capacity is enforced by `evict`.
    ready: LruCache<String, CacheEntry<G>>,
    /// In-flight builds keyed by cache key.
    pending: HashMap<String, PendingBuild<G>>,
    /// Bumped by `invalidate_all` so builds started earlier do not repopulate.
    generation: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    evictions: AtomicU64,
}

/// Content-addressed graph cache with capacity, TTL and single-flight builds.
///
/// Concurrent `get_or_build` calls for the same missing key share one build.
/// The build runs on its own task, so a caller that gives up waiting does not
/// cancel it for the others.
pub struct GraphCache<G = GraphHandle> {
    state: Arc<Mutex<CacheState<G>>>,
    counters: Arc<Counters>,
    capacity: usize,
    ttl: Duration,
}

fn lock<G>(state: &Mutex<CacheState<G>>) -> MutexGuard<'_, CacheState<G>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key prefix for log lines.
fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}

/// Rebuild an owned error from a shared build failure.
fn unshare(err: &RelnetError) -> RelnetError {
    match err {
        RelnetError::Timeout(ms) => RelnetError::Timeout(*ms),
        RelnetError::InvalidArgument(m) => RelnetError::InvalidArgument(m.clone()),
        RelnetError::NotFound(m) => RelnetError::NotFound(m.clone()),
        RelnetError::ProviderFailure(m) => RelnetError::ProviderFailure(m.clone()),
        other => RelnetError::ProviderFailure(other.to_string()),
    }
}

impl<G: Send + Sync + 'static> GraphCache<G> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                ready: LruCache::unbounded(),
                pending: HashMap::new(),
                generation: 0,
            })),
            counters: Arc::new(Counters::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached graph for this node/edge set, building it with
    /// `builder` on a miss. `builder` is dropped unused on a hit or when
    /// another caller's build for the same key is already in flight.
    pub async fn get_or_build<F, Fut>(
        &self,
        nodes: &[EntityId],
        edges: &[NetworkEdge],
        directed: bool,
        builder: F,
    ) -> Result<Arc<G>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<G>> + Send + 'static,
    {
        let key = cache_key(nodes, edges, directed);
        self.get_or_build_keyed(key, builder).await
    }

    /// Same as `get_or_build` with a precomputed key.
    pub async fn get_or_build_keyed<F, Fut>(&self, key: String, builder: F) -> Result<Arc<G>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<G>> + Send + 'static,
    {
        let pending = {
            let mut state = lock(&self.state);

            if let Some(graph) = self.lookup(&mut state, &key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("Graph cache hit: {}", short(&key));
                return Ok(graph);
            }

            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            let in_flight = state.pending.get(&key).cloned();
            match in_flight {
                Some(p) => {
                    log::debug!("Graph cache miss, joining in-flight build: {}", short(&key));
                    p
                }
                None => {
                    log::debug!("Graph cache miss, building: {}", short(&key));
                    self.counters.builds.fetch_add(1, Ordering::Relaxed);
                    let p = self.spawn_build(key.clone(), state.generation, builder());
                    state.pending.insert(key, p.clone());
                    p
                }
            }
        };

        pending.await.map_err(|e| unshare(&e))
    }

    /// Fresh entry for `key`, promoted to most recently used. Expired entries are dropped.
    fn lookup(&self, state: &mut CacheState<G>, key: &str) -> Option<Arc<G>> {
        let expired = match state.ready.get_mut(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.last_accessed_at = Instant::now();
                entry.access_count += 1;
                return Some(Arc::clone(&entry.graph));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.ready.pop(key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn spawn_build<Fut>(&self, key: String, generation: u64, build: Fut) -> PendingBuild<G>
    where
        Fut: Future<Output = Result<G>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let capacity = self.capacity;
        let ttl = self.ttl;

        let task = tokio::spawn(async move {
            let outcome = build.await.map(Arc::new).map_err(Arc::new);
            let mut guard = lock(&state);
            // After an invalidation the pending slot may belong to a newer build.
            if guard.generation != generation {
                return outcome;
            }
            guard.pending.remove(&key);
            if let Ok(graph) = &outcome {
                let now = Instant::now();
                guard.ready.put(
                    key.clone(),
                    CacheEntry {
                        key,
                        graph: Arc::clone(graph),
                        created_at: now,
                        last_accessed_at: now,
                        access_count: 0,
                    },
                );
                let evicted = evict(&mut guard, capacity, ttl);
                counters.evictions.fetch_add(evicted, Ordering::Relaxed);
            }
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Arc::new(RelnetError::ProviderFailure(format!(
                    "graph build task failed: {}",
                    e
                )))),
            }
        }
        .boxed()
        .shared()
    }

    /// Whether a fresh entry exists for `key`. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        let state = lock(&self.state);
        state
            .ready
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(self.ttl))
    }

    /// Access count of a ready entry.
    pub fn access_count(&self, key: &str) -> Option<u64> {
        lock(&self.state).ready.peek(key).map(|e| e.access_count)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and detach in-flight builds; there is no partial invalidation.
    pub fn invalidate_all(&self) {
        let mut state = lock(&self.state);
        let dropped = state.ready.len();
        state.ready.clear();
        state.pending.clear();
        state.generation += 1;
        log::info!("Graph cache invalidated ({} entries dropped)", dropped);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            builds: self.counters.builds.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

impl<G: Send + Sync + 'static> Default for GraphCache<G> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

/// Over capacity: purge expired entries first, then least recently accessed.
fn evict<G>(state: &mut CacheState<G>, capacity: usize, ttl: Duration) -> u64 {
    if state.ready.len() <= capacity {
        return 0;
    }
    let mut evicted = 0;
    let expired: Vec<String> = state
        .ready
        .iter()
        .filter(|(_, entry)| entry.is_expired(ttl))
        .map(|(key, _)| key.clone())
        .collect();
    for key in expired {
        state.ready.pop(&key);
        evicted += 1;
    }
    while state.ready.len() > capacity {
        if state.ready.pop_lru().is_none() {
            break;
        }
        evicted += 1;
    }
    evicted
}
