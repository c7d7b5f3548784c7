//! Time-bounded, single-writer cache with stale-while-revalidate.
//!
//! One `TtlCache` guards one cache key. At most one load runs at a time:
//! - `Empty`: readers queue on the refresh guard and share the first result
//! - `Fresh`: readers get the published value
//! - `Stale`: readers get the published value immediately while a single
//!   background task reloads it
//!
//! A failed reload never replaces a published value. Readers queued behind
//! a failed load share its error, and a failed background reload is not
//! retried before the failure backoff has passed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

/// Time source, injectable so tests can move time forward.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

/// Minimum pause between a failed background reload and the next one
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(30);

/// Produces the value a cache holds.
#[async_trait]
pub trait CacheLoader: Send + Sync + 'static {
    type Value: Send + Sync + 'static;
    /// Cloned to every reader that waited on the failed load
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    async fn load(&self) -> Result<Self::Value, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing was ever loaded successfully
    Empty,
    Fresh,
    /// Past its TTL, still served
    Stale,
}

/// Expiry and retry timing for a `TtlCache`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub failure_backoff: Duration,
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
        }
    }

    pub fn with_failure_backoff(mut self, failure_backoff: Duration) -> Self {
        self.failure_backoff = failure_backoff;
        self
    }
}

impl From<Duration> for CachePolicy {
    fn from(ttl: Duration) -> Self {
        Self::new(ttl)
    }
}

/// Counters and last failure, for diagnostics only
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub state: CacheState,
    pub hits: u64,
    pub stale_hits: u64,
    pub loads: u64,
    pub refreshes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    /// Time since the published value was loaded
    pub age: Option<Duration>,
}

struct CacheEntry<T> {
    value: Arc<T>,
    refreshed_at: Instant,
    /// `None` when the TTL overflows `Instant`
    expires_at: Option<Instant>,
}

struct Failure<E> {
    /// Value of `Inner::attempts` once this load finished
    attempt: u64,
    at: Instant,
    error: E,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    loads: AtomicU64,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

struct Inner<L: CacheLoader> {
    name: String,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    loader: Arc<L>,
    entry: RwLock<Option<Arc<CacheEntry<L::Value>>>>,
    refresh_guard: Arc<tokio::sync::Mutex<()>>,
    counters: Counters,
    /// Finished loads, bumped under `refresh_guard`
    attempts: AtomicU64,
    last_failure: Mutex<Option<Failure<L::Error>>>,
}

impl<L: CacheLoader> Inner<L> {
    fn current(&self) -> Option<Arc<CacheEntry<L::Value>>> {
        self.entry.read().clone()
    }

    fn is_fresh(&self, entry: &CacheEntry<L::Value>) -> bool {
        let now = self.clock.now();
        entry.expires_at.map_or(true, |expires_at| now < expires_at)
    }

    /// Error of a load that finished after `seen` attempts, if the latest one failed
    fn failure_since(&self, seen: u64) -> Option<L::Error> {
        self.last_failure
            .lock()
            .as_ref()
            .filter(|failure| failure.attempt > seen)
            .map(|failure| failure.error.clone())
    }

    /// True while a recent failure holds back background reloads
    fn backing_off(&self) -> bool {
        let now = self.clock.now();
        self.last_failure.lock().as_ref().map_or(false, |failure| {
            failure
                .at
                .checked_add(self.policy.failure_backoff)
                .map_or(true, |until| now < until)
        })
    }

    /// Run the loader and publish its value. Callers hold `refresh_guard`.
    async fn refresh(&self) -> Result<Arc<L::Value>, L::Error> {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        tracing::debug!("Refreshing {} cache", self.name);

        match self.loader.load().await {
            Ok(value) => {
                let value = Arc::new(value);
                let now = self.clock.now();
                let entry = CacheEntry {
                    value: Arc::clone(&value),
                    refreshed_at: now,
                    expires_at: now.checked_add(self.policy.ttl),
                };
                *self.entry.write() = Some(Arc::new(entry));
                *self.last_failure.lock() = None;
                self.attempts.fetch_add(1, Ordering::AcqRel);
                self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "{} cache refreshed in {:?}",
                    self.name,
                    started.elapsed()
                );
                Ok(value)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
                *self.last_failure.lock() = Some(Failure {
                    attempt,
                    at: self.clock.now(),
                    error: e.clone(),
                });
                Err(e)
            }
        }
    }
}

/// Cache for a single key. Cloning shares the same entry.
pub struct TtlCache<L: CacheLoader> {
    inner: Arc<Inner<L>>,
}

impl<L: CacheLoader> Clone for TtlCache<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: CacheLoader> TtlCache<L> {
    pub fn new(name: impl Into<String>, loader: Arc<L>, policy: impl Into<CachePolicy>) -> Self {
        Self::with_clock(name, loader, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        loader: Arc<L>,
        policy: impl Into<CachePolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                policy: policy.into(),
                clock,
                loader,
                entry: RwLock::new(None),
                refresh_guard: Arc::new(tokio::sync::Mutex::new(())),
                counters: Counters::default(),
                attempts: AtomicU64::new(0),
                last_failure: Mutex::new(None),
            }),
        }
    }

    /// Current value, loading it first if the cache is empty.
    ///
    /// Only an empty cache can return the loader's error; a stale value is
    /// returned as-is while a background reload runs.
    pub async fn get(&self) -> Result<Arc<L::Value>, L::Error> {
        if let Some(entry) = self.inner.current() {
            if self.inner.is_fresh(&entry) {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.inner.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                self.spawn_revalidation();
            }
            return Ok(Arc::clone(&entry.value));
        }

        self.load_empty().await
    }

    /// Published value without triggering any load
    pub fn peek(&self) -> Option<Arc<L::Value>> {
        self.inner.current().map(|entry| Arc::clone(&entry.value))
    }

    pub fn state(&self) -> CacheState {
        match self.inner.current() {
            None => CacheState::Empty,
            Some(entry) if self.inner.is_fresh(&entry) => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    /// Mark the published value stale. It keeps being served until a reload succeeds.
    pub fn invalidate(&self) {
        let now = self.inner.clock.now();
        let mut slot = self.inner.entry.write();
        if let Some(entry) = slot.take() {
            *slot = Some(Arc::new(CacheEntry {
                value: Arc::clone(&entry.value),
                refreshed_at: entry.refreshed_at,
                expires_at: Some(now),
            }));
            tracing::debug!("{} cache invalidated", self.inner.name);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let now = self.inner.clock.now();
        CacheStats {
            state: self.state(),
            hits: counters.hits.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            refreshes: counters.refreshes.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            last_error: self
                .inner
                .last_failure
                .lock()
                .as_ref()
                .map(|failure| failure.error.to_string()),
            age: self
                .inner
                .current()
                .map(|entry| now.saturating_duration_since(entry.refreshed_at)),
        }
    }

    async fn load_empty(&self) -> Result<Arc<L::Value>, L::Error> {
        let seen = self.inner.attempts.load(Ordering::Acquire);
        let _guard = self.inner.refresh_guard.lock().await;

        // Another reader may have published while we waited
        if let Some(entry) = self.inner.current() {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.value));
        }

        // ...or failed, in which case we share its error
        if let Some(e) = self.inner.failure_since(seen) {
            tracing::debug!("{} cache load failed while waiting: {}", self.inner.name, e);
            return Err(e);
        }

        self.inner.refresh().await.map_err(|e| {
            tracing::error!("{} cache load failed with no data to fall back on: {}", self.inner.name, e);
            e
        })
    }

    fn spawn_revalidation(&self) {
        if self.inner.backing_off() {
            tracing::trace!("{} cache reload backing off after failure", self.inner.name);
            return;
        }

        let guard = match Arc::clone(&self.inner.refresh_guard).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::trace!("{} cache refresh already in flight", self.inner.name);
                return;
            }
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = guard;

            // A refresh may have completed between the read and the lock
            if let Some(entry) = inner.current() {
                if inner.is_fresh(&entry) {
                    return;
                }
            }

            if let Err(e) = inner.refresh().await {
                tracing::warn!("{} cache refresh failed, serving stale data: {}", inner.name, e);
            }
        });
    }
}
