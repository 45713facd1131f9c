use crate::ad::Ad;
use crate::error::FetchError;
use crate::fetch::{default_retry_delays, AdSource, FetchPhase, FetchState};
use crate::PlacementKey;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CAPACITY: usize = 1;
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of ads held per placement.
    pub capacity: usize,
    /// Ads older than this are never handed out.
    pub expiration: Duration,
    pub retry_delays: Vec<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            expiration: DEFAULT_EXPIRATION,
            retry_delays: default_retry_delays(),
        }
    }
}

/// An ad waiting in a placement bucket.
#[derive(Debug)]
pub struct CacheEntry {
    pub ad: Ad,
    pub enqueued_at: Instant,
}

/// Snapshot of cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped on read because they outlived the expiration window.
    pub expired: u64,
    /// Entries dropped on insert because the bucket was full.
    pub evictions: u64,
    pub inserts: u64,
    pub fetches: u64,
    pub retries: u64,
    pub abandoned: u64,
    pub current_size: usize,
    pub placements: usize,
}

/// What a completed fetch did to its placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// An ad was stored.
    Filled,
    /// No fill or an unusable payload. The placement is idle again.
    Empty,
    /// Transport failure; a retry timer was armed.
    RetryScheduled(Duration),
    /// Transport failure with the schedule exhausted. The placement stays
    /// idle until the next `fill` or `retrieve`.
    Abandoned,
}

struct Bucket {
    entries: VecDeque<CacheEntry>,
    fetch: FetchState,
}

impl Bucket {
    fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: VecDeque::with_capacity(settings.capacity),
            fetch: FetchState::new(settings.retry_delays.clone()),
        }
    }
}

/// Bounded per-placement ad store.
///
/// Expiration is lazy: stale entries sit in their bucket until a read
/// reaches them. Every read or fill that leaves a bucket below capacity
/// asks the [`AdSource`] for another ad, unless that placement already has
/// a request or retry timer outstanding.
pub struct AdCache<S> {
    source: S,
    settings: CacheSettings,
    buckets: AHashMap<PlacementKey, Bucket>,
    hits: u64,
    misses: u64,
    expired: u64,
    evictions: u64,
    inserts: u64,
    fetches: u64,
    retries: u64,
    abandoned: u64,
}

impl<S: AdSource> AdCache<S> {
    pub fn new(settings: CacheSettings, source: S) -> Self {
        assert!(settings.capacity > 0, "cache capacity must be > 0");
        Self {
            source,
            settings,
            buckets: AHashMap::new(),
            hits: 0,
            misses: 0,
            expired: 0,
            evictions: 0,
            inserts: 0,
            fetches: 0,
            retries: 0,
            abandoned: 0,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Take the oldest fresh ad for `key`.
    pub fn retrieve(&mut self, key: &PlacementKey) -> Option<Ad> {
        self.retrieve_at(key, Instant::now())
    }

    pub fn retrieve_at(&mut self, key: &PlacementKey, now: Instant) -> Option<Ad> {
        let expiration = self.settings.expiration;
        let bucket = self.bucket(key);

        let mut expired = 0;
        let mut found = None;
        while let Some(entry) = bucket.entries.pop_front() {
            if entry.ad.is_expired(now, expiration) {
                expired += 1;
                continue;
            }
            found = Some(entry.ad);
            break;
        }

        if expired > 0 {
            debug!(placement = %key, expired, "dropped expired ads");
        }
        self.expired += expired;
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }

        self.refill(key);
        found
    }

    /// Make sure `key` has a bucket and top it up if it is short.
    /// Returns true if a request was started.
    pub fn fill(&mut self, key: &PlacementKey) -> bool {
        self.bucket(key);
        self.refill(key)
    }

    /// Append a fetched ad. A full bucket drops its oldest entry first.
    pub fn insert(&mut self, key: &PlacementKey, ad: Ad) {
        self.insert_at(key, ad, Instant::now());
    }

    pub fn insert_at(&mut self, key: &PlacementKey, ad: Ad, now: Instant) {
        let capacity = self.settings.capacity;
        let bucket = self.bucket(key);

        let mut evicted = 0;
        while bucket.entries.len() >= capacity {
            if bucket.entries.pop_front().is_none() {
                break;
            }
            evicted += 1;
        }
        bucket.entries.push_back(CacheEntry {
            ad,
            enqueued_at: now,
        });

        self.evictions += evicted;
        self.inserts += 1;
    }

    /// Record the outcome of the request started for `key`.
    pub fn complete(&mut self, key: &PlacementKey, result: Result<Ad, FetchError>) -> Completion {
        let bucket = self.bucket(key);
        if bucket.fetch.phase() != FetchPhase::InFlight {
            debug!(placement = %key, phase = ?bucket.fetch.phase(), "completion without a request in flight");
        }

        match result {
            Ok(ad) => {
                bucket.fetch.responded();
                debug!(placement = %key, ad_id = ad.id().get(), "ad filled");
                self.insert(key, ad);
                self.refill(key);
                Completion::Filled
            }
            Err(err) if err.is_retryable() => match bucket.fetch.failed() {
                Some(delay) => {
                    warn!(
                        placement = %key,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "ad request failed, retry scheduled"
                    );
                    self.source.schedule_retry(key, delay);
                    Completion::RetryScheduled(delay)
                }
                None => {
                    warn!(placement = %key, error = %err, "ad request failed, retries exhausted");
                    self.abandoned += 1;
                    Completion::Abandoned
                }
            },
            Err(FetchError::NoFill) => {
                bucket.fetch.responded();
                info!(placement = %key, "no fill");
                Completion::Empty
            }
            Err(err) => {
                bucket.fetch.responded();
                warn!(placement = %key, error = %err, "discarding ad response");
                Completion::Empty
            }
        }
    }

    /// A retry timer armed through [`AdSource::schedule_retry`] went off.
    /// Returns true if a request was started.
    pub fn retry_due(&mut self, key: &PlacementKey) -> bool {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };
        if !bucket.fetch.retry_elapsed() {
            debug!(placement = %key, "ignoring stray retry timer");
            return false;
        }
        self.retries += 1;
        self.refill(key)
    }

    pub fn len(&self, key: &PlacementKey) -> usize {
        self.buckets.get(key).map_or(0, |b| b.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.entries.is_empty())
    }

    /// Whether any placement holds an ad, fresh or not.
    pub fn ads_available(&self) -> bool {
        !self.is_empty()
    }

    pub fn phase(&self, key: &PlacementKey) -> FetchPhase {
        self.buckets
            .get(key)
            .map_or(FetchPhase::Idle, |b| b.fetch.phase())
    }

    /// True while a request or retry timer is outstanding for `key`.
    pub fn is_fetching(&self, key: &PlacementKey) -> bool {
        self.phase(key) != FetchPhase::Idle
    }

    pub fn placements(&self) -> impl Iterator<Item = &PlacementKey> {
        self.buckets.keys()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            expired: self.expired,
            evictions: self.evictions,
            inserts: self.inserts,
            fetches: self.fetches,
            retries: self.retries,
            abandoned: self.abandoned,
            current_size: self.buckets.values().map(|b| b.entries.len()).sum(),
            placements: self.buckets.len(),
        }
    }

    fn bucket(&mut self, key: &PlacementKey) -> &mut Bucket {
        self.buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket::new(&self.settings))
    }

    fn refill(&mut self, key: &PlacementKey) -> bool {
        let capacity = self.settings.capacity;
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };
        if bucket.entries.len() >= capacity || !bucket.fetch.begin() {
            return false;
        }
        self.fetches += 1;
        debug!(placement = %key, "requesting ad");
        self.source.request(key);
        true
    }
}
