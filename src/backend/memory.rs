use crate::backend::{Backend, Decision, KeyedBackend, QuotaInput, QuotaOutput};
use crate::{Error, Quota, MAX_WINDOW};
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// A fixed window rate limiter [Backend] that uses [DashMap] to store buckets in memory.
///
/// Counts are local to the process; running several instances of the application gives each
/// of them its own independent quota.
///
/// Without a garbage collector (the default) a bucket is only ever replaced, never removed, so
/// the map grows with the number of distinct keys seen. Use
/// [InMemoryBackendBuilder::with_gc_interval] or [InMemoryBackend::sweep_expired] to bound it.
#[derive(Clone)]
pub struct InMemoryBackend {
    map: Arc<DashMap<String, Bucket>>,
    gc: Option<Arc<GcGuard>>,
}

// Shared by every clone of a backend; the collector stops when the last clone goes away.
struct GcGuard(JoinHandle<()>);

impl Drop for GcGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Identifies the window a request was counted in, so a late rollback can't refund a newer one.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BucketToken {
    key: String,
    reset_at: Instant,
}

#[derive(Debug, Copy, Clone)]
struct Bucket {
    count: u64,
    reset_at: Instant,
}

impl Bucket {
    fn open(now: Instant, window: Duration) -> Result<Self, Error> {
        let reset_at = now
            .checked_add(window)
            .ok_or(Error::WindowTooLarge(window))?;
        Ok(Self { count: 1, reset_at })
    }

    // A request landing exactly on `reset_at` still belongs to the old window.
    fn expired(&self, now: Instant) -> bool {
        now > self.reset_at
    }

    fn output(&self, quota: &Quota) -> QuotaOutput {
        QuotaOutput {
            limit: quota.max_requests(),
            remaining: quota.max_requests().saturating_sub(self.count),
            reset: self.reset_at,
        }
    }
}

impl InMemoryBackend {
    /// Creates a backend without a garbage collector.
    pub fn new() -> Self {
        Self {
            map: Arc::new(DashMap::new()),
            gc: None,
        }
    }

    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder { gc_interval: None }
    }

    /// Count a request for `key` against `quota`.
    ///
    /// The entry lock is held across the lookup, comparison and update, so concurrent callers
    /// on the same key can never be admitted more than `quota.max_requests()` times per window.
    /// A denied request leaves the bucket untouched.
    pub fn check_and_count(
        &self,
        key: &str,
        quota: &Quota,
    ) -> Result<(Decision, QuotaOutput), Error> {
        let now = Instant::now();
        match self.map.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                if bucket.expired(now) {
                    *bucket = Bucket::open(now, quota.window())?;
                    Ok((Decision::Allowed, bucket.output(quota)))
                } else if bucket.count >= quota.max_requests() {
                    Ok((Decision::Denied, bucket.output(quota)))
                } else {
                    bucket.count += 1;
                    Ok((Decision::Allowed, bucket.output(quota)))
                }
            }
            Entry::Vacant(vacant) => {
                let bucket = Bucket::open(now, quota.window())?;
                vacant.insert(bucket);
                Ok((Decision::Allowed, bucket.output(quota)))
            }
        }
    }

    /// Removes every bucket whose window has ended, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.map, Instant::now())
    }

    /// Number of keys currently holding a bucket.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn garbage_collector(map: Arc<DashMap<String, Bucket>>, interval: Duration) -> JoinHandle<()> {
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                let removed = sweep(&map, now);
                if removed > 0 {
                    log::debug!("Rate limit garbage collector removed {removed} expired buckets");
                }
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

fn sweep(map: &DashMap<String, Bucket>, now: Instant) -> usize {
    let mut removed = 0;
    map.retain(|_key, bucket| {
        let keep = !bucket.expired(now);
        if !keep {
            removed += 1;
        }
        keep
    });
    removed
}

impl Backend for InMemoryBackend {
    type RollbackToken = BucketToken;

    async fn request(
        &self,
        input: QuotaInput,
    ) -> Result<(Decision, QuotaOutput, Self::RollbackToken), Error> {
        let (decision, output) = self.check_and_count(&input.key, &input.quota)?;
        let token = BucketToken {
            key: input.key,
            reset_at: output.reset,
        };
        Ok((decision, output, token))
    }

    async fn rollback(&self, token: Self::RollbackToken) -> Result<(), Error> {
        if let Entry::Occupied(mut occupied) = self.map.entry(token.key) {
            if occupied.get().reset_at != token.reset_at {
                // Counted in a window that has since been replaced
                return Ok(());
            }
            // Dropping the last count removes the bucket rather than leaving an empty one behind.
            if occupied.get().count <= 1 {
                occupied.remove();
            } else {
                occupied.get_mut().count -= 1;
            }
        }
        Ok(())
    }
}

impl KeyedBackend for InMemoryBackend {
    async fn remove_key(&self, key: &str) -> Result<(), Error> {
        self.map.remove(key);
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InMemoryBackendBuilder {
    gc_interval: Option<Duration>,
}

impl InMemoryBackendBuilder {
    /// Enable a garbage collector that periodically removes expired buckets.
    ///
    /// Defaults to None (disabled). The interval must be non-zero and no longer than
    /// [MAX_WINDOW]. The collector runs on the actix runtime, so [InMemoryBackendBuilder::build]
    /// must then be called from within one.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn build(self) -> Result<InMemoryBackend, Error> {
        let mut backend = InMemoryBackend::new();
        match self.gc_interval {
            Some(interval) if interval.is_zero() => return Err(Error::ZeroGcInterval),
            Some(interval) if interval > MAX_WINDOW => {
                return Err(Error::GcIntervalTooLarge(interval))
            }
            Some(interval) => {
                let handle = InMemoryBackend::garbage_collector(backend.map.clone(), interval);
                backend.gc = Some(Arc::new(GcGuard(handle)));
            }
            None => {}
        }
        Ok(backend)
    }
}
