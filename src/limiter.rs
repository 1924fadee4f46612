use crate::backend::InMemoryBackend;
use crate::{Error, Quota};
use std::time::Duration;

/// A synchronous, per-key fixed window limiter.
///
/// Each call to [FixedWindowLimiter::new] owns a fresh table; clones share it. A `false` from
/// [FixedWindowLimiter::check] should be surfaced by the caller as a rate limit error
/// (e.g. a 429, or a message asking the user to try again later).
///
/// Counts live in this process only. Behind a load balancer every instance applies the quota
/// on its own, so a deployment with several instances admits up to `instances * max_requests`
/// per window.
///
/// # Examples
///
/// ```
/// # use actix_fixed_window::{FixedWindowLimiter, Quota};
/// let invites = FixedWindowLimiter::new(Quota::per_minute(5).unwrap());
/// if !invites.check("203.0.113.9") {
///     // reject the request
/// }
/// ```
#[derive(Clone)]
pub struct FixedWindowLimiter {
    backend: InMemoryBackend,
    quota: Quota,
}

impl FixedWindowLimiter {
    /// Creates a limiter with its own table and no garbage collection.
    pub fn new(quota: Quota) -> Self {
        Self {
            backend: InMemoryBackend::new(),
            quota,
        }
    }

    /// Creates a limiter on top of an existing backend, e.g. one built with a garbage collector.
    ///
    /// Limiters sharing a backend also share buckets, so their keys must not collide.
    pub fn with_backend(quota: Quota, backend: InMemoryBackend) -> Self {
        Self { backend, quota }
    }

    /// Counts a request for `key`, returning whether it is admitted.
    ///
    /// Any string is a valid key; the empty string is a single shared bucket.
    pub fn check(&self, key: &str) -> bool {
        match self.backend.check_and_count(key, &self.quota) {
            Ok((decision, output)) => {
                if decision.is_denied() {
                    log::trace!(
                        "Rate limit of {} exceeded for key {key:?}, resets in {}s",
                        output.limit,
                        output.seconds_until_reset()
                    );
                }
                decision.is_allowed()
            }
            Err(e) => {
                log::error!("Rate limiter failed for key {key:?}: {e}");
                false
            }
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    pub fn backend(&self) -> &InMemoryBackend {
        &self.backend
    }
}

/// Creates an independent limiter admitting `max_requests` per `window` for each key, returned
/// as a plain check function.
pub fn rate_limiter(
    max_requests: u64,
    window: Duration,
) -> Result<impl Fn(&str) -> bool + Clone + Send + Sync + 'static, Error> {
    let limiter = FixedWindowLimiter::new(Quota::new(max_requests, window)?);
    Ok(move |key: &str| limiter.check(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_check() {
        let limiter = FixedWindowLimiter::new(Quota::new(3, MINUTE).unwrap());
        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));
        // Other keys are unaffected
        assert!(limiter.check("other"));
        assert!(limiter.check(""));
    }

    #[test]
    fn test_independent_limiters() {
        let check_a = rate_limiter(1, MINUTE).unwrap();
        let check_b = rate_limiter(1, MINUTE).unwrap();
        assert!(check_a("k"));
        assert!(!check_a("k"));
        assert!(check_b("k"));
        // A cloned check function shares its table
        let check_a2 = check_a.clone();
        assert!(!check_a2("k"));
    }

    #[test]
    fn test_invalid_quota() {
        assert!(matches!(rate_limiter(0, MINUTE), Err(Error::ZeroRequests)));
        assert!(matches!(
            rate_limiter(1, Duration::ZERO),
            Err(Error::ZeroWindow)
        ));
    }

    #[actix_web::test]
    async fn test_deterministic() {
        tokio::time::pause();
        let quota = Quota::new(2, Duration::from_millis(500)).unwrap();
        let sequence = [
            (0, "a"),
            (10, "a"),
            (10, "b"),
            (10, "a"),
            (470, "a"),
            (1, "a"),
            (0, "a"),
            (0, "b"),
            (1000, "a"),
        ];
        let mut runs = Vec::new();
        for _ in 0..2 {
            let limiter = FixedWindowLimiter::new(quota);
            let mut results = Vec::new();
            for (step, key) in sequence {
                tokio::time::advance(Duration::from_millis(step)).await;
                results.push(limiter.check(key));
            }
            runs.push(results);
        }
        assert_eq!(
            runs[0],
            vec![true, true, true, false, false, true, true, true, true]
        );
        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn test_concurrent_checks() {
        const MAX: u64 = 50;
        let limiter = FixedWindowLimiter::new(Quota::new(MAX, MINUTE).unwrap());
        let admitted = AtomicU64::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        if limiter.check("fresh") {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        // 200 attempts, exactly MAX admitted
        assert_eq!(admitted.load(Ordering::Relaxed), MAX);
    }
}
