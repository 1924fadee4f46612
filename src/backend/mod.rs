mod input_builder;
pub mod memory;

pub use input_builder::{QuotaInputBuilder, QuotaInputFuture};
pub use memory::{BucketToken, InMemoryBackend, InMemoryBackendBuilder};

use crate::{Error, Quota};
use actix_web::rt::time::Instant;
use std::future::Future;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Describes a store that counts requests per key in fixed windows.
///
/// A Backend is required to implement [Clone], clones are expected to share the same counters.
pub trait Backend: Clone {
    type RollbackToken;

    /// Count an incoming request against the quota of its key.
    ///
    /// Returns whether to allow or deny the request, the state of the window after the decision,
    /// and a token to allow the counter to be rolled back in certain conditions.
    fn request(
        &self,
        input: QuotaInput,
    ) -> impl Future<Output = Result<(Decision, QuotaOutput, Self::RollbackToken), Error>>;

    /// Take back a request that was previously allowed.
    ///
    /// E.g. We may want to exclude 5xx errors from counting against a user's rate limit,
    /// we can only exclude them after having already allowed the request through.
    ///
    /// # Arguments
    ///
    /// * `token`: The token returned from the initial call to [Backend::request()].
    fn rollback(&self, token: Self::RollbackToken) -> impl Future<Output = Result<(), Error>>;
}

/// Additional functions for a [Backend] whose counters are addressable by key.
pub trait KeyedBackend: Backend {
    /// Removes the bucket for a given rate limit key.
    ///
    /// Intended to be used to reset a key, e.g. after a successful login.
    fn remove_key(&self, key: &str) -> impl Future<Output = Result<(), Error>>;
}

/// Input to a [Backend] for a single request.
#[derive(Debug, Clone)]
pub struct QuotaInput {
    /// The quota to be applied.
    pub quota: Quota,
    /// The rate limit key to be used for this request.
    pub key: String,
}

/// The state of a window after a [Backend] decision.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QuotaOutput {
    /// Total number of requests that are permitted within the window.
    pub limit: u64,
    /// Number of requests that will be permitted until the window resets.
    pub remaining: u64,
    /// Time at which the window resets.
    pub reset: Instant,
}

impl QuotaOutput {
    /// Seconds until the window resets (rounded upwards, so that it is guaranteed to be reset
    /// after waiting for the duration).
    ///
    /// Returns 0 once the reset time has passed.
    pub fn seconds_until_reset(&self) -> u64 {
        let millis = self
            .reset
            .saturating_duration_since(Instant::now())
            .as_millis() as f64;
        (millis / 1000f64).ceil() as u64
    }
}
