use crate::Error;
use serde::Deserialize;
use std::time::Duration;

/// Longest window a [Quota] may describe, keeps `now + window` well inside [Instant] range.
///
/// [Instant]: actix_web::rt::time::Instant
pub const MAX_WINDOW: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// How many requests a single key may make within a fixed window.
///
/// A quota is always valid once constructed: at least one request, and a non-zero window no
/// longer than [MAX_WINDOW].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(try_from = "QuotaConfig")]
pub struct Quota {
    max_requests: u64,
    window: Duration,
}

impl Quota {
    pub fn new(max_requests: u64, window: Duration) -> Result<Self, Error> {
        if max_requests == 0 {
            return Err(Error::ZeroRequests);
        }
        if window.is_zero() {
            return Err(Error::ZeroWindow);
        }
        if window > MAX_WINDOW {
            return Err(Error::WindowTooLarge(window));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn per_second(max_requests: u64) -> Result<Self, Error> {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub fn per_minute(max_requests: u64) -> Result<Self, Error> {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn per_hour(max_requests: u64) -> Result<Self, Error> {
        Self::new(max_requests, Duration::from_secs(60 * 60))
    }

    /// The total requests to be allowed within the window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The length of each fixed window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Serialized form of a [Quota], e.g. `{ "max_requests": 5, "window_ms": 60000 }`.
#[derive(Deserialize)]
struct QuotaConfig {
    max_requests: u64,
    window_ms: u64,
}

impl TryFrom<QuotaConfig> for Quota {
    type Error = Error;

    fn try_from(config: QuotaConfig) -> Result<Self, Self::Error> {
        Quota::new(config.max_requests, Duration::from_millis(config.window_ms))
    }
}
