use std::time::Duration;

/// Timing configuration for the query cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// How long a settled entry is served from cache without a network call.
    ///
    /// With the default of zero every plain query refetches, while subscribers
    /// still see the cached data until the new result lands.
    pub stale_time: Duration,

    /// Grace period before an entry with no subscribers is evicted.
    pub cache_time: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            cache_time: Duration::from_secs(60),
        }
    }
}

impl QueryConfig {
    /// `stale_time` is the freshness window of a settled entry and
    /// `cache_time` the eviction grace period.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
        }
    }
}
