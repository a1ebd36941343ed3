use thiserror::Error;

/// Failure taxonomy for the cache layer.
///
/// Storage failures never escape the cache layer as hard errors: the store
/// absorbs them into misses and the orchestrator falls through to a live
/// fetch. Only fetch-side failures reach consumers, and only through the
/// `error` field of [`super::CacheState`] - never as a panic or a rejected
/// call from the public API.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing storage could not be read or written. Treated as a cache
    /// miss by callers; surfaced only if a subsequent live fetch also fails.
    #[error("cache storage unavailable: {0}")]
    StoreUnavailable(String),

    /// The consumer-supplied fetcher rejected (network error, non-2xx,
    /// parse failure). Shown stale data is never cleared by this.
    #[error("fetch failed: {0:#}")]
    FetchFailed(anyhow::Error),

    /// A payload could not be serialized or deserialized with the
    /// category's codec. On read this is absorbed as a miss.
    #[error("payload codec failure: {0}")]
    Codec(String),
}
