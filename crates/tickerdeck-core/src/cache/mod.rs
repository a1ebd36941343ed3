//! Data cache & synchronization layer.
//!
//! Every data panel in the terminal reads through this module: values are
//! served instantly from a persistent on-disk store, revalidated against the
//! backend on a schedule, and fetched at most once per key no matter how many
//! panels ask concurrently.
//!
//! Layering, leaf first:
//!
//! - `entry`: the stored envelope, freshness predicate, payload codecs
//! - `store`: durable key→entry table on local disk (`CacheStore`)
//! - `coordinator`: per-key fetch deduplication (`FetchCoordinator`)
//! - `orchestrator`: the consumer-facing façade (`CacheOrchestrator`,
//!   `CacheHandle`) with stale-while-revalidate and interval refresh
//! - `helpers`: category-scoped adapters for market quotes and forum data

pub mod coordinator;
pub mod entry;
pub mod error;
pub mod helpers;
pub mod orchestrator;
pub mod store;

pub use coordinator::{FetchCoordinator, FetchedPayload};
pub use entry::{is_fresh, CacheEntry, PayloadCodec};
pub use error::CacheError;
pub use helpers::{ForumCache, MarketCache, FORUM_CATEGORIES, FORUM_POSTS, MARKET_QUOTES};
pub use orchestrator::{
    CacheContext, CacheHandle, CacheOptions, CacheOrchestrator, CachePhase, CacheState,
    EntryUpdate, Fetcher,
};
pub use store::{CacheStore, StoreHealth};
