//! Category-scoped cache adapters for the Markets and Forum panels.
//!
//! These are thin conveniences over the core layer: they compute a
//! deterministic key from semantic parameters, read and write the
//! persistent store with an explicit max-age check, and build ready-made
//! [`CacheOptions`] wiring an [`ApiClient`] fetcher for panels that attach
//! through the orchestrator instead.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::FutureExt;
use tracing::debug;

use crate::api::ApiClient;
use crate::models::{ForumCategory, ForumPost, ForumSort, MarketQuote};

use super::entry::is_fresh;
use super::error::CacheError;
use super::orchestrator::{CacheOptions, Fetcher};
use super::store::CacheStore;

/// Category for market quote entries
pub const MARKET_QUOTES: &str = "market-quotes";

/// Category for forum post listings
pub const FORUM_POSTS: &str = "forum-posts";

/// Category for the forum category index
pub const FORUM_CATEGORIES: &str = "forum-categories";

/// Fixed key for the forum category index; there is only one
const FORUM_CATEGORY_INDEX_KEY: &str = "forum:categories";

// ============================================================================
// Markets
// ============================================================================

pub struct MarketCache {
    store: Arc<CacheStore>,
}

impl MarketCache {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Deterministic key for one quote panel:
    /// `markets:{region}:{category}:{limit}:{ticker}:{ticker}...`
    pub fn quotes_key(region: &str, category: &str, limit: u32, tickers: &[String]) -> String {
        format!(
            "markets:{}:{}:{}:{}",
            region,
            category,
            limit,
            tickers.join(":")
        )
    }

    pub fn load_quotes(
        &self,
        region: &str,
        category: &str,
        limit: u32,
        tickers: &[String],
        max_age: Duration,
    ) -> Option<Vec<MarketQuote>> {
        let key = Self::quotes_key(region, category, limit, tickers);
        load_if_fresh(&self.store, &key, max_age)
    }

    pub fn save_quotes(
        &self,
        region: &str,
        category: &str,
        limit: u32,
        tickers: &[String],
        quotes: &[MarketQuote],
    ) -> Result<(), CacheError> {
        let key = Self::quotes_key(region, category, limit, tickers);
        save(&self.store, &key, MARKET_QUOTES, &quotes)
    }

    /// Orchestrator options for a quote panel, fetching through `api`
    pub fn quotes_options(
        api: ApiClient,
        region: &str,
        category: &str,
        limit: u32,
        tickers: &[String],
    ) -> CacheOptions<Vec<MarketQuote>> {
        let key = Self::quotes_key(region, category, limit, tickers);
        let region = region.to_string();
        let category_param = category.to_string();
        let tickers = tickers.to_vec();
        let fetcher: Fetcher<Vec<MarketQuote>> = Arc::new(move || {
            let api = api.clone();
            let region = region.clone();
            let category_param = category_param.clone();
            let tickers = tickers.clone();
            async move {
                api.fetch_market_quotes(&region, &category_param, limit, &tickers)
                    .await
            }
            .boxed()
        });
        CacheOptions::new(key, MARKET_QUOTES, fetcher)
    }
}

// ============================================================================
// Forum
// ============================================================================

pub struct ForumCache {
    store: Arc<CacheStore>,
}

impl ForumCache {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Deterministic key for one post listing: `forum:{category_id}:{sort}`
    pub fn posts_key(category_id: i64, sort: ForumSort) -> String {
        format!("forum:{}:{}", category_id, sort)
    }

    pub fn load_posts(
        &self,
        category_id: i64,
        sort: ForumSort,
        max_age: Duration,
    ) -> Option<Vec<ForumPost>> {
        let key = Self::posts_key(category_id, sort);
        load_if_fresh(&self.store, &key, max_age)
    }

    pub fn save_posts(
        &self,
        category_id: i64,
        sort: ForumSort,
        posts: &[ForumPost],
    ) -> Result<(), CacheError> {
        let key = Self::posts_key(category_id, sort);
        save(&self.store, &key, FORUM_POSTS, &posts)
    }

    pub fn load_categories(&self, max_age: Duration) -> Option<Vec<ForumCategory>> {
        load_if_fresh(&self.store, FORUM_CATEGORY_INDEX_KEY, max_age)
    }

    pub fn save_categories(&self, categories: &[ForumCategory]) -> Result<(), CacheError> {
        save(&self.store, FORUM_CATEGORY_INDEX_KEY, FORUM_CATEGORIES, &categories)
    }

    /// Orchestrator options for a post listing, fetching through `api`
    pub fn posts_options(
        api: ApiClient,
        category_id: i64,
        sort: ForumSort,
    ) -> CacheOptions<Vec<ForumPost>> {
        let key = Self::posts_key(category_id, sort);
        let fetcher: Fetcher<Vec<ForumPost>> = Arc::new(move || {
            let api = api.clone();
            async move { api.fetch_forum_posts(category_id, sort).await }.boxed()
        });
        CacheOptions::new(key, FORUM_POSTS, fetcher)
    }
}

// ============================================================================
// Shared plumbing
// ============================================================================

fn load_if_fresh<T: serde::de::DeserializeOwned>(
    store: &CacheStore,
    key: &str,
    max_age: Duration,
) -> Option<T> {
    let entry = store.get(key)?;
    if !is_fresh(&entry, max_age, Utc::now()) {
        debug!(key = key, "Cached entry exceeded max age");
        return None;
    }
    match serde_json::from_slice(&entry.payload) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(key = key, error = %e, "Failed to decode cached entry");
            None
        }
    }
}

fn save<T: serde::Serialize>(
    store: &CacheStore,
    key: &str,
    category: &str,
    value: &T,
) -> Result<(), CacheError> {
    let payload = serde_json::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))?;
    store.put(key, category, payload, Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, Arc<CacheStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::new(dir.path().join("cache")).unwrap());
        (dir, store)
    }

    fn quote(ticker: &str, price: f64) -> MarketQuote {
        MarketQuote {
            ticker: ticker.to_string(),
            display_name: None,
            price,
            change_pct: Some(0.4),
            day_high: None,
            day_low: None,
            volume: None,
            as_of: None,
        }
    }

    fn post(id: i64, title: &str) -> ForumPost {
        ForumPost {
            id,
            title: title.to_string(),
            body: None,
            author: "trader42".to_string(),
            category_id: 9,
            created_at: None,
            reply_count: 3,
            score: 12,
        }
    }

    #[test]
    fn test_quotes_key_is_deterministic() {
        let tickers = vec!["EURUSD".to_string(), "JPYUSD".to_string()];
        assert_eq!(
            MarketCache::quotes_key("global", "Forex", 3, &tickers),
            "markets:global:Forex:3:EURUSD:JPYUSD"
        );
    }

    #[test]
    fn test_posts_key_includes_sort_mode() {
        assert_eq!(ForumCache::posts_key(9, ForumSort::Newest), "forum:9:newest");
        assert_eq!(ForumCache::posts_key(9, ForumSort::Top), "forum:9:top");
    }

    #[test]
    fn test_quotes_round_trip_within_max_age() {
        let (_dir, store) = test_store();
        let cache = MarketCache::new(Arc::clone(&store));
        let tickers = vec!["EURUSD".to_string()];
        let quotes = vec![quote("EURUSD", 1.0832)];

        cache.save_quotes("global", "Forex", 3, &tickers, &quotes).unwrap();
        let loaded = cache
            .load_quotes("global", "Forex", 3, &tickers, Duration::minutes(10))
            .unwrap();
        assert_eq!(loaded, quotes);
    }

    #[test]
    fn test_quotes_beyond_max_age_are_a_miss() {
        let (_dir, store) = test_store();
        let cache = MarketCache::new(Arc::clone(&store));
        let tickers = vec!["EURUSD".to_string()];
        let key = MarketCache::quotes_key("global", "Forex", 3, &tickers);

        let payload = serde_json::to_vec(&vec![quote("EURUSD", 1.0790)]).unwrap();
        store
            .put(&key, MARKET_QUOTES, payload, Utc::now() - Duration::minutes(15))
            .unwrap();

        assert!(cache
            .load_quotes("global", "Forex", 3, &tickers, Duration::minutes(10))
            .is_none());
    }

    #[test]
    fn test_posts_round_trip_and_category_invalidation() {
        let (_dir, store) = test_store();
        let cache = ForumCache::new(Arc::clone(&store));
        let posts = vec![post(1, "EURUSD outlook"), post(2, "Fed minutes thread")];

        cache.save_posts(9, ForumSort::Newest, &posts).unwrap();
        cache.save_categories(&[ForumCategory {
            id: 9,
            name: "Forex".to_string(),
            description: None,
            post_count: 2,
        }])
        .unwrap();

        assert_eq!(
            cache.load_posts(9, ForumSort::Newest, Duration::minutes(5)).unwrap(),
            posts
        );

        store.invalidate_category(FORUM_POSTS).unwrap();
        assert!(cache.load_posts(9, ForumSort::Newest, Duration::minutes(5)).is_none());
        // The category index lives in its own partition
        assert!(cache.load_categories(Duration::minutes(5)).is_some());
    }
}
