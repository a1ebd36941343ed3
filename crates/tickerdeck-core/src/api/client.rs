//! API client for communicating with the tickerdeck terminal backend.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests to fetch market quotes and forum content. Each fetch method
//! maps one backend endpoint to a typed model; the cache layer wraps these
//! methods as fetchers, so they must fail loudly (return `Err`) rather
//! than silently produce partial data.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::{
    ForumCategoriesResponse, ForumCategory, ForumPost, ForumPostsResponse, ForumSort,
    MarketQuote, MarketQuotesResponse,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the terminal API
const API_BASE_URL: &str = "https://api.tickerdeck.app/v1";

/// HTTP request timeout in seconds.
/// 30s allows for slow quote endpoints while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the tickerdeck backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<Arc<String>>,
}

impl ApiClient {
    /// Create a new API client against the default backend
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: API_BASE_URL.to_string(),
            token: None,
        })
    }

    /// Override the backend base URL (used for staging environments)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: Arc<String>) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool
    pub fn with_token(&self, token: Arc<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit
    /// (should retry), or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url)
                .headers(self.auth_headers()?)
                .send()
                .await
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response.json().await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    // ===== Data Fetching Methods =====

    /// Fetch current quotes for a set of tickers in one market category.
    /// `limit` caps the number of rows the dashboard panel displays.
    pub async fn fetch_market_quotes(
        &self,
        region: &str,
        category: &str,
        limit: u32,
        tickers: &[String],
    ) -> Result<Vec<MarketQuote>> {
        let url = format!(
            "{}/markets/quotes?region={}&category={}&limit={}&symbols={}",
            self.base_url,
            region,
            category,
            limit,
            tickers.join(",")
        );

        let response: MarketQuotesResponse = self.get(&url).await?;
        debug!(count = response.quotes.len(), category = category, "Market quotes fetched");
        Ok(response.quotes)
    }

    /// Fetch the list of forum categories
    pub async fn fetch_forum_categories(&self) -> Result<Vec<ForumCategory>> {
        let url = format!("{}/forum/categories", self.base_url);

        let response: ForumCategoriesResponse = self.get(&url).await?;
        debug!(count = response.categories.len(), "Forum categories fetched");
        Ok(response.categories)
    }

    /// Fetch posts for one forum category in the given sort order
    pub async fn fetch_forum_posts(
        &self,
        category_id: i64,
        sort: ForumSort,
    ) -> Result<Vec<ForumPost>> {
        let url = format!(
            "{}/forum/categories/{}/posts?sort={}",
            self.base_url, category_id, sort
        );

        let response: ForumPostsResponse = self.get(&url).await?;
        debug!(count = response.posts.len(), category_id = category_id, "Forum posts fetched");
        Ok(response.posts)
    }
}
