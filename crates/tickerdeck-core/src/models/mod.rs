//! Data models for tickerdeck entities.
//!
//! This module contains the data structures shared between the API client,
//! the cache layer, and the UI panels:
//!
//! - `MarketQuote`: a single priced instrument on the markets dashboard
//! - `ForumCategory`, `ForumPost`: forum content
//! - `ForumSort`: post ordering modes, also used in cache keys

pub mod forum;
pub mod market;

pub use forum::{ForumCategoriesResponse, ForumCategory, ForumPost, ForumPostsResponse, ForumSort};
pub use market::{MarketQuote, MarketQuotesResponse};
