//! Core library for the tickerdeck terminal.
//!
//! This crate holds everything the desktop shell shares across panels:
//!
//! - `api`: thin authenticated client for the tickerdeck backend
//! - `models`: wire/domain types for market quotes and forum content
//! - `cache`: the data cache & synchronization layer (persistent store,
//!   fetch deduplication, stale-while-revalidate orchestration)
//! - `config`: on-disk application configuration
//!
//! UI rendering, routing, and the auth/session provider live in downstream
//! crates; they consume this one through [`cache::CacheOrchestrator`] and
//! [`api::ApiClient`].

pub mod api;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use cache::{
    CacheContext, CacheEntry, CacheError, CacheHandle, CacheOptions, CacheOrchestrator,
    CachePhase, CacheState, CacheStore, FetchCoordinator, PayloadCodec,
};
pub use config::Config;
