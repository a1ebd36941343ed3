//! REST API client module for the tickerdeck backend.
//!
//! This module provides the `ApiClient` for fetching market quote and
//! forum data from the remote terminal API.
//!
//! Requests carry a JWT bearer token supplied by the session provider;
//! token acquisition and renewal are not handled here.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
