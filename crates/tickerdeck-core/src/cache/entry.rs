//! Stored cache entries, the freshness predicate, and payload codecs.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One durable cache record. At most one entry exists per key at any time;
/// `stored_at` is the moment the payload was durably written, never the
/// moment it was requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub category: String,
    pub stored_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

/// Freshness predicate: an entry written at `stored_at` satisfies a caller
/// requiring `ttl` iff `now - stored_at <= ttl`.
///
/// An entry with `stored_at` in the future (clock skew) is fresh: a
/// slightly-too-long cache window beats punishing the user for a bad clock.
pub fn is_fresh(entry: &CacheEntry, ttl: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.stored_at) <= ttl
}

impl CacheEntry {
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.stored_at).num_minutes()
    }

    /// Human-readable entry age for "data may be outdated" indicators.
    /// Clock skew renders as "just now".
    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Explicit serialize/deserialize pair for one category's payloads.
///
/// Payloads are opaque bytes in the store, so versioned or binary encodings
/// are representable; most categories use the JSON codec.
pub struct PayloadCodec<T> {
    pub serialize: fn(&T) -> Result<Vec<u8>>,
    pub deserialize: fn(&[u8]) -> Result<T>,
}

impl<T> Clone for PayloadCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PayloadCodec<T> {}

impl<T: Serialize + DeserializeOwned> PayloadCodec<T> {
    pub fn json() -> Self {
        Self {
            serialize: |value| Ok(serde_json::to_vec(value)?),
            deserialize: |bytes| Ok(serde_json::from_slice(bytes)?),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(stored_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: "markets:global:Forex:3:EURUSD:JPYUSD".to_string(),
            category: "market-quotes".to_string(),
            stored_at,
            payload: b"[]".to_vec(),
        }
    }

    #[test]
    fn test_fresh_within_ttl_window() {
        let written = Utc::now();
        let entry = entry_at(written);
        let ttl = Duration::minutes(10);

        assert!(is_fresh(&entry, ttl, written));
        assert!(is_fresh(&entry, ttl, written + Duration::minutes(5)));
        // Boundary is inclusive
        assert!(is_fresh(&entry, ttl, written + Duration::minutes(10)));
        assert!(!is_fresh(&entry, ttl, written + Duration::minutes(10) + Duration::seconds(1)));
    }

    #[test]
    fn test_future_stored_at_is_fresh() {
        let now = Utc::now();
        let entry = entry_at(now + Duration::minutes(30));
        assert!(is_fresh(&entry, Duration::minutes(1), now));
    }

    #[test]
    fn test_age_display_buckets() {
        let now = Utc::now();
        assert_eq!(entry_at(now).age_display(now), "just now");
        assert_eq!(entry_at(now - Duration::minutes(5)).age_display(now), "5m ago");
        assert_eq!(entry_at(now - Duration::minutes(90)).age_display(now), "2h ago");
        assert_eq!(entry_at(now - Duration::hours(26)).age_display(now), "1d ago");
    }

    #[test]
    fn test_age_display_clock_skew() {
        let now = Utc::now();
        let entry = entry_at(now + Duration::minutes(10));
        assert_eq!(entry.age_display(now), "just now");
    }

    #[test]
    fn test_json_codec_round_trip() {
        let codec = PayloadCodec::<Vec<String>>::json();
        let value = vec!["EURUSD".to_string(), "JPYUSD".to_string()];
        let bytes = (codec.serialize)(&value).unwrap();
        let back = (codec.deserialize)(&bytes).unwrap();
        assert_eq!(back, value);
    }
}
