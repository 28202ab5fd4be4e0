//! Pricing facade: the thin layer between the HTTP surface and the
//! coalescing cache. Owns cache-key derivation and rate extraction.

pub mod api;

pub use api::RateApi;

use crate::cache::CoalescingCache;
use crate::error::RategateError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// One validated request tuple.
#[derive(Debug, Clone, Serialize)]
pub struct RateQuery {
    pub period: String,
    pub hotel: String,
    pub room: String,
}

impl RateQuery {
    pub fn new(period: String, hotel: String, room: String) -> Self {
        Self {
            period,
            hotel,
            room,
        }
    }

    /// Deterministic cache key for the tuple: `pricing:` plus the hex
    /// SHA-256 of the canonical JSON form (keys sorted).
    pub fn cache_key(&self) -> String {
        let canonical = serde_json::json!({
            "hotel": self.hotel,
            "period": self.period,
            "room": self.room,
        })
        .to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("pricing:{hex}")
    }
}

pub struct PricingService {
    api: RateApi,
    cache: Arc<CoalescingCache>,
}

impl PricingService {
    pub fn new(api: RateApi, cache: Arc<CoalescingCache>) -> Self {
        Self { api, cache }
    }

    pub fn cache(&self) -> &CoalescingCache {
        &self.cache
    }

    /// Resolve the rate for a tuple through the cache, then extract it from
    /// the raw upstream body. Extraction runs after the cache returns, so
    /// fresh reads, leader broadcasts, and stale fallbacks all produce the
    /// same response shape.
    pub async fn rate(&self, query: &RateQuery) -> Result<String, RategateError> {
        let key = query.cache_key();
        let api = self.api.clone();
        let tuple = query.clone();

        let body = self
            .cache
            .fetch(&key, move || async move { api.fetch_rates(&tuple).await })
            .await?;

        extract_rate(&body, query)
    }
}

/// Pick the tuple's rate out of an upstream body: the entry matching the
/// triple in `rates[]`, else the first entry. The rate is rendered as a
/// string.
fn extract_rate(body: &Value, query: &RateQuery) -> Result<String, RategateError> {
    let rates = body
        .get("rates")
        .and_then(Value::as_array)
        .filter(|rates| !rates.is_empty())
        .ok_or_else(|| RategateError::Parsing("upstream body has no rates".into()))?;

    let entry = rates
        .iter()
        .find(|r| {
            r.get("period").and_then(Value::as_str) == Some(query.period.as_str())
                && r.get("hotel").and_then(Value::as_str) == Some(query.hotel.as_str())
                && r.get("room").and_then(Value::as_str) == Some(query.room.as_str())
        })
        .unwrap_or(&rates[0]);

    match entry.get("rate") {
        Some(Value::Number(rate)) => Ok(rate.to_string()),
        _ => Err(RategateError::Parsing(
            "rate entry has no numeric rate".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query() -> RateQuery {
        RateQuery::new(
            "Summer".into(),
            "FloatingPointResort".into(),
            "SingletonRoom".into(),
        )
    }

    #[test]
    fn cache_key_is_pure() {
        let a = query().cache_key();
        let b = query().cache_key();
        assert_eq!(a, b);
        assert!(a.starts_with("pricing:"));
        // sha-256 hex digest
        assert_eq!(a.len(), "pricing:".len() + 64);
    }

    #[test]
    fn cache_key_separates_tuples() {
        let base = query().cache_key();
        let other_room = RateQuery::new(
            "Summer".into(),
            "FloatingPointResort".into(),
            "DoubleRoom".into(),
        );
        let other_period =
            RateQuery::new("Winter".into(), "FloatingPointResort".into(), "SingletonRoom".into());
        assert_ne!(base, other_room.cache_key());
        assert_ne!(base, other_period.cache_key());
        assert_ne!(other_room.cache_key(), other_period.cache_key());
    }

    #[test]
    fn extract_prefers_the_matching_triple() {
        let body = json!({
            "rates": [
                {"period": "Winter", "hotel": "FloatingPointResort", "room": "SingletonRoom", "rate": 11000},
                {"period": "Summer", "hotel": "FloatingPointResort", "room": "SingletonRoom", "rate": 25000},
            ]
        });
        assert_eq!(extract_rate(&body, &query()).unwrap(), "25000");
    }

    #[test]
    fn extract_falls_back_to_the_first_entry() {
        let body = json!({
            "rates": [
                {"period": "Winter", "hotel": "Elsewhere", "room": "Suite", "rate": 9000},
            ]
        });
        assert_eq!(extract_rate(&body, &query()).unwrap(), "9000");
    }

    #[test]
    fn extract_rejects_bodies_without_rates() {
        assert!(matches!(
            extract_rate(&json!({}), &query()),
            Err(RategateError::Parsing(_))
        ));
        assert!(matches!(
            extract_rate(&json!({"rates": []}), &query()),
            Err(RategateError::Parsing(_))
        ));
    }

    #[test]
    fn extract_requires_a_numeric_rate() {
        let body = json!({"rates": [{"rate": "not a number"}]});
        assert!(matches!(
            extract_rate(&body, &query()),
            Err(RategateError::Parsing(_))
        ));
    }
}
