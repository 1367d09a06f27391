//! Request fingerprints: the shared key for every cache tier.
//!
//! A fingerprint is the SHA-256 digest of the canonical JSON form of a
//! normalized [`SummaryRequest`]. Object keys are sorted recursively before
//! hashing, so two logically identical requests hash the same no matter how
//! their parameters were serialized.

use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::providers::SummaryRequest;

/// Deterministic cache key for a summary request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a request after normalizing it.
    pub fn of(request: &SummaryRequest) -> Result<Self> {
        let value = serde_json::to_value(request.normalized())?;
        Ok(Self::of_value(&value))
    }

    /// Fingerprint an arbitrary JSON payload.
    pub fn of_value(value: &Value) -> Self {
        let canonical = canonicalize(value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuild `value` with every object's keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_deterministic() {
        let req = SummaryRequest::new(["https://a/rss"]).with_category("tech");
        assert_eq!(Fingerprint::of(&req).unwrap(), Fingerprint::of(&req).unwrap());
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = Fingerprint::of(&SummaryRequest::new(["https://a/rss"])).unwrap();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 8);
    }

    #[test]
    fn test_fingerprint_matches_known_digest() {
        let value = serde_json::json!({ "b": [2, { "d": 4, "c": 3 }], "a": 1 });
        // sha256 of {"a":1,"b":[2,{"c":3,"d":4}]}
        assert_eq!(
            Fingerprint::of_value(&value).as_str(),
            "88c3cdf568e74603bc9ea42ed03f42ad6dcf46dbfbb56089d8a163f6b84a0c52"
        );
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: SummaryRequest = serde_json::from_str(
            r#"{"feeds":["https://a/rss"],"locale":"en","options":{"tone":"calm","length":3}}"#,
        )
        .unwrap();
        let b: SummaryRequest = serde_json::from_str(
            r#"{"options":{"length":3,"tone":"calm"},"locale":"en","feeds":["https://a/rss"]}"#,
        )
        .unwrap();
        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn test_nested_option_key_order_does_not_matter() {
        let a = json!({"x": {"b": 1, "a": [ {"d": 1, "c": 2} ]}});
        let b = json!({"x": {"a": [ {"c": 2, "d": 1} ], "b": 1}});
        assert_eq!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn test_feed_order_and_case_normalized() {
        let a = SummaryRequest::new(["https://b/rss", "https://a/rss"]).with_category("Tech");
        let b = SummaryRequest::new(["https://a/rss", "https://b/rss "]).with_category("tech");
        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn test_output_changing_params_change_fingerprint() {
        let base = SummaryRequest::new(["https://a/rss"]);
        let fp = Fingerprint::of(&base).unwrap();
        let variants = [
            base.clone().with_category("sports"),
            base.clone().with_locale("fr"),
            base.clone().with_style("haiku"),
            SummaryRequest::new(["https://other/rss"]),
        ];
        for v in &variants {
            assert_ne!(Fingerprint::of(v).unwrap(), fp, "{v:?}");
        }
    }

    #[test]
    fn test_array_order_inside_options_is_significant() {
        let a = json!({"o": [1, 2]});
        let b = json!({"o": [2, 1]});
        assert_ne!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }
}
