//! Serialization utilities for persisted networking records
//!
//! This module provides reusable serde serialization and deserialization
//! utilities for byte payloads embedded in JSON documents.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

/// Custom serialization module for byte payloads as base64 text
///
/// # Usage
/// ```rust
/// use caravel_domain::serde_util;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "serde_util::base64_bytes")]
///     payload: Vec<u8>,
/// }
/// ```
pub mod base64_bytes {
    use super::*;

    /// Serialize bytes as a base64 string
    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize a base64 string into bytes
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// [`base64_bytes`] for optional payloads
pub mod base64_opt {
    use super::*;

    /// Serialize optional bytes as an optional base64 string
    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional base64 string into optional bytes
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => {
                STANDARD.decode(text.as_bytes()).map(Some).map_err(serde::de::Error::custom)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Record {
        #[serde(with = "super::base64_bytes")]
        payload: Vec<u8>,
    }

    /// Tests that byte payloads serialize to base64 text
    #[test]
    fn test_bytes_serialize_as_base64() {
        let record = Record { payload: b"hello".to_vec() };
        let json = serde_json::to_string(&record).expect("Should serialize valid struct");
        assert!(json.contains("aGVsbG8="), "Should contain base64 payload");
    }

    /// Tests that base64 text deserializes back into bytes
    #[test]
    fn test_base64_deserialize() {
        let json = r#"{"payload":"aGVsbG8="}"#;
        let record: Record = serde_json::from_str(json).expect("Should deserialize valid JSON");
        assert_eq!(record.payload, b"hello");
    }

    /// Tests that malformed base64 is rejected
    #[test]
    fn test_invalid_base64_rejected() {
        let json = r#"{"payload":"not base64!!"}"#;
        let result: Result<Record, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
