//! Sync data models: wire format and pairing links.

use serde::{Deserialize, Serialize};

/// The versioned, opaque payload stored under a sync key.
///
/// `content` is an encrypted envelope produced by
/// [`encrypt_to_string`](crate::crypto::encrypt_to_string), or empty for a
/// freshly registered key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncData {
    pub version: i64,
    pub content: String,
}

impl SyncData {
    /// The value a sync key is seeded with on registration.
    pub fn empty() -> Self {
        Self {
            version: 0,
            content: String::new(),
        }
    }
}

/// Response body of `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub key: String,
}

/// Response body of `GET /db/{key}/version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: i64,
}

/// Request body of `POST /links`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkRequest {
    pub sync_key: String,
}

/// A short-lived handle that lets a second device discover a sync key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingLink {
    pub id: String,
    pub sync_key: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl PairingLink {
    /// Whether the link is older than `ttl_secs` at time `now`.
    pub fn is_expired(&self, now: i64, ttl_secs: i64) -> bool {
        now - self.created_at >= ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_data_wire_format() {
        let data = SyncData {
            version: 7,
            content: "AAAA".to_string(),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"version":7,"content":"AAAA"}"#);
    }

    #[test]
    fn pairing_link_uses_camel_case() {
        let link = PairingLink {
            id: "abc".to_string(),
            sync_key: "key".to_string(),
            created_at: 100,
        };
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["syncKey"], "key");
        assert_eq!(json["createdAt"], 100);
    }

    #[test]
    fn pairing_link_expiry() {
        let link = PairingLink {
            id: "abc".to_string(),
            sync_key: "key".to_string(),
            created_at: 1_000,
        };
        assert!(!link.is_expired(1_299, 300));
        assert!(link.is_expired(1_300, 300));
    }
}
