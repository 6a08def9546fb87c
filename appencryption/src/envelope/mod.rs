//! Envelope encryption logic for the application encryption library
//!
//! This module contains the implementation of envelope encryption using a hierarchical
//! key model (System Keys, Intermediate Keys, Data Row Keys).

pub mod encryption;

use serde::{Deserialize, Serialize};

/// Serializes/deserializes a byte buffer as base64 text, matching the metastore's
/// canonical JSON representation for an envelope's encrypted key material.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(D::Error::custom)
    }
}

/// Metadata for a key including its ID and creation timestamp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyMeta {
    #[serde(rename = "KeyId")]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: i64,
}

impl KeyMeta {
    /// Creates a new KeyMeta
    pub fn new(id: String, created: i64) -> Self {
        KeyMeta { id, created }
    }

    /// Returns true if this is the latest version of the key (created == 0)
    pub fn is_latest(&self) -> bool {
        self.created == 0
    }

    /// Returns a copy of this KeyMeta as the latest version (created = 0)
    pub fn as_latest(&self) -> KeyMeta {
        KeyMeta {
            id: self.id.clone(),
            created: 0,
        }
    }
}

/// Record containing encrypted key and metadata
///
/// `encrypted_key` is base64-encoded in the canonical JSON form used by the
/// metastore (`encryption_key.key_record`); it round-trips through this struct
/// as raw bytes regardless of wire representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeKeyRecord {
    #[serde(rename = "Revoked", skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: i64,
    #[serde(rename = "Key", with = "base64_bytes")]
    pub encrypted_key: Vec<u8>,
    #[serde(rename = "ParentKeyMeta", skip_serializing_if = "Option::is_none")]
    pub parent_key_meta: Option<KeyMeta>,
}

/// Record containing encrypted data and key
///
/// `data` is carried as raw bytes rather than base64 — unlike the metastore's
/// envelope records, a data row record is handed back to the caller verbatim
/// rather than persisted through a JSON-only store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRowRecord {
    #[serde(rename = "Key")]
    pub key: EnvelopeKeyRecord,
    #[serde(rename = "Data")]
    pub data: Vec<u8>,
}

pub use encryption::EnvelopeEncryption;
