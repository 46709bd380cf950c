//! Wire types for the remote chain node.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content type that marks a transaction as a path manifest.
pub const MANIFEST_CONTENT_TYPE: &str = "application/x.arweave-manifest+json";

/// Base64url block hash as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);

impl BlockHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_owned())
    }
}

impl From<String> for BlockHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

/// Response of the node's `/info` endpoint, reduced to the fields the
/// scheduler consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub height: u64,
    /// Hash of the node's current head block.
    pub current: BlockHash,
}

/// A block as served by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub indep_hash: BlockHash,
    pub previous_block: BlockHash,
    pub height: u64,
    #[serde(default)]
    pub timestamp: u64,
    /// Ordered transaction ids contained in the block.
    #[serde(default)]
    pub txs: Vec<String>,
}

/// Name/value tag attached to a transaction. Both sides are base64url on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    /// Builds a tag from plain UTF-8 name/value, encoding both sides.
    pub fn from_utf8(name: &str, value: &str) -> Self {
        Self {
            name: URL_SAFE_NO_PAD.encode(name.as_bytes()),
            value: URL_SAFE_NO_PAD.encode(value.as_bytes()),
        }
    }

    pub fn name_utf8(&self) -> Option<String> {
        decode_utf8(&self.name)
    }

    pub fn value_utf8(&self) -> Option<String> {
        decode_utf8(&self.value)
    }

    /// `name|value` pair in wire encoding, the form stored in tag-pair
    /// columns and matched by CONTAINS predicates.
    pub fn pair(&self) -> String {
        format!("{}|{}", self.name, self.value)
    }
}

/// Encodes a plain UTF-8 tag name or value the way the wire carries it.
pub fn encode_tag_component(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

fn decode_utf8(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

/// A transaction as served by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub data_root: String,
    #[serde(default)]
    pub data_size: u64,
    #[serde(default)]
    pub bundled_in: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Transaction {
    /// True when the transaction declares the manifest content type.
    pub fn is_manifest(&self) -> bool {
        self.tags.iter().any(|tag| {
            matches!(tag.name_utf8().as_deref(), Some(name) if name.eq_ignore_ascii_case("content-type"))
                && matches!(tag.value_utf8().as_deref(), Some(MANIFEST_CONTENT_TYPE))
        })
    }
}

/// Parsed body of a path-manifest transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPayload {
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub index: Option<ManifestIndex>,
    #[serde(default)]
    pub paths: std::collections::BTreeMap<String, ManifestPathEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPathEntry {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_utf8() {
        let tag = Tag::from_utf8("Content-Type", "text/html");
        assert_eq!(tag.name_utf8().as_deref(), Some("Content-Type"));
        assert_eq!(tag.value_utf8().as_deref(), Some("text/html"));
        assert_eq!(tag.pair(), format!("{}|{}", tag.name, tag.value));
    }

    #[test]
    fn manifest_detection_matches_content_type_tag() {
        let mut tx = Transaction {
            id: "tx".into(),
            owner: String::new(),
            target: String::new(),
            data_root: String::new(),
            data_size: 0,
            bundled_in: None,
            tags: vec![Tag::from_utf8("App-Name", "test")],
        };
        assert!(!tx.is_manifest());

        tx.tags
            .push(Tag::from_utf8("Content-Type", MANIFEST_CONTENT_TYPE));
        assert!(tx.is_manifest());
    }

    #[test]
    fn manifest_payload_parses_paths() {
        let raw = r#"{
            "manifest": "arweave/paths",
            "version": "0.1.0",
            "index": { "path": "index.html" },
            "paths": {
                "index.html": { "id": "tx-index" },
                "img/logo.png": { "id": "tx-logo" }
            }
        }"#;
        let payload: ManifestPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.index.unwrap().path, "index.html");
        assert_eq!(payload.paths.len(), 2);
        assert_eq!(payload.paths["img/logo.png"].id, "tx-logo");
    }
}
