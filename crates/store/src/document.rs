//! Cache document model and its on-disk encoding.
//!
//! A [`CacheDocument`] is the unit of persistence: exactly one per cache file.
//! It is loaded at the start of every store operation, mutated in memory,
//! persisted, and discarded.
//!
//! ## Wire format
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "entries": {
//!     "user:42": {
//!       "key": "user:42",
//!       "typeId": "profile/v2",
//!       "payload": { "name": "Ada" },
//!       "createdAt": 1718000000000,
//!       "expiresAt": 1718003600000,
//!       "tags": ["users"]
//!     }
//!   },
//!   "tagIndex": { "users": ["user:42"] }
//! }
//! ```
//!
//! Absent top-level fields fall back to defaults (`schemaVersion` to 1, maps to
//! empty), so older or hand-written files still load.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Schema version written by this version of the store
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Schema version assumed when a file does not declare one
const UNVERSIONED_SCHEMA: u32 = 1;

/// One cached value.
///
/// `type_id` and `payload` belong to the codec layer; the store carries them
/// without inspecting their shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Identity of the entry, unique within a document
    #[serde(default)]
    pub key: String,
    /// Logical type (and version) of the payload
    pub type_id: String,
    /// Codec-encoded value
    #[serde(default)]
    pub payload: Value,
    /// Write time in milliseconds since the Unix epoch
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    /// Expiry time in milliseconds since the Unix epoch; `None` never expires
    #[serde(
        rename = "expiresAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at_ms: Option<i64>,
    /// Tags used only for the reverse index
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    /// Create an untagged entry that never expires
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        type_id: impl Into<String>,
        payload: Value,
        created_at_ms: i64,
    ) -> Self {
        Self {
            key: key.into(),
            type_id: type_id.into(),
            payload,
            created_at_ms,
            expires_at_ms: None,
            tags: BTreeSet::new(),
        }
    }

    /// Set the expiry timestamp
    #[must_use]
    pub fn with_expires_at(mut self, expires_at_ms: Option<i64>) -> Self {
        self.expires_at_ms = expires_at_ms;
        self
    }

    /// Replace the tag set
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the entry has an expiry at or before `now_ms`
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// The full persisted state of one cache file.
///
/// The entry map and tag index are only mutated through the methods in this
/// crate, which keep the two views consistent: every tag on an entry is
/// indexed under that entry's key, every indexed key carries the tag, and no
/// tag maps to an empty key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDocument {
    #[serde(default = "unversioned_schema")]
    pub(crate) schema_version: u32,
    #[serde(default)]
    pub(crate) entries: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    pub(crate) tag_index: BTreeMap<String, BTreeSet<String>>,
}

const fn unversioned_schema() -> u32 {
    UNVERSIONED_SCHEMA
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            entries: BTreeMap::new(),
            tag_index: BTreeMap::new(),
        }
    }
}

impl CacheDocument {
    /// Create an empty document at the current schema version
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema version of this document
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// All entries, keyed by entry key
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, CacheEntry> {
        &self.entries
    }

    /// Reverse index from tag to the keys carrying it
    #[must_use]
    pub fn tag_index(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.tag_index
    }

    /// Bring a freshly decoded document into canonical form.
    ///
    /// Entry keys are forced to their map key, old schemas are migrated, and
    /// the tag index is rebuilt from entry tags.
    fn normalize(mut self) -> Self {
        self.migrate();

        for (key, entry) in &mut self.entries {
            if entry.key != *key {
                debug!(map_key = %key, entry_key = %entry.key, "Entry key differs from map key; using map key");
                entry.key.clone_from(key);
            }
        }

        let stored = std::mem::take(&mut self.tag_index);
        self.rebuild_tag_index();
        if stored != self.tag_index {
            warn!(
                stored_tags = stored.len(),
                rebuilt_tags = self.tag_index.len(),
                "Stored tag index was inconsistent with entries; rebuilt"
            );
        }
        self
    }

    fn migrate(&mut self) {
        match self.schema_version {
            v if v == CURRENT_SCHEMA_VERSION => {}
            v if v > CURRENT_SCHEMA_VERSION => {
                debug!(
                    schema_version = v,
                    current = CURRENT_SCHEMA_VERSION,
                    "Document written by a newer schema; unknown fields are ignored"
                );
            }
            // Version 0 predates explicit versioning and shares the v1 layout.
            _ => self.schema_version = CURRENT_SCHEMA_VERSION,
        }
    }
}

/// A document that could not be decoded.
///
/// This never reaches store callers; the recovery loader consumes it.
#[derive(Debug, thiserror::Error)]
#[error("malformed cache document: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Encode a document to its textual form
pub fn encode(document: &CacheDocument) -> Result<String> {
    serde_json::to_string_pretty(document)
        .map_err(|e| Error::serialization(format!("Failed to encode cache document: {e}")))
}

/// Decode and normalize a document.
///
/// Fails on malformed JSON and on a top level that is not an object with
/// well-typed members.
pub fn decode(text: &str) -> std::result::Result<CacheDocument, DecodeError> {
    let document: CacheDocument = serde_json::from_str(text)?;
    Ok(document.normalize())
}

/// Whether file contents are empty or whitespace only
#[must_use]
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}
