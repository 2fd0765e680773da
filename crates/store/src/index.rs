//! In-memory mutations of a [`CacheDocument`] that keep the tag index in sync.
//!
//! Nothing in this module performs I/O. Every method either preserves the
//! entry/index invariant or, for [`CacheDocument::remove_entry`], leaves the
//! final [`CacheDocument::retract_tags`] call to the caller.

use crate::document::{CacheDocument, CacheEntry};
use std::collections::BTreeSet;

/// First inconsistency found between entries and the tag index
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagIndexViolation {
    /// An entry carries a tag the index does not list it under
    #[error("entry `{key}` carries tag `{tag}` but is not indexed under it")]
    Unindexed {
        /// Entry key
        key: String,
        /// Tag missing from the index
        tag: String,
    },
    /// The index lists a key that is absent or does not carry the tag
    #[error("tag `{tag}` indexes `{key}` which does not carry it")]
    Dangling {
        /// Tag in the index
        tag: String,
        /// Key listed under the tag
        key: String,
    },
    /// A tag maps to no keys
    #[error("tag `{tag}` has an empty key set")]
    Empty {
        /// Tag with the empty set
        tag: String,
    },
}

impl CacheDocument {
    /// Look up an entry by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Whether an entry exists under `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys currently carrying `tag`; empty if the tag is unknown
    #[must_use]
    pub fn keys_by_tag(&self, tag: &str) -> BTreeSet<String> {
        self.tag_index.get(tag).cloned().unwrap_or_default()
    }

    /// Insert `entry`, replacing any entry under the same key.
    ///
    /// The previous entry's tag memberships are retracted before the new ones
    /// are indexed. Returns the replaced entry.
    pub fn upsert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let previous = self.entries.remove(&entry.key);
        if let Some(previous) = &previous {
            self.retract_tags(&previous.key, &previous.tags);
        }

        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        self.entries.insert(entry.key.clone(), entry);
        previous
    }

    /// Remove `key` from the index set of each tag, dropping sets that empty
    pub fn retract_tags<'a, I>(&mut self, key: &str, tags: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for tag in tags {
            if let Some(keys) = self.tag_index.get_mut(tag.as_str()) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag.as_str());
                }
            }
        }
    }

    /// Remove and return the entry under `key`.
    ///
    /// The caller must retract the returned entry's tags.
    pub fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Remove an entry together with its tag memberships
    pub fn delete(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.remove_entry(key)?;
        self.retract_tags(&removed.key, &removed.tags);
        Some(removed)
    }

    /// Remove every entry whose expiry is at or before `now_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self, now_ms: i64) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now_ms))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            self.delete(key);
        }
        expired.len()
    }

    /// Delete every entry carrying `tag`, returning how many were removed
    pub fn delete_tagged(&mut self, tag: &str) -> usize {
        let keys = self.keys_by_tag(tag);
        for key in &keys {
            self.delete(key);
        }
        keys.len()
    }

    /// Drop `tag` from the index and strip it from every entry that had it.
    ///
    /// Entries themselves are kept. Returns `false` if the tag was unknown.
    pub fn delete_tag(&mut self, tag: &str) -> bool {
        let Some(keys) = self.tag_index.remove(tag) else {
            return false;
        };
        for key in &keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.tags.remove(tag);
            }
        }
        true
    }

    /// Remove every entry and tag
    pub fn clear(&mut self) {
        self.entries.clear();
        self.tag_index.clear();
    }

    /// Recompute the tag index from entry tags
    pub fn rebuild_tag_index(&mut self) {
        self.tag_index.clear();
        for entry in self.entries.values() {
            for tag in &entry.tags {
                self.tag_index
                    .entry(tag.clone())
                    .or_default()
                    .insert(entry.key.clone());
            }
        }
    }

    /// Verify that entries and the tag index agree
    pub fn check_invariant(&self) -> Result<(), TagIndexViolation> {
        for entry in self.entries.values() {
            for tag in &entry.tags {
                let indexed = self
                    .tag_index
                    .get(tag)
                    .is_some_and(|keys| keys.contains(&entry.key));
                if !indexed {
                    return Err(TagIndexViolation::Unindexed {
                        key: entry.key.clone(),
                        tag: tag.clone(),
                    });
                }
            }
        }

        for (tag, keys) in &self.tag_index {
            if keys.is_empty() {
                return Err(TagIndexViolation::Empty { tag: tag.clone() });
            }
            for key in keys {
                let carries = self
                    .entries
                    .get(key)
                    .is_some_and(|entry| entry.tags.contains(tag));
                if !carries {
                    return Err(TagIndexViolation::Dangling {
                        tag: tag.clone(),
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| (*item).to_string()).collect()
    }

    fn entry(key: &str, tags: &[&str]) -> CacheEntry {
        CacheEntry::new(key, "test/v1", json!(key), 1_000).with_tags(tags.iter().copied())
    }

    #[test]
    fn test_upsert_indexes_tags() {
        let mut doc = CacheDocument::new();
        doc.upsert(entry("a", &["t1", "t2"]));
        doc.upsert(entry("b", &["t1"]));

        assert_eq!(doc.keys_by_tag("t1"), keys(&["a", "b"]));
        assert_eq!(doc.keys_by_tag("t2"), keys(&["a"]));
        assert!(doc.keys_by_tag("unknown").is_empty());
        doc.check_invariant().unwrap();
    }

    #[test]
    fn test_upsert_retracts_previous_tags() {
        let mut doc = CacheDocument::new();
        doc.upsert(entry("a", &["old", "kept"]));
        let previous = doc.upsert(entry("a", &["kept", "new"]));

        assert_eq!(previous.unwrap().tags.len(), 2);
        assert!(!doc.tag_index().contains_key("old"));
        assert_eq!(doc.keys_by_tag("kept").len(), 1);
        assert_eq!(doc.keys_by_tag("new").len(), 1);
        doc.check_invariant().unwrap();
    }

    #[test]
    fn test_remove_entry_leaves_tags_to_caller() {
        let mut doc = CacheDocument::new();
        doc.upsert(entry("a", &["t"]));

        let removed = doc.remove_entry("a").unwrap();
        assert!(matches!(
            doc.check_invariant(),
            Err(TagIndexViolation::Dangling { .. })
        ));

        doc.retract_tags(&removed.key, &removed.tags);
        assert!(doc.tag_index().is_empty());
        doc.check_invariant().unwrap();
        assert!(doc.remove_entry("a").is_none());
    }

    #[test]
    fn test_retract_keeps_other_members() {
        let mut doc = CacheDocument::new();
        doc.upsert(entry("a", &["t"]));
        doc.upsert(entry("b", &["t"]));

        doc.delete("a");
        assert_eq!(doc.keys_by_tag("t"), keys(&["b"]));
        doc.check_invariant().unwrap();
    }

    #[test]
    fn test_purge_expired_boundary_is_inclusive() {
        let mut doc = CacheDocument::new();
        doc.upsert(entry("past", &["t"]).with_expires_at(Some(99)));
        doc.upsert(entry("now", &["t"]).with_expires_at(Some(100)));
        doc.upsert(entry("future", &["t"]).with_expires_at(Some(101)));
        doc.upsert(entry("forever", &[]));

        assert_eq!(doc.purge_expired(100), 2);
        assert!(doc.contains("future"));
        assert!(doc.contains("forever"));
        assert_eq!(doc.keys_by_tag("t"), keys(&["future"]));
        assert_eq!(doc.purge_expired(100), 0);
        doc.check_invariant().unwrap();
    }

    #[test]
    fn test_delete_tag_keeps_entries() {
        let mut doc = CacheDocument::new();
        doc.upsert(entry("a", &["t1", "t2"]));
        doc.upsert(entry("b", &["t1"]));

        assert!(doc.delete_tag("t1"));
        assert!(!doc.delete_tag("t1"));

        assert_eq!(doc.len(), 2);
        assert!(doc.keys_by_tag("t1").is_empty());
        assert_eq!(doc.get("a").unwrap().tags, keys(&["t2"]));
        assert!(doc.get("b").unwrap().tags.is_empty());
        doc.check_invariant().unwrap();
    }

    #[test]
    fn test_delete_tagged_removes_entries_and_their_other_tags() {
        let mut doc = CacheDocument::new();
        doc.upsert(entry("a", &["doomed", "other"]));
        doc.upsert(entry("b", &["doomed"]));
        doc.upsert(entry("c", &["other"]));

        assert_eq!(doc.delete_tagged("doomed"), 2);
        assert_eq!(doc.delete_tagged("doomed"), 0);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.keys_by_tag("other"), keys(&["c"]));
        doc.check_invariant().unwrap();
    }

    #[test]
    fn test_check_invariant_reports_empty_set() {
        let mut doc = CacheDocument::new();
        doc.tag_index.insert("lonely".into(), BTreeSet::new());
        assert_eq!(
            doc.check_invariant(),
            Err(TagIndexViolation::Empty {
                tag: "lonely".into()
            })
        );
    }

    #[test]
    fn test_check_invariant_reports_unindexed_tag() {
        let mut doc = CacheDocument::new();
        doc.entries.insert("a".into(), entry("a", &["t"]));
        assert!(matches!(
            doc.check_invariant(),
            Err(TagIndexViolation::Unindexed { .. })
        ));

        doc.rebuild_tag_index();
        doc.check_invariant().unwrap();
    }
}
