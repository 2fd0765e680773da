//! The public storage engine: one file triplet, one serializer.

use crate::document::{CacheDocument, CacheEntry};
use crate::layout::{DEFAULT_BACKUP_SUFFIX, DEFAULT_TEMP_SUFFIX, FileLayout};
use crate::queue::OperationQueue;
use crate::recovery::RecoveryLoader;
use crate::writer::AtomicWriter;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration builder for a [`FileStore`]
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    path: PathBuf,
    recovery: bool,
    temp_suffix: String,
    backup_suffix: String,
}

impl StoreBuilder {
    /// Start configuring a store whose primary file is `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recovery: true,
            temp_suffix: DEFAULT_TEMP_SUFFIX.to_string(),
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }

    /// Enable or disable backup/temp recovery of a corrupt primary
    #[must_use]
    pub fn recovery(mut self, enabled: bool) -> Self {
        self.recovery = enabled;
        self
    }

    /// Suffix of the write staging file
    #[must_use]
    pub fn temp_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.temp_suffix = suffix.into();
        self
    }

    /// Suffix of the backup file
    #[must_use]
    pub fn backup_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.backup_suffix = suffix.into();
        self
    }

    /// Build the store
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path has no file name, a suffix is
    /// empty, or both suffixes are equal.
    pub fn build(self) -> Result<FileStore> {
        if self.path.file_name().is_none() {
            return Err(Error::configuration(format!(
                "Cache path has no file name: {}",
                self.path.display()
            )));
        }
        if self.temp_suffix.is_empty() || self.backup_suffix.is_empty() {
            return Err(Error::configuration("Temp and backup suffixes must not be empty"));
        }
        if self.temp_suffix == self.backup_suffix {
            return Err(Error::configuration(
                "Temp and backup suffixes must differ",
            ));
        }

        let layout = FileLayout::with_suffixes(self.path, &self.temp_suffix, &self.backup_suffix);
        Ok(FileStore {
            loader: RecoveryLoader::new(layout.clone(), self.recovery),
            writer: AtomicWriter::new(layout),
            queue: OperationQueue::new(),
        })
    }
}

/// Result of an in-memory mutation: whether the document must be written back
enum Mutation<T> {
    Persist(T),
    Unchanged(T),
}

/// A persistent key-value store backed by a single document file.
///
/// Every operation loads the current document, applies its change in memory,
/// and (for mutations) atomically persists the result. Operations on one store
/// run one at a time in the order they were called; each method enqueues
/// immediately and returns a future that resolves when its turn completes.
///
/// Because the slot is taken when the method is called, a later operation
/// cannot start while an earlier one is neither polled nor dropped; await or
/// drop operations in the order they were created.
///
/// A store exclusively owns its file triplet. Two stores on the same path are
/// not coordinated.
#[derive(Debug)]
pub struct FileStore {
    loader: RecoveryLoader,
    writer: AtomicWriter,
    queue: OperationQueue,
}

impl FileStore {
    /// Open a store at `path` with default settings (recovery enabled)
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let layout = FileLayout::new(path);
        Self {
            loader: RecoveryLoader::new(layout.clone(), true),
            writer: AtomicWriter::new(layout),
            queue: OperationQueue::new(),
        }
    }

    /// Configure a store at `path`
    #[must_use]
    pub fn builder(path: impl Into<PathBuf>) -> StoreBuilder {
        StoreBuilder::new(path)
    }

    /// Path of the primary cache file
    #[must_use]
    pub fn path(&self) -> &Path {
        self.writer.layout().primary()
    }

    /// The file triplet owned by this store
    #[must_use]
    pub fn layout(&self) -> &FileLayout {
        self.writer.layout()
    }

    /// Insert or replace an entry. Always persists.
    pub fn write(&self, entry: CacheEntry) -> impl Future<Output = Result<()>> {
        self.mutate(move |document| {
            document.upsert(entry);
            Mutation::Persist(())
        })
    }

    /// Fetch an entry by key without any expiry check
    pub fn read(&self, key: impl Into<String>) -> impl Future<Output = Result<Option<CacheEntry>>> {
        let key = key.into();
        self.inspect(move |document| document.get(&key).cloned())
    }

    /// Delete an entry. Returns `false`, without writing, if it was absent.
    pub fn delete(&self, key: impl Into<String>) -> impl Future<Output = Result<bool>> {
        let key = key.into();
        self.mutate(move |document| match document.delete(&key) {
            Some(_) => Mutation::Persist(true),
            None => {
                debug!(key = %key, "Delete of absent key; skipping write");
                Mutation::Unchanged(false)
            }
        })
    }

    /// Delete an entry only if `predicate` accepts its current value.
    ///
    /// The check and the removal happen in one queued operation, so an entry
    /// rewritten in between is never removed by a stale decision.
    pub fn delete_if<P>(
        &self,
        key: impl Into<String>,
        predicate: P,
    ) -> impl Future<Output = Result<bool>>
    where
        P: FnOnce(&CacheEntry) -> bool,
    {
        let key = key.into();
        self.mutate(move |document| {
            if document.get(&key).is_some_and(predicate) {
                document.delete(&key);
                Mutation::Persist(true)
            } else {
                Mutation::Unchanged(false)
            }
        })
    }

    /// Replace the store contents with an empty document
    pub fn clear(&self) -> impl Future<Output = Result<()>> {
        self.queue.run(async move {
            self.writer.persist(&CacheDocument::new()).await?;
            Ok(())
        })
    }

    /// Keys currently carrying `tag`
    pub fn keys_by_tag(
        &self,
        tag: impl Into<String>,
    ) -> impl Future<Output = Result<BTreeSet<String>>> {
        let tag = tag.into();
        self.inspect(move |document| document.keys_by_tag(&tag))
    }

    /// Strip `tag` from every entry, keeping the entries.
    ///
    /// Returns `false`, without writing, if no entry carried the tag.
    pub fn delete_tag(&self, tag: impl Into<String>) -> impl Future<Output = Result<bool>> {
        let tag = tag.into();
        self.mutate(move |document| {
            if document.delete_tag(&tag) {
                Mutation::Persist(true)
            } else {
                debug!(tag = %tag, "Unknown tag; skipping write");
                Mutation::Unchanged(false)
            }
        })
    }

    /// Delete every entry carrying `tag`; writes only if any were removed
    pub fn evict_tag(&self, tag: impl Into<String>) -> impl Future<Output = Result<usize>> {
        let tag = tag.into();
        self.mutate(move |document| match document.delete_tagged(&tag) {
            0 => Mutation::Unchanged(0),
            removed => Mutation::Persist(removed),
        })
    }

    /// Remove entries expiring at or before `now_ms`; writes only if any were removed
    pub fn purge_expired(&self, now_ms: i64) -> impl Future<Output = Result<usize>> {
        self.mutate(move |document| match document.purge_expired(now_ms) {
            0 => Mutation::Unchanged(0),
            removed => {
                debug!(removed, now_ms, "Purged expired entries");
                Mutation::Persist(removed)
            }
        })
    }

    /// The current document
    pub fn snapshot(&self) -> impl Future<Output = Result<CacheDocument>> {
        self.inspect(CacheDocument::clone)
    }

    /// Number of entries currently stored
    pub fn len(&self) -> impl Future<Output = Result<usize>> {
        self.inspect(CacheDocument::len)
    }

    fn inspect<F, T>(&self, view: F) -> impl Future<Output = Result<T>>
    where
        F: FnOnce(&CacheDocument) -> T,
    {
        self.queue.run(async move {
            let document = self.loader.load().await?;
            Ok(view(&document))
        })
    }

    fn mutate<F, T>(&self, apply: F) -> impl Future<Output = Result<T>>
    where
        F: FnOnce(&mut CacheDocument) -> Mutation<T>,
    {
        self.queue.run(async move {
            let mut document = self.loader.load().await?;
            match apply(&mut document) {
                Mutation::Persist(value) => {
                    debug_assert!(document.check_invariant().is_ok());
                    self.writer.persist(&document).await?;
                    Ok(value)
                }
                Mutation::Unchanged(value) => Ok(value),
            }
        })
    }
}
