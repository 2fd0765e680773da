//! Typed cache façade over a [`FileStore`].
//!
//! The store keeps opaque entries; this layer owns everything that needs a
//! notion of type or time:
//! - encoding values through a [`PayloadCodec`] and checking type ids on read
//! - stamping and judging expiry with a [`Clock`] and [`TtlPolicy`]
//! - serving stale values while a background refresh runs

use crate::clock::{Clock, SystemClock, duration_ms};
use crate::codec::PayloadCodec;
use crate::location::{StorageLocation, resolve_cache_file};
use crate::ttl::{NoExpiry, TtlPolicy};
use crate::{Error, Result};
use cachet_store::{CacheEntry, FileStore};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default application directory name for symbolic locations
pub const DEFAULT_APP_NAME: &str = "cachet";

/// Default cache file name
pub const DEFAULT_FILE_NAME: &str = "cache.json";

/// What to do when a stored entry does not decode with this cache's codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// Delete the entry and report it as missing
    #[default]
    Evict,
    /// Return [`Error::TypeMismatch`] or [`Error::Decode`]
    Error,
}

/// Per-write overrides
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    ttl: Option<Duration>,
    tags: BTreeSet<String>,
}

impl WriteOptions {
    /// Options that defer to the cache's TTL policy and add no tags
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire this entry after `ttl`, overriding the TTL policy
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Add a tag
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several tags
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone)]
enum Target {
    Path(PathBuf),
    Location {
        location: StorageLocation,
        app_name: String,
        file_name: String,
        subdirectory: Option<String>,
    },
}

/// Configuration builder for a [`Cache`]
pub struct CacheBuilder<T, C> {
    codec: C,
    target: Target,
    recovery: bool,
    ttl: Arc<dyn TtlPolicy>,
    clock: Arc<dyn Clock>,
    mismatch: MismatchPolicy,
    stale_window: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: PayloadCodec<T>> CacheBuilder<T, C> {
    /// Start configuring a cache that stores values with `codec`
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            target: Target::Location {
                location: StorageLocation::default(),
                app_name: DEFAULT_APP_NAME.to_string(),
                file_name: DEFAULT_FILE_NAME.to_string(),
                subdirectory: None,
            },
            recovery: true,
            ttl: Arc::new(NoExpiry),
            clock: Arc::new(SystemClock),
            mismatch: MismatchPolicy::default(),
            stale_window: Duration::ZERO,
            _marker: PhantomData,
        }
    }

    /// Store the cache at an explicit file path
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target = Target::Path(path.into());
        self
    }

    /// Store the cache under a symbolic location
    #[must_use]
    pub fn location(mut self, location: StorageLocation) -> Self {
        self.with_location_target(|target_location, _, _, _| *target_location = location);
        self
    }

    /// Application directory name under the location
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.with_location_target(|_, app_name, _, _| *app_name = name);
        self
    }

    /// Cache file name under the location
    #[must_use]
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.with_location_target(|_, _, file_name, _| *file_name = name);
        self
    }

    /// Subdirectory between the application directory and the file
    #[must_use]
    pub fn subdirectory(mut self, sub: impl Into<String>) -> Self {
        let sub = sub.into();
        self.with_location_target(|_, _, _, subdirectory| *subdirectory = Some(sub));
        self
    }

    /// Enable or disable recovery of a corrupt cache file
    #[must_use]
    pub fn recovery(mut self, enabled: bool) -> Self {
        self.recovery = enabled;
        self
    }

    /// Expiry policy for writes without an explicit TTL
    #[must_use]
    pub fn ttl_policy(mut self, policy: impl TtlPolicy + 'static) -> Self {
        self.ttl = Arc::new(policy);
        self
    }

    /// Time source for stamping and expiring entries
    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Handling of entries written by another codec
    #[must_use]
    pub fn mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.mismatch = policy;
        self
    }

    /// How long past expiry [`Cache::get_or_refresh`] may serve a stale value
    #[must_use]
    pub fn stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    /// Resolve the file path and build the cache
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be resolved, its directory
    /// cannot be created, or the store configuration is invalid.
    pub fn build(self) -> Result<Cache<T, C>> {
        let path = match self.target {
            Target::Path(path) => path,
            Target::Location {
                location,
                app_name,
                file_name,
                subdirectory,
            } => resolve_cache_file(&location, &app_name, &file_name, subdirectory.as_deref())?,
        };
        let store = FileStore::builder(&path).recovery(self.recovery).build()?;
        debug!(path = %path.display(), type_id = self.codec.type_id(), "Opened cache");

        Ok(Cache {
            inner: Arc::new(Inner {
                store,
                codec: self.codec,
                ttl: self.ttl,
                clock: self.clock,
                mismatch: self.mismatch,
                stale_window: self.stale_window,
                refreshing: Mutex::new(HashSet::new()),
            }),
            _marker: PhantomData,
        })
    }

    fn with_location_target(
        &mut self,
        update: impl FnOnce(&mut StorageLocation, &mut String, &mut String, &mut Option<String>),
    ) {
        if let Target::Path(_) = self.target {
            self.target = Target::Location {
                location: StorageLocation::default(),
                app_name: DEFAULT_APP_NAME.to_string(),
                file_name: DEFAULT_FILE_NAME.to_string(),
                subdirectory: None,
            };
        }
        if let Target::Location {
            location,
            app_name,
            file_name,
            subdirectory,
        } = &mut self.target
        {
            update(location, app_name, file_name, subdirectory);
        }
    }
}

struct Inner<C> {
    store: FileStore,
    codec: C,
    ttl: Arc<dyn TtlPolicy>,
    clock: Arc<dyn Clock>,
    mismatch: MismatchPolicy,
    stale_window: Duration,
    refreshing: Mutex<HashSet<String>>,
}

/// A typed persistent cache.
///
/// Cloning is cheap; clones share the same store and serializer.
pub struct Cache<T, C> {
    inner: Arc<Inner<C>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> Clone for Cache<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T, C: PayloadCodec<T>> Cache<T, C> {
    /// Configure a cache that stores values with `codec`
    #[must_use]
    pub fn builder(codec: C) -> CacheBuilder<T, C> {
        CacheBuilder::new(codec)
    }

    /// The underlying storage engine
    #[must_use]
    pub fn store(&self) -> &FileStore {
        &self.inner.store
    }

    /// Fetch a fresh value.
    ///
    /// Expired entries are deleted and reported as missing. Entries that do
    /// not decode are handled per the [`MismatchPolicy`].
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let Some(entry) = self.inner.store.read(key).await? else {
            return Ok(None);
        };

        if entry.is_expired(self.now()) {
            debug!(key, "Cache entry expired");
            self.evict_exact(&entry).await?;
            return Ok(None);
        }

        match self.decode(&entry) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.handle_undecodable(&entry, e).await?;
                Ok(None)
            }
        }
    }

    /// Store `value` under `key` using the TTL policy and no tags
    pub async fn set(&self, key: &str, value: &T) -> Result<()> {
        self.set_with(key, value, WriteOptions::default()).await
    }

    /// Store `value` under `key` with explicit options
    pub async fn set_with(&self, key: &str, value: &T, options: WriteOptions) -> Result<()> {
        let entry = self.build_entry(key, value, options)?;
        self.inner.store.write(entry).await?;
        Ok(())
    }

    /// Delete `key`; returns whether it existed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.inner.store.delete(key).await?)
    }

    /// Delete every entry
    pub async fn clear(&self) -> Result<()> {
        Ok(self.inner.store.clear().await?)
    }

    /// Keys currently carrying `tag`
    pub async fn keys_by_tag(&self, tag: &str) -> Result<BTreeSet<String>> {
        Ok(self.inner.store.keys_by_tag(tag).await?)
    }

    /// Delete every entry carrying `tag`; returns how many were removed
    pub async fn invalidate_tag(&self, tag: &str) -> Result<usize> {
        Ok(self.inner.store.evict_tag(tag).await?)
    }

    /// Remove `tag` from all entries without deleting them
    pub async fn untag(&self, tag: &str) -> Result<bool> {
        Ok(self.inner.store.delete_tag(tag).await?)
    }

    /// Delete entries that have expired according to the cache clock
    pub async fn purge_expired(&self) -> Result<usize> {
        Ok(self.inner.store.purge_expired(self.now()).await?)
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_epoch_ms()
    }

    fn build_entry(&self, key: &str, value: &T, options: WriteOptions) -> Result<CacheEntry> {
        let now = self.now();
        let payload = self.inner.codec.encode(value).map_err(|e| Error::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let expires_at = match options.ttl {
            Some(ttl) => Some(now.saturating_add(duration_ms(ttl))),
            None => self.inner.ttl.expires_at(key, now),
        };

        Ok(
            CacheEntry::new(key, self.inner.codec.type_id(), payload, now)
                .with_expires_at(expires_at)
                .with_tags(options.tags),
        )
    }

    fn decode(&self, entry: &CacheEntry) -> Result<T> {
        let expected = self.inner.codec.type_id();
        if entry.type_id != expected {
            return Err(Error::TypeMismatch {
                key: entry.key.clone(),
                expected: expected.to_string(),
                found: entry.type_id.clone(),
            });
        }
        self.inner
            .codec
            .decode(&entry.payload)
            .map_err(|e| Error::Decode {
                key: entry.key.clone(),
                message: e.to_string(),
            })
    }

    /// Apply the mismatch policy: `Ok` after evicting, or the error itself
    async fn handle_undecodable(&self, entry: &CacheEntry, error: Error) -> Result<()> {
        match self.inner.mismatch {
            MismatchPolicy::Error => Err(error),
            MismatchPolicy::Evict => {
                warn!(key = %entry.key, error = %error, "Evicting undecodable cache entry");
                self.evict_exact(entry).await
            }
        }
    }

    /// Delete `entry` only if it has not been rewritten since it was read
    async fn evict_exact(&self, entry: &CacheEntry) -> Result<()> {
        let seen = entry.clone();
        self.inner
            .store
            .delete_if(entry.key.clone(), move |current| *current == seen)
            .await?;
        Ok(())
    }
}

impl<T, C> Cache<T, C>
where
    T: Send + Sync + 'static,
    C: PayloadCodec<T> + 'static,
{
    /// Read `key`, fetching and storing a new value when needed.
    ///
    /// - fresh entry: returned as is
    /// - expired less than the stale window ago: returned immediately while
    ///   `fetch` runs on a background task and replaces it
    /// - missing, undecodable, or older than the window: `fetch` runs inline
    ///   and its value is stored and returned
    ///
    /// Must be called within a Tokio runtime when a stale window is set.
    pub async fn get_or_refresh<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(entry) = self.inner.store.read(key).await? {
            let now = self.now();
            match self.decode(&entry) {
                Ok(value) if !entry.is_expired(now) => return Ok(value),
                Ok(value) if self.within_stale_window(&entry, now) => {
                    self.spawn_refresh(key, fetch);
                    return Ok(value);
                }
                Ok(_) => {}
                Err(e) => self.handle_undecodable(&entry, e).await?,
            }
        }

        let value = fetch().await?;
        self.set(key, &value).await?;
        Ok(value)
    }

    fn within_stale_window(&self, entry: &CacheEntry, now: i64) -> bool {
        let window = duration_ms(self.inner.stale_window);
        window > 0
            && entry
                .expires_at_ms
                .is_some_and(|at| now < at.saturating_add(window))
    }

    fn spawn_refresh<F, Fut>(&self, key: &str, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.inner.refreshing.lock().insert(key.to_string()) {
            debug!(key, "Refresh already in flight");
            return;
        }

        let guard = RefreshGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
        };
        let cache = self.clone();
        tokio::spawn(async move {
            let key = guard.key.as_str();
            match fetch().await {
                Ok(value) => {
                    if let Err(e) = cache.set(key, &value).await {
                        warn!(key, error = %e, "Failed to store refreshed value");
                    }
                }
                Err(e) => warn!(key, error = %e, "Background refresh failed"),
            }
        });
    }
}

/// Clears a key's in-flight marker when its refresh task ends, even by panic
struct RefreshGuard<C> {
    inner: Arc<Inner<C>>,
    key: String,
}

impl<C> Drop for RefreshGuard<C> {
    fn drop(&mut self) {
        self.inner.refreshing.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonCodec;

    #[test]
    fn test_write_options_collect_tags() {
        let options = WriteOptions::new()
            .tag("a")
            .tags(["b", "c"])
            .ttl(Duration::from_secs(1));
        assert_eq!(options.tags.len(), 3);
        assert_eq!(options.ttl, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_location_setters_replace_explicit_path() {
        let builder = Cache::<String, _>::builder(JsonCodec::<String>::new())
            .path("/explicit/cache.json")
            .file_name("other.json");
        assert!(matches!(
            builder.target,
            Target::Location { ref file_name, .. } if file_name == "other.json"
        ));
    }

    #[test]
    fn test_build_rejects_invalid_file_name() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = Cache::<String, _>::builder(JsonCodec::<String>::new())
            .location(StorageLocation::Custom(temp_dir.path().to_path_buf()))
            .file_name("../escape.json")
            .build();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }
}
