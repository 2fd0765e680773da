//! Crash-safe single-file document store for cachet
//!
//! This crate is the storage engine underneath the `cachet` cache:
//! - One JSON document per cache file, holding every entry and a reverse
//!   tag index
//! - Atomic replacement of that file via temp-write, backup, rename
//! - Recovery of a corrupt file from its backup or staging copy
//! - A FIFO serializer so that operations on one store never interleave
//!
//! # Overview
//!
//! ```no_run
//! use cachet_store::{CacheEntry, FileStore};
//! use serde_json::json;
//!
//! # async fn demo() -> cachet_store::Result<()> {
//! let store = FileStore::open("/tmp/app/cache.json");
//! store
//!     .write(CacheEntry::new("greeting", "text/v1", json!("hello"), 0).with_tags(["ui"]))
//!     .await?;
//! assert!(store.keys_by_tag("ui").await?.contains("greeting"));
//! # Ok(())
//! # }
//! ```
//!
//! Payloads are opaque: the store never interprets `type_id` or `payload`.
//! Expiry timestamps are stored but only [`FileStore::purge_expired`] acts on
//! them; deciding whether a value read back is still fresh belongs to the
//! caller.

#![expect(
    clippy::missing_errors_doc,
    reason = "Every fallible operation returns the crate Error; variants are documented there"
)]

pub mod document;
mod error;
pub mod index;
pub mod layout;
pub mod queue;
pub mod recovery;
mod store;
pub mod writer;

pub use document::{CURRENT_SCHEMA_VERSION, CacheDocument, CacheEntry, DecodeError};
pub use error::{Error, Result};
pub use index::TagIndexViolation;
pub use layout::FileLayout;
pub use queue::OperationQueue;
pub use recovery::{LoadSource, RecoveryLoader};
pub use store::{FileStore, StoreBuilder};
pub use writer::{AtomicWriter, BackupOutcome};
