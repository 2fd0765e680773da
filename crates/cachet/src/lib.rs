//! Typed, tag-aware persistent cache for cachet
//!
//! A [`Cache`] stores values of one type in a single JSON file managed by
//! [`cachet_store::FileStore`]. On top of the engine it adds:
//! - Typed values through a [`PayloadCodec`] (serde by default via [`JsonCodec`])
//! - Expiry from a [`TtlPolicy`] judged against a pluggable [`Clock`]
//! - Tag-based invalidation
//! - Stale-while-revalidate reads with [`Cache::get_or_refresh`]
//!
//! # Example
//!
//! ```no_run
//! use cachet::{Cache, FixedTtl, JsonCodec, StorageLocation, WriteOptions};
//! use std::time::Duration;
//!
//! # async fn demo() -> cachet::Result<()> {
//! let cache = Cache::builder(JsonCodec::<String>::with_type_id("greeting/v1"))
//!     .location(StorageLocation::Cache)
//!     .app_name("myapp")
//!     .ttl_policy(FixedTtl(Duration::from_secs(300)))
//!     .build()?;
//!
//! cache
//!     .set_with("en", &"hello".to_string(), WriteOptions::new().tag("ui"))
//!     .await?;
//! assert_eq!(cache.get("en").await?.as_deref(), Some("hello"));
//!
//! cache.invalidate_tag("ui").await?;
//! assert_eq!(cache.get("en").await?, None);
//! # Ok(())
//! # }
//! ```

#![expect(
    clippy::missing_errors_doc,
    reason = "Every fallible operation returns the crate Error; variants are documented there"
)]

mod cache;
pub mod clock;
pub mod codec;
mod error;
pub mod location;
pub mod ttl;

pub use cache::{
    Cache, CacheBuilder, DEFAULT_APP_NAME, DEFAULT_FILE_NAME, MismatchPolicy, WriteOptions,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CodecError, JsonCodec, PayloadCodec};
pub use error::{Error, Result};
pub use location::{DIR_OVERRIDE_ENV, LocationInputs, StorageLocation};
pub use ttl::{FixedTtl, NoExpiry, TtlPolicy};

pub use cachet_store;
