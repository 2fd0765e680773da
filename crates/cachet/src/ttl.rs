//! Expiry policies applied when a value is written.

use crate::clock::duration_ms;
use std::time::Duration;

/// Decides when a freshly written entry expires
pub trait TtlPolicy: Send + Sync {
    /// Expiry in epoch milliseconds for `key` written at `now_ms`; `None` never expires
    fn expires_at(&self, key: &str, now_ms: i64) -> Option<i64>;
}

/// Entries never expire
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpiry;

impl TtlPolicy for NoExpiry {
    fn expires_at(&self, _key: &str, _now_ms: i64) -> Option<i64> {
        None
    }
}

/// Every entry lives for the same duration
#[derive(Debug, Clone, Copy)]
pub struct FixedTtl(pub Duration);

impl TtlPolicy for FixedTtl {
    fn expires_at(&self, _key: &str, now_ms: i64) -> Option<i64> {
        Some(now_ms.saturating_add(duration_ms(self.0)))
    }
}
