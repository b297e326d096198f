use crate::error::{CacheError, Result};
use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use std::time::Duration;

/// Outcome of a cache read.
///
/// Distinguishes "no entry" from a cached negative: a [`CacheLookup::Miss`]
/// means the id has not been resolved yet (or the entry expired), while
/// `Hit(None)` means a backend definitively reported no locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// No entry, or the entry had expired.
    Miss,
    /// An entry exists: `Some(locator)` is a positive result, `None` a
    /// cached negative.
    Hit(Option<String>),
}

impl CacheLookup {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }
}

/// Time-to-live policy for cache entries.
///
/// The positive TTL is much longer than the negative one: a found mapping
/// is expected to stay stable, while a "not found" may become "found" once
/// the remote index catches up. Both values are empirical configuration,
/// not invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub positive: Duration,
    pub negative: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            positive: Duration::from_secs(15 * 24 * 60 * 60),
            negative: Duration::from_secs(60 * 60),
        }
    }
}

impl CacheTtl {
    /// Expiry instant for a value cached now.
    pub(crate) fn expires_at(&self, locator: Option<&str>) -> Result<Timestamp> {
        let ttl = if locator.is_some() {
            self.positive
        } else {
            self.negative
        };
        let ttl = SignedDuration::try_from(ttl)
            .map_err(|e| CacheError::InvalidData(format!("ttl out of range: {e}")))?;
        Timestamp::now()
            .checked_add(ttl)
            .map_err(|e| CacheError::InvalidData(format!("expiry out of range: {e}")))
    }
}

/// Durable memoization of external id → locator results.
///
/// Shared by every caller in an execution context. Concurrent `put`s for
/// the same key are last-write-wins; entries are only ever overwritten
/// whole or evicted, never partially updated.
#[async_trait]
pub trait ResolutionCache: Send + Sync + 'static {
    /// Looks up a cached resolution.
    ///
    /// Expiry is checked lazily here, not only by the background sweep: an
    /// expired entry is reported as [`CacheLookup::Miss`] and dropped.
    async fn get(&self, id: &str) -> Result<CacheLookup>;

    /// Records a resolution, overwriting any previous entry.
    ///
    /// `None` stores an explicit negative with the shorter TTL.
    async fn put(&self, id: &str, locator: Option<&str>) -> Result<()>;

    /// Drops every entry. The store is empty when this returns.
    async fn clear_all(&self) -> Result<()>;

    /// Bulk-evicts expired entries, returning how many were removed.
    ///
    /// Run at store initialization to bound growth; lazy checks in
    /// [`ResolutionCache::get`] are what guarantee correctness.
    async fn sweep_expired(&self) -> Result<u64>;
}
