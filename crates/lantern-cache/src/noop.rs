use crate::cache::{CacheLookup, ResolutionCache};
use crate::error::Result;
use async_trait::async_trait;

/// Cache for execution contexts without a persistent store.
///
/// Every read misses and every write is accepted and dropped, so
/// resolution keeps functioning without memoization and callers never see
/// a storage error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolutionCache;

#[async_trait]
impl ResolutionCache for NoopResolutionCache {
    async fn get(&self, _id: &str) -> Result<CacheLookup> {
        Ok(CacheLookup::Miss)
    }

    async fn put(&self, _id: &str, _locator: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64> {
        Ok(0)
    }
}
