use crate::cache::{CacheLookup, CacheTtl, ResolutionCache};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use jiff::Timestamp;

#[derive(Debug, Clone)]
struct Entry {
    locator: Option<String>,
    expires_at: Timestamp,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }
}

/// In-memory implementation of [`ResolutionCache`] using DashMap.
///
/// Used in execution contexts without a durable store and in tests.
/// DashMap's sharded locks let concurrent reads and writes to different
/// buckets proceed without blocking each other.
#[derive(Debug)]
pub struct InMemoryResolutionCache {
    entries: DashMap<String, Entry>,
    ttl: CacheTtl,
}

impl InMemoryResolutionCache {
    pub fn new() -> Self {
        Self::with_ttl(CacheTtl::default())
    }

    pub fn with_ttl(ttl: CacheTtl) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Number of live entries, expired rows included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryResolutionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolutionCache for InMemoryResolutionCache {
    async fn get(&self, id: &str) -> Result<CacheLookup> {
        let Some(entry) = self.entries.get(id) else {
            return Ok(CacheLookup::Miss);
        };

        if entry.is_expired() {
            drop(entry);
            self.entries.remove(id);
            return Ok(CacheLookup::Miss);
        }

        Ok(CacheLookup::Hit(entry.locator.clone()))
    }

    async fn put(&self, id: &str, locator: Option<&str>) -> Result<()> {
        let entry = Entry {
            locator: locator.map(str::to_owned),
            expires_at: self.ttl.expires_at(locator)?,
        };
        self.entries.insert(id.to_owned(), entry);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
