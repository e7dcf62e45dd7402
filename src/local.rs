//! Local cache tier
//!
//! The notifier evicts from local caches through this trait; any in-process
//! cache keyed by normalized key strings can participate. Eviction must be
//! idempotent since broadcast delivery can duplicate events.

use async_trait::async_trait;

use crate::error::CacheResult;

/// An in-process cache that invalidation events evict from.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Removes the entry for a normalized key. Absent keys are a no-op.
    async fn evict(&self, key: &str) -> CacheResult<()>;

    /// Removes every entry.
    async fn evict_all(&self) -> CacheResult<()>;
}

/// [`LocalCache`] backed by a moka future cache.
pub struct MokaLocalCache<V> {
    inner: moka::future::Cache<String, V>,
}

impl<V> MokaLocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(inner: moka::future::Cache<String, V>) -> Self {
        Self { inner }
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            inner: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .build(),
        }
    }

    /// The underlying moka cache, for reads and writes.
    pub fn inner(&self) -> &moka::future::Cache<String, V> {
        &self.inner
    }
}

#[async_trait]
impl<V> LocalCache for MokaLocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn evict(&self, key: &str) -> CacheResult<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn evict_all(&self) -> CacheResult<()> {
        self.inner.invalidate_all();
        Ok(())
    }
}
