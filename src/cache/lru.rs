use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use super::{Cache, CacheKey, CacheValue};
use crate::core::{DbError, Result};

pub const DEFAULT_LRU_SIZE: usize = 1024;

/// Evicts the least recently used key from the delegate once `size` keys
/// are held.
pub struct LruCache {
    delegate: Arc<dyn Cache>,
    keys: Mutex<::lru::LruCache<CacheKey, ()>>,
}

impl LruCache {
    pub fn new(delegate: Arc<dyn Cache>) -> Self {
        Self::with_size(delegate, NonZeroUsize::new(DEFAULT_LRU_SIZE).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn with_size(delegate: Arc<dyn Cache>, size: NonZeroUsize) -> Self {
        Self {
            delegate,
            keys: Mutex::new(::lru::LruCache::new(size)),
        }
    }

    pub fn set_size(&self, size: usize) -> Result<()> {
        let size = NonZeroUsize::new(size)
            .ok_or_else(|| DbError::Configuration("LRU cache size must be positive".into()))?;
        self.keys.lock()?.resize(size);
        Ok(())
    }
}

impl Cache for LruCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        self.delegate.put(key.clone(), value)?;
        let evicted = self.keys.lock()?.push(key.clone(), ());
        if let Some((eldest, _)) = evicted {
            if eldest != key {
                self.delegate.remove(&eldest)?;
            }
        }
        Ok(())
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        // touch for recency
        self.keys.lock()?.get(key);
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.keys.lock()?.pop(key);
        self.delegate.remove(key)
    }

    fn clear(&self) -> Result<()> {
        self.keys.lock()?.clear();
        self.delegate.clear()
    }

    fn size(&self) -> Result<usize> {
        self.delegate.size()
    }
}
