use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Cache, CacheKey, CacheValue};
use crate::core::Result;

/// Logs the running hit ratio on every lookup.
pub struct LoggingCache {
    delegate: Arc<dyn Cache>,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl LoggingCache {
    pub fn new(delegate: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn hit_ratio(&self) -> f64 {
        let requests = self.requests.load(Ordering::Relaxed);
        if requests == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f64 / requests as f64
    }
}

impl Cache for LoggingCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        self.delegate.put(key, value)
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let value = self.delegate.get(key)?;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        debug!("Cache Hit Ratio [{}]: {}", self.id(), self.hit_ratio());
        Ok(value)
    }

    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.delegate.remove(key)
    }

    fn clear(&self) -> Result<()> {
        self.delegate.clear()
    }

    fn size(&self) -> Result<usize> {
        self.delegate.size()
    }
}
