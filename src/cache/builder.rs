use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use super::{BlockingCache, Cache, LoggingCache, LruCache, PerpetualCache, ScheduledCache, SoftCache};
use crate::core::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eviction {
    #[default]
    Lru,
    Soft,
    None,
}

/// Composes a namespace cache from its decorators.
///
/// ```
/// use rustsqlmap::cache::{Cache, CacheBuilder, Eviction};
///
/// let cache = CacheBuilder::new("users")
///     .eviction(Eviction::Lru)
///     .size(512)
///     .blocking(true)
///     .build()
///     .unwrap();
/// assert_eq!(cache.id(), "users");
/// ```
#[derive(Debug, Clone)]
pub struct CacheBuilder {
    id: String,
    eviction: Eviction,
    size: Option<usize>,
    flush_interval: Option<Duration>,
    blocking: bool,
    lock_timeout: Option<Duration>,
    logging: bool,
}

impl CacheBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            eviction: Eviction::Lru,
            size: None,
            flush_interval: None,
            blocking: false,
            lock_timeout: None,
            logging: true,
        }
    }

    pub fn eviction(mut self, eviction: Eviction) -> Self {
        self.eviction = eviction;
        self
    }

    /// Capacity of the LRU policy, or hard-link window of the soft policy.
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Implies blocking.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.blocking = true;
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    pub fn build(self) -> Result<Arc<dyn Cache>> {
        if self.id.is_empty() {
            return Err(DbError::Configuration("Cache id must not be empty".into()));
        }

        let mut cache: Arc<dyn Cache> = Arc::new(PerpetualCache::new(self.id.clone()));

        cache = match self.eviction {
            Eviction::Lru => match self.size {
                Some(size) => {
                    let size = NonZeroUsize::new(size).ok_or_else(|| {
                        DbError::Configuration(format!("Cache '{}' size must be positive", self.id))
                    })?;
                    Arc::new(LruCache::with_size(cache, size))
                }
                None => Arc::new(LruCache::new(cache)),
            },
            Eviction::Soft => match self.size {
                Some(size) => Arc::new(SoftCache::with_hard_links(cache, size)),
                None => Arc::new(SoftCache::new(cache)),
            },
            Eviction::None => cache,
        };

        if let Some(interval) = self.flush_interval {
            cache = Arc::new(ScheduledCache::new(cache, interval));
        }
        if self.logging {
            cache = Arc::new(LoggingCache::new(cache));
        }
        if self.blocking {
            let mut blocking = BlockingCache::new(cache);
            if let Some(timeout) = self.lock_timeout {
                blocking = blocking.with_timeout(timeout);
            }
            cache = Arc::new(blocking);
        }

        Ok(cache)
    }
}
