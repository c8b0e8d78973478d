use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{Cache, CacheKey, CacheValue};
use crate::core::Result;

/// Clears the delegate once `interval` has passed since the last clear.
/// The check runs on every access; there is no background timer.
pub struct ScheduledCache {
    delegate: Arc<dyn Cache>,
    interval: Duration,
    last_clear: Mutex<Instant>,
}

impl ScheduledCache {
    pub fn new(delegate: Arc<dyn Cache>, interval: Duration) -> Self {
        Self {
            delegate,
            interval,
            last_clear: Mutex::new(Instant::now()),
        }
    }

    fn clear_when_stale(&self) -> Result<bool> {
        let mut last_clear = self.last_clear.lock()?;
        if last_clear.elapsed() >= self.interval {
            self.delegate.clear()?;
            *last_clear = Instant::now();
            return Ok(true);
        }
        Ok(false)
    }
}

impl Cache for ScheduledCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        self.clear_when_stale()?;
        self.delegate.put(key, value)
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        if self.clear_when_stale()? {
            return Ok(None);
        }
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.clear_when_stale()?;
        self.delegate.remove(key)
    }

    fn clear(&self) -> Result<()> {
        *self.last_clear.lock()? = Instant::now();
        self.delegate.clear()
    }

    fn size(&self) -> Result<usize> {
        self.clear_when_stale()?;
        self.delegate.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PerpetualCache;

    #[test]
    fn test_entries_expire_after_interval() {
        let cache = ScheduledCache::new(
            Arc::new(PerpetualCache::new("s")),
            Duration::from_millis(20),
        );
        let mut key = CacheKey::new();
        key.update("q");
        key.update(1i64);
        cache.put(key.clone(), CacheValue::Null).unwrap();
        assert_eq!(cache.size().unwrap(), 1);

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&key).unwrap().is_none());
        assert_eq!(cache.size().unwrap(), 0);
    }
}
