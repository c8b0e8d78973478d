use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::{Cache, CacheKey, CacheValue};
use crate::core::{DbError, Result};

/// At most one concurrent materialization per key.
///
/// A `get` takes the key's lock and keeps it on a miss, so other sessions
/// asking for the same key wait until a value is put (or the miss is released
/// through `remove`), from whichever thread. A hit releases immediately. Locks
/// are not counted and the thread that took one may take it again as a no-op.
pub struct BlockingCache {
    delegate: Arc<dyn Cache>,
    timeout: Option<Duration>,
    locks: Mutex<HashMap<CacheKey, ThreadId>>,
    released: Condvar,
}

impl BlockingCache {
    pub fn new(delegate: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            timeout: None,
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn acquire_lock(&self, key: &CacheKey) -> Result<()> {
        let me = thread::current().id();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut locks = self.locks.lock()?;
        loop {
            match locks.get(key) {
                None => {
                    locks.insert(key.clone(), me);
                    return Ok(());
                }
                Some(owner) if *owner == me => return Ok(()),
                Some(_) => {}
            }
            locks = match deadline {
                None => self.released.wait(locks)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.timeout_error(key));
                    }
                    self.released.wait_timeout(locks, deadline - now)?.0
                }
            };
        }
    }

    /// Releases the key whichever thread calls; the owner only matters for
    /// re-acquiring.
    fn release_lock(&self, key: &CacheKey) -> Result<()> {
        let mut locks = self.locks.lock()?;
        if locks.remove(key).is_some() {
            self.released.notify_all();
        }
        Ok(())
    }

    fn timeout_error(&self, key: &CacheKey) -> DbError {
        DbError::CacheTimeout(format!(
            "Couldn't get a lock in {:?} for the key {} at the cache {}",
            self.timeout.unwrap_or_default(),
            key,
            self.delegate.id()
        ))
    }
}

impl Cache for BlockingCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        let outcome = self.delegate.put(key.clone(), value);
        self.release_lock(&key)?;
        outcome
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.acquire_lock(key)?;
        let value = self.delegate.get(key)?;
        if value.is_some() {
            self.release_lock(key)?;
        }
        Ok(value)
    }

    /// Only releases the lock; the entry stays.
    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.release_lock(key)?;
        Ok(None)
    }

    fn clear(&self) -> Result<()> {
        self.delegate.clear()
    }

    fn size(&self) -> Result<usize> {
        self.delegate.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PerpetualCache;

    fn key() -> CacheKey {
        let mut k = CacheKey::new();
        k.update("q");
        k.update(1i64);
        k
    }

    #[test]
    fn test_miss_blocks_other_thread_until_put() {
        let cache = Arc::new(BlockingCache::new(Arc::new(PerpetualCache::new("b"))));
        assert!(cache.get(&key()).unwrap().is_none());

        let waiter = {
            let cache = cache.clone();
            thread::spawn(move || cache.get(&key()).unwrap().is_some())
        };
        thread::sleep(Duration::from_millis(50));
        cache.put(key(), CacheValue::List(Arc::new(Vec::new()))).unwrap();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_timeout_is_distinct_error() {
        let cache = Arc::new(
            BlockingCache::new(Arc::new(PerpetualCache::new("b")))
                .with_timeout(Duration::from_millis(30)),
        );
        assert!(cache.get(&key()).unwrap().is_none());

        let other = {
            let cache = cache.clone();
            thread::spawn(move || cache.get(&key()))
        };
        let err = other.join().unwrap().unwrap_err();
        assert!(err.is_cache_timeout());
    }

    #[test]
    fn test_put_from_another_thread_releases_the_lock() {
        let cache = Arc::new(
            BlockingCache::new(Arc::new(PerpetualCache::new("b")))
                .with_timeout(Duration::from_millis(200)),
        );
        assert!(cache.get(&key()).unwrap().is_none());

        {
            let cache = cache.clone();
            thread::spawn(move || cache.put(key(), CacheValue::List(Arc::new(Vec::new()))))
                .join()
                .unwrap()
                .unwrap();
        }
        let reader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get(&key()))
        };
        assert!(reader.join().unwrap().unwrap().is_some());
    }

    #[test]
    fn test_remove_from_another_thread_releases_the_lock() {
        let cache = Arc::new(
            BlockingCache::new(Arc::new(PerpetualCache::new("b")))
                .with_timeout(Duration::from_millis(200)),
        );
        assert!(cache.get(&key()).unwrap().is_none());

        {
            let cache = cache.clone();
            thread::spawn(move || cache.remove(&key())).join().unwrap().unwrap();
        }
        let reader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get(&key()))
        };
        assert!(reader.join().unwrap().unwrap().is_none());
    }

    #[test]
    fn test_owner_reacquires_without_blocking() {
        let cache = BlockingCache::new(Arc::new(PerpetualCache::new("b")));
        assert!(cache.get(&key()).unwrap().is_none());
        assert!(cache.get(&key()).unwrap().is_none());
        cache.remove(&key()).unwrap();
    }
}
