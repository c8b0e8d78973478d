use std::collections::HashMap;
use std::sync::Mutex;

use super::{Cache, CacheKey, CacheValue};
use crate::core::Result;

/// Unbounded map; the base of every decorator chain.
pub struct PerpetualCache {
    id: String,
    entries: Mutex<HashMap<CacheKey, CacheValue>>,
}

impl PerpetualCache {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Cache for PerpetualCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        self.entries.lock()?.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        Ok(self.entries.lock()?.remove(key))
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock()?.clear();
        Ok(())
    }

    fn size(&self) -> Result<usize> {
        Ok(self.entries.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_get_remove() {
        let cache = PerpetualCache::new("users");
        let mut key = CacheKey::new();
        key.update("a");
        key.update(1i64);

        cache.put(key.clone(), CacheValue::List(Arc::new(Vec::new()))).unwrap();
        assert_eq!(cache.size().unwrap(), 1);
        assert!(cache.get(&key).unwrap().is_some());
        assert!(cache.remove(&key).unwrap().is_some());
        assert!(cache.get(&key).unwrap().is_none());
    }
}
