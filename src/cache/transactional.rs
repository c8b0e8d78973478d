// ============================================================================
// Transactional Cache Buffer
// ============================================================================
//
// Per (shared cache, session transaction) buffer:
//
//   get      -> reads the shared cache directly, records misses
//   put      -> pending buffer only
//   clear    -> marks the shared cache for clearing at commit
//   commit   -> clear if marked, flush pending, put NULL for unresolved misses
//   rollback -> release every recorded miss, drop pending
//
// Writing NULL for a miss at commit and removing it at rollback are what
// release a blocking decorator's per-key lock.
//
// ============================================================================

use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{Cache, CacheKey, CacheValue};
use crate::core::Result;
use crate::object::ResultList;

pub struct TransactionalCache {
    delegate: Arc<dyn Cache>,
    clear_on_commit: bool,
    entries_to_add_on_commit: HashMap<CacheKey, ResultList>,
    entries_missed_in_cache: HashSet<CacheKey>,
}

impl TransactionalCache {
    pub fn new(delegate: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            clear_on_commit: false,
            entries_to_add_on_commit: HashMap::new(),
            entries_missed_in_cache: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.delegate.id()
    }

    pub fn get(&mut self, key: &CacheKey) -> Result<Option<ResultList>> {
        let value = self.delegate.get(key)?;
        let list = value.and_then(CacheValue::into_list);
        if list.is_none() {
            self.entries_missed_in_cache.insert(key.clone());
        }
        if self.clear_on_commit {
            return Ok(None);
        }
        Ok(list)
    }

    pub fn put(&mut self, key: CacheKey, value: ResultList) {
        self.entries_to_add_on_commit.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.clear_on_commit = true;
        self.entries_to_add_on_commit.clear();
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.clear_on_commit {
            self.delegate.clear()?;
        }
        let outcome = self.flush_pending_entries();
        self.reset();
        outcome
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.unlock_missed_entries();
        self.reset();
        Ok(())
    }

    fn flush_pending_entries(&mut self) -> Result<()> {
        for (key, value) in &self.entries_to_add_on_commit {
            self.delegate.put(key.clone(), CacheValue::List(value.clone()))?;
        }
        for key in &self.entries_missed_in_cache {
            if !self.entries_to_add_on_commit.contains_key(key) {
                self.delegate.put(key.clone(), CacheValue::Null)?;
            }
        }
        debug!("Flushed transactional cache [{}]", self.delegate.id());
        Ok(())
    }

    fn unlock_missed_entries(&mut self) {
        for key in &self.entries_missed_in_cache {
            if let Err(e) = self.delegate.remove(key) {
                warn!(
                    "Unexpected exception while notifying a rollback to the cache adapter. \
                     Consider upgrading your cache adapter to the latest version. Cause: {}",
                    e
                );
            }
        }
    }

    fn reset(&mut self) {
        self.clear_on_commit = false;
        self.entries_to_add_on_commit.clear();
        self.entries_missed_in_cache.clear();
    }
}

/// One buffer per shared cache touched by a session, keyed by cache id.
#[derive(Default)]
pub struct TransactionalCacheManager {
    caches: HashMap<String, TransactionalCache>,
}

impl TransactionalCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&mut self, cache: &Arc<dyn Cache>) -> &mut TransactionalCache {
        self.caches
            .entry(cache.id().to_string())
            .or_insert_with(|| TransactionalCache::new(cache.clone()))
    }

    pub fn clear(&mut self, cache: &Arc<dyn Cache>) {
        self.buffer(cache).clear();
    }

    pub fn get(&mut self, cache: &Arc<dyn Cache>, key: &CacheKey) -> Result<Option<ResultList>> {
        self.buffer(cache).get(key)
    }

    pub fn put(&mut self, cache: &Arc<dyn Cache>, key: CacheKey, value: ResultList) {
        self.buffer(cache).put(key, value);
    }

    /// Commits every buffer; the first failure is returned after all ran.
    pub fn commit(&mut self) -> Result<()> {
        let mut first_error = None;
        for buffer in self.caches.values_mut() {
            if let Err(e) = buffer.commit() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn rollback(&mut self) -> Result<()> {
        for buffer in self.caches.values_mut() {
            buffer.rollback()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PerpetualCache;
    use crate::object::Node;

    fn key(n: i64) -> CacheKey {
        let mut k = CacheKey::new();
        k.update("q");
        k.update(n);
        k
    }

    fn list(v: i64) -> ResultList {
        Arc::new(vec![Node::from(v)])
    }

    #[test]
    fn test_put_visible_only_after_commit() {
        let shared: Arc<dyn Cache> = Arc::new(PerpetualCache::new("c"));
        let mut tx = TransactionalCache::new(shared.clone());

        assert!(tx.get(&key(1)).unwrap().is_none());
        tx.put(key(1), list(1));
        assert!(tx.get(&key(1)).unwrap().is_none());
        assert!(shared.get(&key(1)).unwrap().is_none());

        tx.commit().unwrap();
        assert!(shared.get(&key(1)).unwrap().is_some());
    }

    #[test]
    fn test_commit_writes_null_for_unresolved_misses() {
        let shared: Arc<dyn Cache> = Arc::new(PerpetualCache::new("c"));
        let mut tx = TransactionalCache::new(shared.clone());
        assert!(tx.get(&key(2)).unwrap().is_none());
        tx.commit().unwrap();
        assert!(matches!(shared.get(&key(2)).unwrap(), Some(CacheValue::Null)));
    }

    #[test]
    fn test_clear_applies_on_commit_and_hides_reads() {
        let shared: Arc<dyn Cache> = Arc::new(PerpetualCache::new("c"));
        shared.put(key(1), CacheValue::List(list(1))).unwrap();

        let mut tx = TransactionalCache::new(shared.clone());
        tx.clear();
        assert!(tx.get(&key(1)).unwrap().is_none());
        assert!(shared.get(&key(1)).unwrap().is_some());

        tx.commit().unwrap();
        assert!(shared.get(&key(1)).unwrap().is_none());
    }

    #[test]
    fn test_rollback_discards_pending() {
        let shared: Arc<dyn Cache> = Arc::new(PerpetualCache::new("c"));
        let mut tcm = TransactionalCacheManager::new();
        assert!(tcm.get(&shared, &key(1)).unwrap().is_none());
        tcm.put(&shared, key(1), list(1));
        tcm.rollback().unwrap();
        tcm.commit().unwrap();
        assert!(shared.get(&key(1)).unwrap().is_none());
    }
}
