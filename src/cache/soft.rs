use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{Cache, CacheKey, CacheValue};
use crate::core::Result;
use crate::object::ResultList;

pub const DEFAULT_HARD_LINKS: usize = 256;

/// Holds lists weakly: an entry survives while some session still holds the
/// list or while it sits in the bounded window of recently touched lists.
pub struct SoftCache {
    delegate: Arc<dyn Cache>,
    hard_links: Mutex<VecDeque<ResultList>>,
    hard_link_capacity: usize,
}

impl SoftCache {
    pub fn new(delegate: Arc<dyn Cache>) -> Self {
        Self::with_hard_links(delegate, DEFAULT_HARD_LINKS)
    }

    pub fn with_hard_links(delegate: Arc<dyn Cache>, capacity: usize) -> Self {
        Self {
            delegate,
            hard_links: Mutex::new(VecDeque::new()),
            hard_link_capacity: capacity,
        }
    }

    fn retain(&self, list: &ResultList) -> Result<()> {
        let mut links = self.hard_links.lock()?;
        links.push_front(list.clone());
        links.truncate(self.hard_link_capacity);
        Ok(())
    }
}

impl Cache for SoftCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        match value {
            CacheValue::List(list) => {
                self.retain(&list)?;
                self.delegate.put(key, CacheValue::Soft(Arc::downgrade(&list)))
            }
            other => self.delegate.put(key, other),
        }
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        match self.delegate.get(key)? {
            Some(CacheValue::Soft(weak)) => match weak.upgrade() {
                Some(list) => {
                    self.retain(&list)?;
                    Ok(Some(CacheValue::List(list)))
                }
                None => {
                    self.delegate.remove(key)?;
                    Ok(None)
                }
            },
            other => Ok(other),
        }
    }

    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.delegate.remove(key)
    }

    fn clear(&self) -> Result<()> {
        self.hard_links.lock()?.clear();
        self.delegate.clear()
    }

    fn size(&self) -> Result<usize> {
        self.delegate.size()
    }
}
