// ============================================================================
// Shared Cache
// ============================================================================
//
// Every cache implements one interface. Eviction and concurrency policies are
// decorators that wrap another cache and are composed by CacheBuilder:
//
//   Perpetual -> (Lru | Soft) -> Scheduled -> Logging -> Blocking
//
// Stored values are materialized result lists. The soft decorator stores weak
// handles in its delegate, which is why entries are a small enum rather than
// the list itself. A `Null` entry is a stored "no result" marker, distinct
// from an absent key.
//
// ============================================================================

mod blocking;
mod builder;
mod key;
mod logging;
mod lru;
mod perpetual;
mod scheduled;
mod soft;
mod transactional;

pub use blocking::BlockingCache;
pub use builder::{CacheBuilder, Eviction};
pub use key::{CacheKey, KeyPart};
pub use logging::LoggingCache;
pub use self::lru::LruCache;
pub use perpetual::PerpetualCache;
pub use scheduled::ScheduledCache;
pub use soft::SoftCache;
pub use transactional::{TransactionalCache, TransactionalCacheManager};

use std::sync::Weak;

use crate::core::Result;
use crate::object::{Node, ResultList};

#[derive(Debug, Clone)]
pub enum CacheValue {
    Null,
    List(ResultList),
    Soft(Weak<Vec<Node>>),
}

impl CacheValue {
    /// The live list behind this entry, if any.
    pub fn into_list(self) -> Option<ResultList> {
        match self {
            CacheValue::Null => None,
            CacheValue::List(list) => Some(list),
            CacheValue::Soft(weak) => weak.upgrade(),
        }
    }
}

pub trait Cache: Send + Sync {
    fn id(&self) -> &str;
    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()>;
    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>>;
    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>>;
    fn clear(&self) -> Result<()>;
    fn size(&self) -> Result<usize>;
}

impl std::fmt::Debug for dyn Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cache({})", self.id())
    }
}
