use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::core::Value;

const DEFAULT_MULTIPLIER: i64 = 37;
const DEFAULT_HASHCODE: i64 = 17;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Value(Value),
    Key(Box<CacheKey>),
}

/// Ordered, content-addressed fingerprint of a query invocation.
///
/// Every `update` folds one part into a running hash and checksum and appends
/// it to the part list. Two keys are equal only when the hash, checksum, count
/// and every part in order are equal. A key with fewer than two parts is
/// treated as null and is never cached.
#[derive(Debug, Clone)]
pub struct CacheKey {
    multiplier: i64,
    hashcode: i64,
    checksum: i64,
    count: usize,
    update_list: Vec<KeyPart>,
}

impl CacheKey {
    pub fn new() -> Self {
        Self {
            multiplier: DEFAULT_MULTIPLIER,
            hashcode: DEFAULT_HASHCODE,
            checksum: 0,
            count: 0,
            update_list: Vec::new(),
        }
    }

    /// Key that never matches a cached entry.
    pub fn null() -> Self {
        Self::new()
    }

    pub fn is_null(&self) -> bool {
        self.count < 2
    }

    pub fn update_count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, part: impl Into<Value>) {
        let value = part.into();
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        self.fold(hasher.finish() as i64);
        self.update_list.push(KeyPart::Value(value));
    }

    /// Folds another key in as a single part.
    pub fn update_key(&mut self, other: &CacheKey) {
        self.fold(other.hashcode);
        self.update_list.push(KeyPart::Key(Box::new(other.clone())));
    }

    /// `self` extended with `parent`, or the null key when either side is null.
    pub fn combine(&self, parent: &CacheKey) -> CacheKey {
        if self.count > 1 && parent.count > 1 {
            let mut combined = self.clone();
            combined.update_key(parent);
            combined
        } else {
            CacheKey::null()
        }
    }

    fn fold(&mut self, base_hash: i64) {
        self.count += 1;
        self.checksum = self.checksum.wrapping_add(base_hash);
        let base_hash = base_hash.wrapping_mul(self.count as i64);
        self.hashcode = self
            .multiplier
            .wrapping_mul(self.hashcode)
            .wrapping_add(base_hash);
    }
}

impl Default for CacheKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hashcode == other.hashcode
            && self.checksum == other.checksum
            && self.count == other.count
            && self.update_list == other.update_list
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hashcode.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hashcode, self.checksum)?;
        for part in &self.update_list {
            match part {
                KeyPart::Value(v) => write!(f, ":{}", v)?,
                KeyPart::Key(k) => write!(f, ":[{}]", k)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(key: &CacheKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_identical_keys_are_equal() {
        let mut a = CacheKey::new();
        let mut b = CacheKey::new();
        for key in [&mut a, &mut b] {
            key.update("selectUser");
            key.update(0i64);
            key.update(Value::Null);
        }
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_order_sensitive() {
        let mut a = CacheKey::new();
        a.update("selectUser");
        a.update(1i64);
        a.update(2i64);
        let mut b = CacheKey::new();
        b.update("selectUser");
        b.update(2i64);
        b.update(1i64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_sensitive() {
        let mut a = CacheKey::new();
        a.update("selectUser");
        a.update(1i64);
        let mut b = CacheKey::new();
        b.update("selectUser");
        b.update("1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_null_key_and_combine() {
        let mut single = CacheKey::new();
        single.update("only");
        assert!(single.is_null());

        let mut parent = CacheKey::new();
        parent.update("parent");
        parent.update(1i64);
        assert!(single.combine(&parent).is_null());

        let mut child = CacheKey::new();
        child.update("child");
        child.update(10i64);
        let combined = child.combine(&parent);
        assert_eq!(combined.update_count(), 3);
        assert_ne!(combined, child);
    }
}
