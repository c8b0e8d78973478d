// ============================================================================
// Object Graph
// ============================================================================
//
// Mapped rows materialize into a dynamic graph of shared, interior-mutable
// nodes. Objects are property bags so that nested mapping can keep filling a
// parent after it was handed out, cycles between parent and child can be
// linked, and deferred loads can assign a property once the outermost query
// completes.
//
// A property slot is either resolved or a pending lazy fetch. The fetch runs
// on first read, exactly once, guarded by a lock private to that slot.
//
// ============================================================================

mod factory;

pub use factory::{DefaultObjectFactory, ObjectFactory};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::core::{DbError, Result, Value};

/// Materialized result of one query: the mapped rows in order.
pub type ResultList = Arc<Vec<Node>>;

#[derive(Clone)]
pub enum Node {
    Value(Value),
    Object(ObjectRef),
    List(ListRef),
}

impl Node {
    pub fn null() -> Self {
        Node::Value(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Node::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Node::List(l) => Some(l),
            _ => None,
        }
    }

    /// Follows a dotted property path (`address.city`). Scalars have no
    /// properties, so any path below a scalar resolves to `None`.
    pub fn get_path(&self, path: &str) -> Result<Option<Node>> {
        let mut current = self.clone();
        for segment in path.split('.') {
            let next = match &current {
                Node::Object(obj) => obj.get(segment)?,
                _ => None,
            };
            match next {
                Some(node) => current = node,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Assigns along a dotted path, creating intermediate objects when absent.
    pub fn set_path(&self, path: &str, value: Node) -> Result<()> {
        let Node::Object(root) = self else {
            return Err(DbError::TypeMismatch(format!(
                "Cannot set property '{}' on a non-object value",
                path
            )));
        };
        let mut target = root.clone();
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().unwrap_or(path);
        for segment in segments {
            target = match target.get(segment)? {
                Some(Node::Object(child)) => child,
                _ => {
                    let child = ObjectRef::new(segment);
                    target.set(segment, child.clone())?;
                    child
                }
            };
        }
        target.set(last, value)
    }

    /// Scalar behind a dotted path; NULL when anything along the way is absent.
    pub fn path_value(&self, path: &str) -> Result<Value> {
        match self.get_path(path)? {
            None => Ok(Value::Null),
            Some(Node::Value(v)) => Ok(v),
            Some(_) => Err(DbError::TypeMismatch(format!(
                "Property '{}' does not hold a scalar value",
                path
            ))),
        }
    }

    /// Exports the graph as JSON. Cycles are cut with `null` and lazy
    /// properties that were never read are left out.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = HashSet::new();
        self.to_json_inner(&mut path)
    }

    fn to_json_inner(&self, path: &mut HashSet<usize>) -> serde_json::Value {
        match self {
            Node::Value(v) => v.to_json(),
            Node::List(list) => {
                let addr = list.addr();
                if !path.insert(addr) {
                    return serde_json::Value::Null;
                }
                let items = list
                    .snapshot()
                    .iter()
                    .map(|n| n.to_json_inner(path))
                    .collect();
                path.remove(&addr);
                serde_json::Value::Array(items)
            }
            Node::Object(obj) => {
                let addr = obj.addr();
                if !path.insert(addr) {
                    return serde_json::Value::Null;
                }
                let mut map = serde_json::Map::new();
                for (name, node) in obj.resolved_properties() {
                    map.insert(name, node.to_json_inner(path));
                }
                path.remove(&addr);
                serde_json::Value::Object(map)
            }
        }
    }
}

// Scalars compare by value, objects and lists by identity.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Value(a), Node::Value(b)) => a == b,
            (Node::Object(a), Node::Object(b)) => a.ptr_eq(b),
            (Node::List(a), Node::List(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Value(v) => write!(f, "{:?}", v),
            Node::Object(o) => write!(f, "{:?}", o),
            Node::List(l) => write!(f, "{:?}", l),
        }
    }
}

impl From<Value> for Node {
    fn from(v: Value) -> Self {
        Node::Value(v)
    }
}

macro_rules! node_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Node {
                fn from(v: $ty) -> Self {
                    Node::Value(Value::from(v))
                }
            }
        )*
    };
}

node_from_scalar!(i64, i32, f64, bool, &str, String, chrono::DateTime<chrono::Utc>, uuid::Uuid);

impl From<ObjectRef> for Node {
    fn from(o: ObjectRef) -> Self {
        Node::Object(o)
    }
}

impl From<ListRef> for Node {
    fn from(l: ListRef) -> Self {
        Node::List(l)
    }
}

// ============================================================================
// Lazy slots
// ============================================================================

/// Fetch behind a lazy property.
pub trait LazyLoad: Send + Sync {
    fn load(&self) -> Result<Node>;
}

enum LazyState {
    Pending(Box<dyn LazyLoad>),
    Loaded(Node),
}

pub struct LazyValue {
    state: Mutex<LazyState>,
}

impl LazyValue {
    pub fn new(loader: impl LazyLoad + 'static) -> Self {
        Self {
            state: Mutex::new(LazyState::Pending(Box::new(loader))),
        }
    }

    /// Runs the fetch on first call; later calls return the stored node.
    /// A failed fetch leaves the slot pending.
    pub fn resolve(&self) -> Result<Node> {
        let mut state = self.state.lock()?;
        let node = match &*state {
            LazyState::Loaded(node) => return Ok(node.clone()),
            LazyState::Pending(loader) => loader.load()?,
        };
        *state = LazyState::Loaded(node.clone());
        Ok(node)
    }

    pub fn is_loaded(&self) -> bool {
        self.state
            .lock()
            .map(|s| matches!(*s, LazyState::Loaded(_)))
            .unwrap_or(false)
    }
}

#[derive(Clone)]
enum Slot {
    Ready(Node),
    Lazy(Arc<LazyValue>),
}

// ============================================================================
// Objects and lists
// ============================================================================

struct ObjectInner {
    type_name: String,
    slots: RwLock<BTreeMap<String, Slot>>,
}

#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectInner>);

impl ObjectRef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self(Arc::new(ObjectInner {
            type_name: type_name.into(),
            slots: RwLock::new(BTreeMap::new()),
        }))
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    /// Reads a property, running its lazy fetch if one is pending. The object
    /// lock is not held while the fetch runs.
    pub fn get(&self, property: &str) -> Result<Option<Node>> {
        let slot = self.0.slots.read()?.get(property).cloned();
        match slot {
            None => Ok(None),
            Some(Slot::Ready(node)) => Ok(Some(node)),
            Some(Slot::Lazy(lazy)) => {
                let node = lazy.resolve()?;
                let mut slots = self.0.slots.write()?;
                // a setter may have replaced the slot while the fetch ran
                if let Some(Slot::Lazy(current)) = slots.get(property) {
                    if Arc::ptr_eq(current, &lazy) {
                        slots.insert(property.to_string(), Slot::Ready(node.clone()));
                    }
                }
                Ok(Some(node))
            }
        }
    }

    /// Reads a property without triggering a pending lazy fetch.
    pub fn peek(&self, property: &str) -> Result<Option<Node>> {
        Ok(match self.0.slots.read()?.get(property) {
            Some(Slot::Ready(node)) => Some(node.clone()),
            _ => None,
        })
    }

    /// Scalar property; NULL when absent.
    pub fn value(&self, property: &str) -> Result<Value> {
        Node::Object(self.clone()).path_value(property)
    }

    pub fn set(&self, property: &str, value: impl Into<Node>) -> Result<()> {
        self.0
            .slots
            .write()?
            .insert(property.to_string(), Slot::Ready(value.into()));
        Ok(())
    }

    pub fn set_lazy(&self, property: &str, value: LazyValue) -> Result<()> {
        self.0
            .slots
            .write()?
            .insert(property.to_string(), Slot::Lazy(Arc::new(value)));
        Ok(())
    }

    pub fn is_lazy_pending(&self, property: &str) -> bool {
        self.0
            .slots
            .read()
            .map(|slots| match slots.get(property) {
                Some(Slot::Lazy(lazy)) => !lazy.is_loaded(),
                _ => false,
            })
            .unwrap_or(false)
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.0
            .slots
            .read()
            .map(|slots| slots.contains_key(property))
            .unwrap_or(false)
    }

    pub fn property_names(&self) -> Vec<String> {
        self.0
            .slots
            .read()
            .map(|slots| slots.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    fn resolved_properties(&self) -> Vec<(String, Node)> {
        self.0
            .slots
            .read()
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|(name, slot)| match slot {
                        Slot::Ready(node) => Some((name.clone(), node.clone())),
                        Slot::Lazy(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

// Shallow on purpose: graphs may be cyclic.
impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x} {:?}", self.type_name(), self.addr(), self.property_names())
    }
}

#[derive(Clone, Default)]
pub struct ListRef(Arc<RwLock<Vec<Node>>>);

impl ListRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Node>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn push(&self, node: Node) -> Result<()> {
        self.0.write()?.push(node);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Node> {
        self.0.read().ok().and_then(|items| items.get(index).cloned())
    }

    /// Copy of the current elements.
    pub fn snapshot(&self) -> Vec<Node> {
        self.0.read().map(|items| items.clone()).unwrap_or_default()
    }

    pub fn ptr_eq(&self, other: &ListRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for ListRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "List@{:x} (len {})", self.addr(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl LazyLoad for Counting {
        fn load(&self) -> Result<Node> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Node::from("loaded"))
        }
    }

    #[test]
    fn test_lazy_slot_resolves_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let obj = ObjectRef::new("person");
        obj.set_lazy("parent", LazyValue::new(Counting(calls.clone())))
            .unwrap();

        assert!(obj.is_lazy_pending("parent"));
        assert_eq!(obj.peek("parent").unwrap(), None);
        assert_eq!(obj.get("parent").unwrap(), Some(Node::from("loaded")));
        assert_eq!(obj.get("parent").unwrap(), Some(Node::from("loaded")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!obj.is_lazy_pending("parent"));
    }

    #[test]
    fn test_setter_replaces_pending_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let obj = ObjectRef::new("person");
        obj.set_lazy("parent", LazyValue::new(Counting(calls.clone())))
            .unwrap();
        obj.set("parent", 5i64).unwrap();
        assert_eq!(obj.get("parent").unwrap(), Some(Node::from(5i64)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_paths() {
        let root = Node::Object(ObjectRef::new("order"));
        root.set_path("customer.name", Node::from("Ann")).unwrap();
        assert_eq!(root.path_value("customer.name").unwrap(), Value::from("Ann"));
        assert_eq!(root.path_value("customer.missing").unwrap(), Value::Null);
    }

    #[test]
    fn test_to_json_cuts_cycles() {
        let parent = ObjectRef::new("node");
        let child = ObjectRef::new("node");
        parent.set("id", 1i64).unwrap();
        child.set("id", 2i64).unwrap();
        child.set("parent", parent.clone()).unwrap();
        parent.set("child", child).unwrap();

        let json = Node::Object(parent).to_json();
        assert_eq!(json["child"]["id"], serde_json::json!(2));
        assert!(json["child"]["parent"].is_null());
    }
}
