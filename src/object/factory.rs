use super::{Node, ObjectRef};
use crate::core::Result;

/// Creates the objects rows are mapped into.
///
/// `constructor_args` holds the values of constructor mappings in declaration
/// order; it is empty for default construction.
pub trait ObjectFactory: Send + Sync {
    fn create(&self, type_name: &str, constructor_args: Vec<(String, Node)>) -> Result<ObjectRef>;
}

/// Builds a property bag and stores constructor arguments as properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultObjectFactory;

impl ObjectFactory for DefaultObjectFactory {
    fn create(&self, type_name: &str, constructor_args: Vec<(String, Node)>) -> Result<ObjectRef> {
        let object = ObjectRef::new(type_name);
        for (name, value) in constructor_args {
            object.set(&name, value)?;
        }
        Ok(object)
    }
}
