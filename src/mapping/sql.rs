use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::TypeHandler;
use crate::core::{ColumnType, DataType, Result, Value};
use crate::object::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

/// Binding of one `?` placeholder to a property of the parameter object.
#[derive(Clone)]
pub struct ParameterMapping {
    pub property: String,
    pub mode: ParameterMode,
    pub data_type: DataType,
    pub column_type: Option<ColumnType>,
    pub type_handler: Option<Arc<dyn TypeHandler>>,
}

impl ParameterMapping {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            mode: ParameterMode::In,
            data_type: DataType::Any,
            column_type: None,
            type_handler: None,
        }
    }

    pub fn mode(mut self, mode: ParameterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn column_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }

    pub fn type_handler(mut self, handler: Arc<dyn TypeHandler>) -> Self {
        self.type_handler = Some(handler);
        self
    }

    pub fn is_output(&self) -> bool {
        self.mode != ParameterMode::In
    }
}

impl fmt::Debug for ParameterMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterMapping")
            .field("property", &self.property)
            .field("mode", &self.mode)
            .field("data_type", &self.data_type)
            .field("column_type", &self.column_type)
            .finish()
    }
}

/// Final query text plus the ordered parameter bindings of one invocation.
#[derive(Debug, Clone)]
pub struct BoundSql {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
    pub parameter_object: Node,
    pub additional_parameters: HashMap<String, Value>,
}

impl BoundSql {
    pub fn new(sql: impl Into<String>, parameter_mappings: Vec<ParameterMapping>, parameter_object: Node) -> Self {
        Self {
            sql: sql.into(),
            parameter_mappings,
            parameter_object,
            additional_parameters: HashMap::new(),
        }
    }

    pub fn has_additional_parameter(&self, name: &str) -> bool {
        let root = name.split('.').next().unwrap_or(name);
        self.additional_parameters.contains_key(root)
    }

    pub fn set_additional_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.additional_parameters.insert(name.into(), value);
    }

    /// Value bound for `property`: an additional parameter first, then NULL
    /// for a null parameter, then the parameter itself when it is a scalar,
    /// then a property lookup on the parameter object.
    pub fn parameter_value(&self, property: &str) -> Result<Value> {
        if let Some(value) = self.additional_parameters.get(property) {
            return Ok(value.clone());
        }
        match &self.parameter_object {
            Node::Value(Value::Null) => Ok(Value::Null),
            Node::Value(scalar) => Ok(scalar.clone()),
            object => object.path_value(property),
        }
    }
}

/// Produces the bound query for a parameter object. Template expansion lives
/// behind this trait.
pub trait SqlSource: Send + Sync {
    fn bound_sql(&self, parameter: &Node) -> Result<BoundSql>;
}

/// Fixed query text with fixed bindings.
#[derive(Debug, Clone)]
pub struct StaticSqlSource {
    sql: String,
    parameter_mappings: Vec<ParameterMapping>,
}

impl StaticSqlSource {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameter_mappings: Vec::new(),
        }
    }

    pub fn param(mut self, mapping: ParameterMapping) -> Self {
        self.parameter_mappings.push(mapping);
        self
    }
}

impl SqlSource for StaticSqlSource {
    fn bound_sql(&self, parameter: &Node) -> Result<BoundSql> {
        Ok(BoundSql::new(
            self.sql.clone(),
            self.parameter_mappings.clone(),
            parameter.clone(),
        ))
    }
}
