//! Value conversion between native types and column values.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{ColumnType, DataType, Result, Value};
use crate::driver::{ResultSet, Statement};

pub trait TypeHandler: Send + Sync + fmt::Debug {
    fn set_parameter(
        &self,
        statement: &mut dyn Statement,
        index: usize,
        value: &Value,
        column_type: Option<ColumnType>,
    ) -> Result<()>;

    fn get_result(&self, result_set: &dyn ResultSet, index: usize) -> Result<Value>;

    fn get_output(&self, statement: &dyn Statement, index: usize) -> Result<Value>;
}

/// Converts through [`DataType::coerce`] in both directions.
#[derive(Debug, Clone, Copy)]
pub struct ScalarTypeHandler {
    target: DataType,
}

impl ScalarTypeHandler {
    pub fn new(target: DataType) -> Self {
        Self { target }
    }
}

impl TypeHandler for ScalarTypeHandler {
    fn set_parameter(
        &self,
        statement: &mut dyn Statement,
        index: usize,
        value: &Value,
        _column_type: Option<ColumnType>,
    ) -> Result<()> {
        statement.bind(index, self.target.coerce(value.clone())?)
    }

    fn get_result(&self, result_set: &dyn ResultSet, index: usize) -> Result<Value> {
        self.target.coerce(result_set.value(index)?)
    }

    fn get_output(&self, statement: &dyn Statement, index: usize) -> Result<Value> {
        self.target.coerce(statement.out_parameter(index)?)
    }
}

lazy_static! {
    static ref BUILTIN_HANDLERS: Vec<(DataType, Arc<dyn TypeHandler>)> = [
        DataType::Integer,
        DataType::Float,
        DataType::Text,
        DataType::Boolean,
        DataType::Timestamp,
        DataType::Uuid,
        DataType::Any,
    ]
    .into_iter()
    .map(|ty| (ty, Arc::new(ScalarTypeHandler::new(ty)) as Arc<dyn TypeHandler>))
    .collect();
}

/// Handlers keyed by native type and, optionally, column type.
///
/// Lookup order: the exact `(type, column)` pair, then the type's
/// column-agnostic handler, then the only handler registered for the type.
#[derive(Clone)]
pub struct TypeHandlerRegistry {
    handlers: HashMap<DataType, HashMap<Option<ColumnType>, Arc<dyn TypeHandler>>>,
}

impl TypeHandlerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        for (ty, handler) in BUILTIN_HANDLERS.iter() {
            registry.register(*ty, None, handler.clone());
        }
        registry
    }

    pub fn register(
        &mut self,
        data_type: DataType,
        column_type: Option<ColumnType>,
        handler: Arc<dyn TypeHandler>,
    ) {
        self.handlers
            .entry(data_type)
            .or_default()
            .insert(column_type, handler);
    }

    pub fn has_handler(&self, data_type: DataType) -> bool {
        self.handlers
            .get(&data_type)
            .is_some_and(|by_column| !by_column.is_empty())
    }

    pub fn handler(
        &self,
        data_type: DataType,
        column_type: Option<ColumnType>,
    ) -> Option<Arc<dyn TypeHandler>> {
        let by_column = self.handlers.get(&data_type)?;
        if let Some(handler) = by_column.get(&column_type) {
            return Some(handler.clone());
        }
        if let Some(handler) = by_column.get(&None) {
            return Some(handler.clone());
        }
        if by_column.len() == 1 {
            return by_column.values().next().cloned();
        }
        None
    }

    /// Handler for reading a column whose target type may be undeclared.
    pub fn for_column(&self, data_type: DataType, column_type: ColumnType) -> Arc<dyn TypeHandler> {
        let target = if data_type == DataType::Any {
            column_type.natural_type()
        } else {
            data_type
        };
        self.handler(target, Some(column_type))
            .or_else(|| self.handler(DataType::Any, None))
            .unwrap_or_else(|| Arc::new(ScalarTypeHandler::new(target)))
    }
}

impl Default for TypeHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandlerRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Upper;

    impl TypeHandler for Upper {
        fn set_parameter(
            &self,
            statement: &mut dyn Statement,
            index: usize,
            value: &Value,
            _column_type: Option<ColumnType>,
        ) -> Result<()> {
            statement.bind(index, Value::Text(value.to_string().to_uppercase()))
        }

        fn get_result(&self, result_set: &dyn ResultSet, index: usize) -> Result<Value> {
            Ok(Value::Text(result_set.value(index)?.to_string().to_uppercase()))
        }

        fn get_output(&self, statement: &dyn Statement, index: usize) -> Result<Value> {
            statement.out_parameter(index)
        }
    }

    #[test]
    fn test_exact_pair_wins_over_default() {
        let mut registry = TypeHandlerRegistry::new();
        registry.register(DataType::Text, Some(ColumnType::Varchar), Arc::new(Upper));

        let exact = registry.handler(DataType::Text, Some(ColumnType::Varchar)).unwrap();
        assert_eq!(format!("{:?}", exact), "Upper");
        let fallback = registry.handler(DataType::Text, Some(ColumnType::Other)).unwrap();
        assert!(format!("{:?}", fallback).contains("ScalarTypeHandler"));
    }

    #[test]
    fn test_single_registration_fallback() {
        let mut registry = TypeHandlerRegistry {
            handlers: HashMap::new(),
        };
        registry.register(DataType::Text, Some(ColumnType::Varchar), Arc::new(Upper));
        assert!(registry.handler(DataType::Text, Some(ColumnType::Other)).is_some());

        registry.register(DataType::Text, Some(ColumnType::Uuid), Arc::new(Upper));
        assert!(registry.handler(DataType::Text, Some(ColumnType::Other)).is_none());
        assert!(!registry.has_handler(DataType::Float));
    }
}
