use log::debug;
use std::sync::Arc;

use crate::codec::{ScalarTypeHandler, TypeHandler, TypeHandlerRegistry};
use crate::core::{DbError, Result};
use crate::driver::Statement;
use crate::mapping::{BoundSql, ParameterMapping, ParameterMode};
use crate::object::Node;

/// Binds the parameters of a bound query to a handle, and reads OUT
/// parameters back into the parameter object after a callable ran.
pub struct ParameterHandler<'a> {
    type_handlers: &'a TypeHandlerRegistry,
    bound_sql: &'a BoundSql,
}

impl<'a> ParameterHandler<'a> {
    pub fn new(type_handlers: &'a TypeHandlerRegistry, bound_sql: &'a BoundSql) -> Self {
        Self {
            type_handlers,
            bound_sql,
        }
    }

    pub fn set_parameters(&self, statement: &mut dyn Statement) -> Result<()> {
        let mut bound = Vec::new();
        for (i, mapping) in self.bound_sql.parameter_mappings.iter().enumerate() {
            if mapping.mode == ParameterMode::Out {
                continue;
            }
            let value = self.bound_sql.parameter_value(&mapping.property)?;
            self.handler_for(mapping)
                .set_parameter(statement, i + 1, &value, mapping.column_type)?;
            bound.push(value.to_string());
        }
        debug!("==> Parameters: {}", bound.join(", "));
        Ok(())
    }

    pub fn register_output_parameters(&self, statement: &mut dyn Statement) -> Result<()> {
        for (i, mapping) in self.bound_sql.parameter_mappings.iter().enumerate() {
            if !mapping.is_output() {
                continue;
            }
            let column_type = mapping.column_type.ok_or_else(|| {
                DbError::Configuration(format!(
                    "The column type must be specified for output parameter '{}'",
                    mapping.property
                ))
            })?;
            statement.register_out_parameter(i + 1, column_type)?;
        }
        Ok(())
    }

    pub fn read_output_parameters(&self, statement: &dyn Statement) -> Result<()> {
        let parameter = &self.bound_sql.parameter_object;
        for (i, mapping) in self.bound_sql.parameter_mappings.iter().enumerate() {
            if !mapping.is_output() {
                continue;
            }
            let value = self.handler_for(mapping).get_output(statement, i + 1)?;
            parameter.set_path(&mapping.property, Node::Value(value))?;
        }
        Ok(())
    }

    fn handler_for(&self, mapping: &ParameterMapping) -> Arc<dyn TypeHandler> {
        mapping
            .type_handler
            .clone()
            .or_else(|| self.type_handlers.handler(mapping.data_type, mapping.column_type))
            .unwrap_or_else(|| Arc::new(ScalarTypeHandler::new(mapping.data_type)))
    }
}
