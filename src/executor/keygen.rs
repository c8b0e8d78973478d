//! Fills key properties of written parameter objects, either from keys the
//! driver generated or from a separate key statement.

use log::{debug, warn};
use std::sync::Arc;

use crate::core::{DbError, Result};
use crate::driver::{close_result_set, ResultSet, Statement};
use crate::mapping::{KeyGenerator, MappedStatement, RowBounds, SqlCommandType};
use crate::object::Node;
use crate::session::{Configuration, ExecutorType};
use crate::transaction::Transaction;

pub(crate) fn uses_generated_keys(configuration: &Configuration, ms: &MappedStatement) -> bool {
    match ms.key_generator {
        KeyGenerator::Generated => true,
        KeyGenerator::None => {
            ms.command_type == SqlCommandType::Insert && configuration.settings().use_generated_keys
        }
        KeyGenerator::SelectKey { .. } => false,
    }
}

pub(crate) fn process_before(
    configuration: &Arc<Configuration>,
    transaction: &Arc<dyn Transaction>,
    ms: &MappedStatement,
    parameter: &Node,
) -> Result<()> {
    if let KeyGenerator::SelectKey {
        statement,
        execute_before: true,
    } = &ms.key_generator
    {
        select_key(configuration, transaction, statement, parameter)?;
    }
    Ok(())
}

pub(crate) fn process_after(
    configuration: &Arc<Configuration>,
    transaction: &Arc<dyn Transaction>,
    ms: &MappedStatement,
    statement: &mut dyn Statement,
    parameter: &Node,
) -> Result<()> {
    match &ms.key_generator {
        KeyGenerator::SelectKey {
            statement: key_statement,
            execute_before: false,
        } => select_key(configuration, transaction, key_statement, parameter),
        KeyGenerator::SelectKey { .. } => Ok(()),
        _ if uses_generated_keys(configuration, ms) => {
            assign_generated_keys(ms, statement, &parameters_of(parameter))
        }
        _ => Ok(()),
    }
}

/// Post-processing for one flushed batch group; `parameters` are the group's
/// parameter objects in submission order.
pub(crate) fn process_batch(
    configuration: &Arc<Configuration>,
    transaction: &Arc<dyn Transaction>,
    ms: &MappedStatement,
    statement: &mut dyn Statement,
    parameters: &[Node],
) -> Result<()> {
    match &ms.key_generator {
        KeyGenerator::SelectKey {
            statement: key_statement,
            execute_before: false,
        } => {
            for parameter in parameters {
                select_key(configuration, transaction, key_statement, parameter)?;
            }
            Ok(())
        }
        KeyGenerator::SelectKey { .. } => Ok(()),
        _ if uses_generated_keys(configuration, ms) => {
            let expanded: Vec<Node> = parameters.iter().flat_map(parameters_of).collect();
            assign_generated_keys(ms, statement, &expanded)
        }
        _ => Ok(()),
    }
}

fn parameters_of(parameter: &Node) -> Vec<Node> {
    match parameter {
        Node::List(list) => list.snapshot(),
        other => vec![other.clone()],
    }
}

fn assign_generated_keys(ms: &MappedStatement, statement: &mut dyn Statement, parameters: &[Node]) -> Result<()> {
    if ms.key_properties.is_empty() || parameters.is_empty() {
        return Ok(());
    }
    let Some(mut keys) = statement.generated_keys()? else {
        return Ok(());
    };
    let outcome = assign_key_rows(ms, keys.as_mut(), parameters);
    close_result_set(keys.as_mut());
    outcome
}

fn assign_key_rows(ms: &MappedStatement, keys: &mut dyn ResultSet, parameters: &[Node]) -> Result<()> {
    if keys.columns().len() < ms.key_properties.len() {
        warn!(
            "Statement '{}' declares {} key properties but only {} generated key columns were returned",
            ms.id,
            ms.key_properties.len(),
            keys.columns().len()
        );
        return Ok(());
    }
    for parameter in parameters {
        if !keys.next()? {
            break;
        }
        if parameter.is_null() {
            continue;
        }
        for (i, property) in ms.key_properties.iter().enumerate() {
            parameter.set_path(property, Node::Value(keys.value(i)?))?;
        }
    }
    Ok(())
}

/// Runs a key statement on a short-lived executor sharing the transaction.
/// The executor is not closed, since closing would close the transaction.
fn select_key(
    configuration: &Arc<Configuration>,
    transaction: &Arc<dyn Transaction>,
    key_statement: &Arc<MappedStatement>,
    parameter: &Node,
) -> Result<()> {
    if parameter.is_null() || key_statement.key_properties.is_empty() {
        return Ok(());
    }
    debug!("Running key statement '{}'", key_statement.id);
    let executor = configuration.new_executor(transaction.clone(), ExecutorType::Simple);
    let values = executor.query(key_statement, parameter, RowBounds::DEFAULT, None)?;
    let value = match values.as_slice() {
        [] => return Err(DbError::Executor("SelectKey returned no data.".into())),
        [value] => value,
        _ => return Err(DbError::Executor("SelectKey returned more than one value.".into())),
    };

    let properties = &key_statement.key_properties;
    if let [property] = properties.as_slice() {
        let key = match value {
            Node::Object(row) if row.has_property(property) => row.get(property)?.unwrap_or_else(Node::null),
            other => other.clone(),
        };
        return parameter.set_path(property, key);
    }

    let columns = &key_statement.key_columns;
    if columns.is_empty() {
        for property in properties {
            parameter.set_path(property, value.get_path(property)?.unwrap_or_else(Node::null))?;
        }
        return Ok(());
    }
    if columns.len() != properties.len() {
        return Err(DbError::Executor(
            "If SelectKey has key properties, the number of key columns must match the number of key properties."
                .into(),
        ));
    }
    for (column, property) in columns.iter().zip(properties) {
        parameter.set_path(property, value.get_path(column)?.unwrap_or_else(Node::null))?;
    }
    Ok(())
}
