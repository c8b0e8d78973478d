use log::debug;
use std::sync::Arc;
use std::time::Duration;

use super::{keygen, Executor, ExecutorContext, ParameterHandler};
use crate::core::Result;
use crate::cursor::Cursor;
use crate::driver::{close_statement, GeneratedKeys, PrepareOptions, Statement};
use crate::mapping::{BoundSql, MappedStatement, RowBounds, StatementType};
use crate::object::{Node, ResultList};
use crate::result::{ResultHandler, ResultSetHandler};
use crate::session::Configuration;
use crate::transaction::Transaction;

/// Effective timeout of a statement: its own, else the configured default,
/// capped by the transaction timeout. Zero means "none".
pub(crate) fn statement_timeout(
    configuration: &Configuration,
    ms: &MappedStatement,
    transaction_timeout: Option<Duration>,
) -> Option<Duration> {
    let own = ms
        .timeout
        .or_else(|| {
            configuration
                .settings()
                .default_statement_timeout
                .map(Duration::from_secs)
        })
        .filter(|t| !t.is_zero());
    match (own, transaction_timeout.filter(|t| !t.is_zero())) {
        (Some(own), Some(tx)) => Some(own.min(tx)),
        (own, tx) => own.or(tx),
    }
}

/// Everything needed to run one statement invocation on one handle.
pub struct StatementHandler {
    executor: Arc<dyn Executor>,
    configuration: Arc<Configuration>,
    transaction: Arc<dyn Transaction>,
    mapped_statement: Arc<MappedStatement>,
    parameter: Node,
    bounds: RowBounds,
    bound_sql: BoundSql,
}

impl StatementHandler {
    /// Writes without a precomputed bound query run their "before" key
    /// statement first, since it may fill properties the query text binds.
    pub fn new(
        ctx: &ExecutorContext,
        mapped_statement: Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        bound_sql: Option<BoundSql>,
    ) -> Result<Self> {
        let configuration = ctx.configuration().clone();
        let transaction = ctx.transaction().clone();
        let bound_sql = match bound_sql {
            Some(bound_sql) => bound_sql,
            None => {
                keygen::process_before(&configuration, &transaction, &mapped_statement, parameter)?;
                mapped_statement.bound_sql(parameter)?
            }
        };
        Ok(Self {
            executor: ctx.wrapper()?,
            configuration,
            transaction,
            mapped_statement,
            parameter: parameter.clone(),
            bounds,
            bound_sql,
        })
    }

    pub fn bound_sql(&self) -> &BoundSql {
        &self.bound_sql
    }

    pub fn mapped_statement(&self) -> &Arc<MappedStatement> {
        &self.mapped_statement
    }

    pub fn parameter(&self) -> &Node {
        &self.parameter
    }

    fn is_callable(&self) -> bool {
        self.mapped_statement.statement_type == StatementType::Callable
    }

    fn prepare_options(&self) -> PrepareOptions {
        let ms = &self.mapped_statement;
        let generated_keys = if keygen::uses_generated_keys(&self.configuration, ms) {
            if ms.key_columns.is_empty() {
                GeneratedKeys::All
            } else {
                GeneratedKeys::Columns(ms.key_columns.clone())
            }
        } else {
            GeneratedKeys::None
        };
        PrepareOptions {
            callable: self.is_callable(),
            generated_keys,
        }
    }

    /// Opens a handle for this statement on `transaction` with its timeout applied.
    pub fn prepare(&self, transaction: &dyn Transaction) -> Result<Box<dyn Statement>> {
        debug!("==>  Preparing: {}", self.bound_sql.sql);
        let mut statement = transaction.prepare(&self.bound_sql.sql, &self.prepare_options())?;
        if let Err(e) = self.apply_timeout(statement.as_mut(), transaction.timeout()) {
            close_statement(statement.as_mut());
            return Err(e);
        }
        Ok(statement)
    }

    pub fn apply_timeout(&self, statement: &mut dyn Statement, transaction_timeout: Option<Duration>) -> Result<()> {
        let timeout = statement_timeout(&self.configuration, &self.mapped_statement, transaction_timeout);
        statement.set_timeout(timeout)
    }

    fn parameter_handler(&self) -> ParameterHandler<'_> {
        ParameterHandler::new(self.configuration.type_handlers(), &self.bound_sql)
    }

    pub fn parameterize(&self, statement: &mut dyn Statement) -> Result<()> {
        let parameters = self.parameter_handler();
        if self.is_callable() {
            parameters.register_output_parameters(statement)?;
        }
        parameters.set_parameters(statement)
    }

    pub fn batch(&self, statement: &mut dyn Statement) -> Result<()> {
        statement.add_batch()
    }

    pub fn update(&self, statement: &mut dyn Statement) -> Result<i64> {
        let rows = statement.execute_update()?;
        keygen::process_after(
            &self.configuration,
            &self.transaction,
            &self.mapped_statement,
            statement,
            &self.parameter,
        )?;
        if self.is_callable() {
            self.parameter_handler().read_output_parameters(statement)?;
        }
        debug!("<==    Updates: {}", rows);
        Ok(rows)
    }

    pub fn query(&self, statement: &mut dyn Statement, handler: Option<&mut dyn ResultHandler>) -> Result<ResultList> {
        statement.execute()?;
        let list = ResultSetHandler::new(
            self.executor.clone(),
            self.configuration.clone(),
            self.mapped_statement.clone(),
            self.bounds,
        )
        .handle_result_sets(statement, handler)?;
        if self.is_callable() {
            self.parameter_handler().read_output_parameters(statement)?;
        }
        Ok(list)
    }

    pub fn query_cursor(&self, statement: &mut dyn Statement) -> Result<Cursor> {
        statement.execute()?;
        let cursor = ResultSetHandler::new(
            self.executor.clone(),
            self.configuration.clone(),
            self.mapped_statement.clone(),
            self.bounds,
        )
        .handle_cursor_result_sets(statement)?;
        if self.is_callable() {
            self.parameter_handler().read_output_parameters(statement)?;
        }
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{SqlCommandType, StaticSqlSource};
    use crate::session::Settings;

    fn statement(timeout: Option<u64>) -> Arc<MappedStatement> {
        let builder = MappedStatement::builder("s", SqlCommandType::Select, StaticSqlSource::new("select 1"));
        match timeout {
            Some(secs) => builder.timeout(Duration::from_secs(secs)).build(),
            None => builder.build(),
        }
    }

    #[test]
    fn test_statement_timeout_resolution() {
        let plain = Configuration::new(Settings::default());
        let defaulted = Configuration::new(Settings::default().default_statement_timeout(30));

        assert_eq!(statement_timeout(&plain, &statement(None), None), None);
        assert_eq!(
            statement_timeout(&defaulted, &statement(None), None),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            statement_timeout(&defaulted, &statement(Some(5)), None),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            statement_timeout(&defaulted, &statement(None), Some(Duration::from_secs(10))),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            statement_timeout(&plain, &statement(Some(0)), Some(Duration::from_secs(4))),
            Some(Duration::from_secs(4))
        );
    }
}
