use std::sync::Arc;

use super::{BaseExecutor, BatchResult, ExecutorContext, StatementStrategy};
use crate::core::Result;
use crate::cursor::Cursor;
use crate::driver::close_statement;
use crate::mapping::{BoundSql, MappedStatement, RowBounds};
use crate::object::{Node, ResultList};
use crate::result::ResultHandler;
use crate::session::Configuration;
use crate::transaction::Transaction;

/// Opens a fresh handle for every call and closes it right after.
#[derive(Debug, Default)]
pub struct SimpleStrategy;

pub type SimpleExecutor = BaseExecutor<SimpleStrategy>;

impl BaseExecutor<SimpleStrategy> {
    pub fn new(configuration: Arc<Configuration>, transaction: Arc<dyn Transaction>) -> Arc<Self> {
        Self::with_strategy(configuration, transaction, SimpleStrategy)
    }
}

impl StatementStrategy for SimpleStrategy {
    fn do_update(&self, ctx: &ExecutorContext, ms: &Arc<MappedStatement>, parameter: &Node) -> Result<i64> {
        let handler = ctx.statement_handler(ms, parameter, RowBounds::DEFAULT, None)?;
        let mut statement = ctx.prepare_statement(&handler)?;
        let outcome = handler.update(statement.as_mut());
        close_statement(statement.as_mut());
        outcome
    }

    fn do_query(
        &self,
        ctx: &ExecutorContext,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
        bound_sql: BoundSql,
    ) -> Result<ResultList> {
        let handler = ctx.statement_handler(ms, parameter, bounds, Some(bound_sql))?;
        let mut statement = ctx.prepare_statement(&handler)?;
        let outcome = handler.query(statement.as_mut(), result_handler);
        close_statement(statement.as_mut());
        outcome
    }

    fn do_query_cursor(
        &self,
        ctx: &ExecutorContext,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        bound_sql: BoundSql,
    ) -> Result<Cursor> {
        let handler = ctx.statement_handler(ms, parameter, bounds, Some(bound_sql))?;
        let mut statement = ctx.prepare_statement(&handler)?;
        match handler.query_cursor(statement.as_mut()) {
            Ok(cursor) => {
                cursor.close_on_completion(statement);
                Ok(cursor)
            }
            Err(e) => {
                close_statement(statement.as_mut());
                Err(e)
            }
        }
    }

    fn do_flush_statements(&self, _ctx: &ExecutorContext, _is_rollback: bool) -> Result<Vec<BatchResult>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnType;
    use crate::driver::memory::{MemoryDataSource, MemoryTable};
    use crate::executor::Executor;
    use crate::mapping::{ParameterMapping, ResultMap, ResultType, SqlCommandType, StaticSqlSource};
    use crate::session::Settings;
    use crate::transaction::Environment;

    fn setup() -> (MemoryDataSource, Arc<Configuration>, Arc<MappedStatement>) {
        let ds = MemoryDataSource::new();
        ds.on_query(
            "select name from users where id = ?",
            MemoryTable::new(&[("name", ColumnType::Varchar)]).row(vec!["ann".into()]),
        );
        let configuration = Arc::new(
            Configuration::new(Settings::default())
                .with_environment(Environment::new("test", Arc::new(ds.clone()))),
        );
        let ms = MappedStatement::builder(
            "selectName",
            SqlCommandType::Select,
            StaticSqlSource::new("select name from users where id = ?").param(ParameterMapping::new("id")),
        )
        .result_map(ResultMap::builder("selectName-Inline", ResultType::Map).build())
        .build();
        (ds, configuration, ms)
    }

    #[test]
    fn test_each_query_closes_its_statement() {
        let (ds, configuration, ms) = setup();
        let tx = configuration.environment().unwrap().new_transaction(false);
        let executor = SimpleExecutor::new(configuration, tx);

        executor.query(&ms, &Node::from(1i64), RowBounds::DEFAULT, None).unwrap();
        executor.clear_local_cache();
        executor.query(&ms, &Node::from(1i64), RowBounds::DEFAULT, None).unwrap();

        assert_eq!(ds.prepared_statements(), 2);
        assert_eq!(ds.closed_statements(), 2);
        assert!(executor.flush_statements().unwrap().is_empty());
    }

    #[test]
    fn test_closed_executor_rejects_queries() {
        let (_ds, configuration, ms) = setup();
        let tx = configuration.environment().unwrap().new_transaction(false);
        let executor = SimpleExecutor::new(configuration, tx);
        executor.close(false);
        executor.close(false);
        assert!(executor.is_closed());
        assert!(executor.query(&ms, &Node::from(1i64), RowBounds::DEFAULT, None).is_err());
    }
}
