use log::debug;
use std::sync::{Arc, Mutex};
use tracing::{event, info_span, Level};

use super::{
    keygen, BaseExecutor, BatchExecutorError, BatchResult, ExecutorContext, StatementStrategy,
    BATCH_UPDATE_RETURN_VALUE,
};
use crate::core::{DbError, Result};
use crate::cursor::Cursor;
use crate::driver::{close_statement, Statement};
use crate::mapping::{BoundSql, MappedStatement, RowBounds};
use crate::object::{Node, ResultList};
use crate::result::ResultHandler;
use crate::session::Configuration;
use crate::transaction::Transaction;

#[derive(Default)]
struct BatchState {
    statements: Vec<Box<dyn Statement>>,
    results: Vec<BatchResult>,
    current_sql: Option<String>,
    current_statement: Option<Arc<MappedStatement>>,
}

/// Collects writes into groups and runs them on flush. Consecutive writes
/// with the same query text and the same statement share a group and a
/// handle. Queries flush pending groups first.
#[derive(Default)]
pub struct BatchStrategy {
    state: Mutex<BatchState>,
}

pub type BatchExecutor = BaseExecutor<BatchStrategy>;

impl BaseExecutor<BatchStrategy> {
    pub fn new(configuration: Arc<Configuration>, transaction: Arc<dyn Transaction>) -> Arc<Self> {
        Self::with_strategy(configuration, transaction, BatchStrategy::default())
    }
}

impl BatchStrategy {
    pub fn pending_groups(&self) -> usize {
        self.state.lock().map(|s| s.results.len()).unwrap_or(0)
    }
}

fn close_all(statements: impl IntoIterator<Item = Box<dyn Statement>>) {
    for mut statement in statements {
        close_statement(statement.as_mut());
    }
}

fn failure_message(result: &BatchResult, index: usize) -> String {
    let mut message = format!("{} (batch index #{}) failed.", result.statement_id(), index + 1);
    if index > 0 {
        message.push_str(&format!(
            " {} prior sub executor(s) completed successfully, but will be rolled back.",
            index
        ));
    }
    message
}

impl StatementStrategy for BatchStrategy {
    fn do_update(&self, ctx: &ExecutorContext, ms: &Arc<MappedStatement>, parameter: &Node) -> Result<i64> {
        let handler = ctx.statement_handler(ms, parameter, RowBounds::DEFAULT, None)?;
        let sql = handler.bound_sql().sql.clone();

        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        let same_group = state.current_sql.as_deref() == Some(sql.as_str())
            && state
                .current_statement
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, ms));

        if same_group {
            if let (Some(statement), Some(result)) = (state.statements.last_mut(), state.results.last_mut()) {
                handler.apply_timeout(statement.as_mut(), ctx.transaction().timeout())?;
                handler.parameterize(statement.as_mut())?;
                handler.batch(statement.as_mut())?;
                result.parameter_objects.push(parameter.clone());
                return Ok(BATCH_UPDATE_RETURN_VALUE);
            }
        }

        let mut statement = ctx.prepare_statement(&handler)?;
        if let Err(e) = handler.batch(statement.as_mut()) {
            close_statement(statement.as_mut());
            return Err(e);
        }
        debug!("Starting batch group #{} for '{}'", state.results.len() + 1, ms.id);
        state.current_sql = Some(sql.clone());
        state.current_statement = Some(ms.clone());
        state.statements.push(statement);
        state.results.push(BatchResult::new(ms.clone(), sql, parameter.clone()));
        Ok(BATCH_UPDATE_RETURN_VALUE)
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
        self.do_flush_statements(ctx, false)?;
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
        self.do_flush_statements(ctx, false)?;
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

    /// Runs every pending group in order. The first failing group stops the
    /// flush; its error carries the groups that completed before it.
    fn do_flush_statements(&self, ctx: &ExecutorContext, is_rollback: bool) -> Result<Vec<BatchResult>> {
        let BatchState {
            statements,
            results,
            ..
        } = std::mem::take(&mut *self.state.lock()?);

        if is_rollback {
            close_all(statements);
            return Ok(Vec::new());
        }
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let span = info_span!("executor.batch.flush", groups = statements.len());
        let _enter = span.enter();

        let mut completed = Vec::with_capacity(results.len());
        let mut groups = statements.into_iter().zip(results).enumerate();
        while let Some((index, (mut statement, mut result))) = groups.next() {
            match statement.execute_batch() {
                Ok(update_counts) => {
                    result.update_counts = update_counts;
                    let keys = keygen::process_batch(
                        ctx.configuration(),
                        ctx.transaction(),
                        &result.mapped_statement,
                        statement.as_mut(),
                        &result.parameter_objects,
                    );
                    close_statement(statement.as_mut());
                    if let Err(e) = keys {
                        close_all(groups.map(|(_, (s, _))| s));
                        return Err(e);
                    }
                    completed.push(result);
                }
                Err(DbError::BatchUpdate {
                    message,
                    update_counts,
                }) => {
                    close_statement(statement.as_mut());
                    close_all(groups.map(|(_, (s, _))| s));
                    result.update_counts = update_counts.clone();
                    let summary = failure_message(&result, index);
                    event!(
                        Level::ERROR,
                        statement = %result.statement_id(),
                        batch_index = index,
                        completed = completed.len(),
                        "batch group failed"
                    );
                    return Err(DbError::BatchExecution(Box::new(BatchExecutorError {
                        message: summary,
                        successful_batch_results: completed,
                        failing_batch: result,
                        batch_index: index,
                        cause: DbError::BatchUpdate {
                            message,
                            update_counts,
                        },
                    })));
                }
                Err(e) => {
                    close_statement(statement.as_mut());
                    close_all(groups.map(|(_, (s, _))| s));
                    return Err(e);
                }
            }
        }
        event!(Level::DEBUG, groups = completed.len(), "batch flushed");
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDataSource, Response};
    use crate::executor::Executor;
    use crate::mapping::{ParameterMapping, SqlCommandType, StaticSqlSource};
    use crate::object::ObjectRef;
    use crate::session::Settings;
    use crate::transaction::Environment;

    fn insert(id: &str, sql: &str) -> Arc<MappedStatement> {
        MappedStatement::builder(
            id,
            SqlCommandType::Insert,
            StaticSqlSource::new(sql).param(ParameterMapping::new("name")),
        )
        .build()
    }

    fn person(name: &str) -> Node {
        let p = ObjectRef::new("person");
        p.set("name", name).unwrap();
        Node::Object(p)
    }

    #[test]
    fn test_consecutive_writes_share_a_group() {
        let ds = MemoryDataSource::new();
        ds.on("insert into a values (?)", |_| Ok(Response::updated(1)));
        ds.on("insert into b values (?)", |_| Ok(Response::updated(1)));
        let configuration = Arc::new(
            Configuration::new(Settings::default())
                .with_environment(Environment::new("test", Arc::new(ds.clone()))),
        );
        let tx = configuration.environment().unwrap().new_transaction(false);
        let executor = BatchExecutor::new(configuration, tx);

        let a = insert("insertA", "insert into a values (?)");
        let b = insert("insertB", "insert into b values (?)");
        assert_eq!(executor.update(&a, &person("x")).unwrap(), BATCH_UPDATE_RETURN_VALUE);
        executor.update(&a, &person("y")).unwrap();
        executor.update(&b, &person("z")).unwrap();
        executor.update(&a, &person("w")).unwrap();
        assert_eq!(executor.strategy().pending_groups(), 3);
        assert_eq!(ds.total_executions(), 0);

        let results = executor.flush_statements().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].parameter_objects.len(), 2);
        assert_eq!(results[0].update_counts, vec![1, 1]);
        assert_eq!(results[1].statement_id(), "insertB");
        assert_eq!(ds.total_executions(), 4);
        assert_eq!(ds.closed_statements(), 3);
        assert_eq!(executor.strategy().pending_groups(), 0);
    }

    #[test]
    fn test_rollback_discards_pending_groups() {
        let ds = MemoryDataSource::new();
        ds.on("insert into a values (?)", |_| Ok(Response::updated(1)));
        let configuration = Arc::new(
            Configuration::new(Settings::default())
                .with_environment(Environment::new("test", Arc::new(ds.clone()))),
        );
        let tx = configuration.environment().unwrap().new_transaction(false);
        let executor = BatchExecutor::new(configuration, tx);
        executor
            .update(&insert("insertA", "insert into a values (?)"), &person("x"))
            .unwrap();
        executor.rollback(true).unwrap();
        assert_eq!(ds.total_executions(), 0);
        assert_eq!(ds.rollbacks(), 1);
        assert_eq!(ds.closed_statements(), 1);
    }
}
