use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BaseExecutor, BatchResult, ExecutorContext, StatementHandler, StatementStrategy};
use crate::core::Result;
use crate::cursor::Cursor;
use crate::driver::{close_statement, Statement};
use crate::mapping::{BoundSql, MappedStatement, RowBounds};
use crate::object::{Node, ResultList};
use crate::result::ResultHandler;
use crate::session::Configuration;
use crate::transaction::Transaction;

/// Keeps prepared handles keyed by query text until flush or close.
///
/// A handle is checked out of the map while it runs, so a nested query with
/// the same text prepares its own handle instead of rebinding a running one.
#[derive(Default)]
pub struct ReuseStrategy {
    statements: Mutex<HashMap<String, Box<dyn Statement>>>,
}

pub type ReuseExecutor = BaseExecutor<ReuseStrategy>;

impl BaseExecutor<ReuseStrategy> {
    pub fn new(configuration: Arc<Configuration>, transaction: Arc<dyn Transaction>) -> Arc<Self> {
        Self::with_strategy(configuration, transaction, ReuseStrategy::default())
    }
}

impl ReuseStrategy {
    pub fn cached_statements(&self) -> usize {
        self.statements.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn check_out(&self, ctx: &ExecutorContext, handler: &StatementHandler) -> Result<Box<dyn Statement>> {
        let sql = &handler.bound_sql().sql;
        let cached = self.statements.lock()?.remove(sql);
        let mut statement = match cached {
            Some(mut statement) if !statement.is_closed() => {
                debug!("Reusing prepared statement for: {}", sql);
                handler.apply_timeout(statement.as_mut(), ctx.transaction().timeout())?;
                statement
            }
            Some(mut stale) => {
                close_statement(stale.as_mut());
                handler.prepare(ctx.transaction().as_ref())?
            }
            None => handler.prepare(ctx.transaction().as_ref())?,
        };
        if let Err(e) = handler.parameterize(statement.as_mut()) {
            self.check_in(sql, statement);
            return Err(e);
        }
        Ok(statement)
    }

    fn check_in(&self, sql: &str, statement: Box<dyn Statement>) {
        match self.statements.lock() {
            Ok(mut statements) => {
                if let Some(mut replaced) = statements.insert(sql.to_string(), statement) {
                    close_statement(replaced.as_mut());
                }
            }
            Err(_) => {
                let mut statement = statement;
                close_statement(statement.as_mut());
            }
        }
    }
}

impl StatementStrategy for ReuseStrategy {
    fn do_update(&self, ctx: &ExecutorContext, ms: &Arc<MappedStatement>, parameter: &Node) -> Result<i64> {
        let handler = ctx.statement_handler(ms, parameter, RowBounds::DEFAULT, None)?;
        let mut statement = self.check_out(ctx, &handler)?;
        let outcome = handler.update(statement.as_mut());
        self.check_in(&handler.bound_sql().sql, statement);
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
        let mut statement = self.check_out(ctx, &handler)?;
        let outcome = handler.query(statement.as_mut(), result_handler);
        self.check_in(&handler.bound_sql().sql, statement);
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
        let mut statement = self.check_out(ctx, &handler)?;
        let outcome = handler.query_cursor(statement.as_mut());
        self.check_in(&handler.bound_sql().sql, statement);
        outcome
    }

    fn do_flush_statements(&self, _ctx: &ExecutorContext, _is_rollback: bool) -> Result<Vec<BatchResult>> {
        let drained: Vec<Box<dyn Statement>> = self.statements.lock()?.drain().map(|(_, s)| s).collect();
        for mut statement in drained {
            close_statement(statement.as_mut());
        }
        Ok(Vec::new())
    }
}
