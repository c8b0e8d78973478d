// ============================================================================
// Session
// ============================================================================
//
// Caller-facing facade. A SessionFactory owns the shared Configuration; each
// Session owns one executor over one transaction and addresses statements by
// id.
//
//   SessionFactory::open_session(type, auto_commit)
//        |
//        v
//   Session --select_*/insert/update/delete--> Executor (+ shared cache layer)
//
// A session is meant for one caller at a time. Writes mark it dirty; commit
// and rollback reach the database only when dirty or forced.
//
// ============================================================================

mod configuration;
mod settings;

pub use configuration::Configuration;
pub use settings::{AutoMappingBehavior, AutoMappingUnknownColumnBehavior, ExecutorType, LocalCacheScope, Settings};

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{DbError, Result};
use crate::cursor::{Cursor, CursorTracker};
use crate::executor::{BatchResult, Executor};
use crate::mapping::RowBounds;
use crate::object::{Node, ResultList};
use crate::result::{MapResultHandler, ResultContext, ResultHandler};

/// Opens sessions over a shared configuration.
#[derive(Clone)]
pub struct SessionFactory {
    configuration: Arc<Configuration>,
}

impl SessionFactory {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration: Arc::new(configuration),
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    /// Session with the configured default executor type, not auto-committing.
    pub fn open(&self) -> Result<Session> {
        self.open_session(self.configuration.settings().default_executor_type, false)
    }

    pub fn open_session(&self, executor_type: ExecutorType, auto_commit: bool) -> Result<Session> {
        let environment = self.configuration.environment().ok_or_else(|| {
            DbError::Configuration("Cannot open a session: no environment is configured".into())
        })?;
        let transaction = environment.new_transaction(auto_commit);
        let executor = self.configuration.new_executor(transaction, executor_type);
        debug!("Opened {:?} session on environment '{}'", executor_type, environment.id);
        Ok(Session {
            configuration: self.configuration.clone(),
            executor,
            auto_commit,
            dirty: false,
            closed: false,
            cursors: Vec::new(),
        })
    }
}

/// One unit of work against the database.
pub struct Session {
    configuration: Arc<Configuration>,
    executor: Arc<dyn Executor>,
    auto_commit: bool,
    dirty: bool,
    closed: bool,
    cursors: Vec<CursorTracker>,
}

impl Session {
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The single row of `statement`, or `None` when it returns no rows.
    pub fn select_one(&self, statement: &str, parameter: &Node) -> Result<Option<Node>> {
        let list = self.select_list(statement, parameter)?;
        match list.len() {
            0 => Ok(None),
            1 => Ok(list.first().cloned()),
            n => Err(DbError::TooManyResults(format!(
                "Expected one result (or null) to be returned by selectOne(), but found: {}",
                n
            ))),
        }
    }

    pub fn select_list(&self, statement: &str, parameter: &Node) -> Result<ResultList> {
        self.select_list_with_bounds(statement, parameter, RowBounds::DEFAULT)
    }

    pub fn select_list_with_bounds(&self, statement: &str, parameter: &Node, bounds: RowBounds) -> Result<ResultList> {
        let ms = self.configuration.mapped_statement(statement)?;
        self.executor.query(&ms, parameter, bounds, None)
    }

    /// Streams mapped rows to `handler` instead of collecting them.
    pub fn select_with_handler(
        &self,
        statement: &str,
        parameter: &Node,
        bounds: RowBounds,
        handler: &mut dyn ResultHandler,
    ) -> Result<()> {
        let ms = self.configuration.mapped_statement(statement)?;
        self.executor.query(&ms, parameter, bounds, Some(handler))?;
        Ok(())
    }

    /// Rows keyed by `key_property`; a later row replaces an earlier one with
    /// the same key.
    pub fn select_map(&self, statement: &str, parameter: &Node, key_property: &str) -> Result<HashMap<String, Node>> {
        let list = self.select_list(statement, parameter)?;
        let mut handler = MapResultHandler::new(key_property);
        let mut context = ResultContext::new();
        for row in list.iter() {
            context.next_result_object(Some(row.clone()));
            handler.handle_result(&mut context)?;
        }
        Ok(handler.into_map())
    }

    /// Rows mapped one at a time; the cursor is closed with the session at
    /// the latest.
    pub fn select_cursor(&mut self, statement: &str, parameter: &Node, bounds: RowBounds) -> Result<Cursor> {
        let ms = self.configuration.mapped_statement(statement)?;
        let cursor = self.executor.query_cursor(&ms, parameter, bounds)?;
        self.cursors.retain(CursorTracker::is_alive);
        self.cursors.push(cursor.tracker());
        Ok(cursor)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn insert(&mut self, statement: &str, parameter: &Node) -> Result<i64> {
        self.update(statement, parameter)
    }

    pub fn update(&mut self, statement: &str, parameter: &Node) -> Result<i64> {
        let ms = self.configuration.mapped_statement(statement)?;
        self.dirty = true;
        self.executor.update(&ms, parameter)
    }

    pub fn delete(&mut self, statement: &str, parameter: &Node) -> Result<i64> {
        self.update(statement, parameter)
    }

    // ========================================================================
    // Transaction control
    // ========================================================================

    fn is_commit_or_rollback_required(&self, force: bool) -> bool {
        (!self.auto_commit && self.dirty) || force
    }

    pub fn commit(&mut self, force: bool) -> Result<()> {
        self.executor.commit(self.is_commit_or_rollback_required(force))?;
        self.dirty = false;
        Ok(())
    }

    pub fn rollback(&mut self, force: bool) -> Result<()> {
        self.executor.rollback(self.is_commit_or_rollback_required(force))?;
        self.dirty = false;
        Ok(())
    }

    pub fn flush_statements(&self) -> Result<Vec<BatchResult>> {
        self.executor.flush_statements()
    }

    pub fn clear_cache(&self) {
        self.executor.clear_local_cache();
    }

    /// Closes open cursors, then the executor. Uncommitted writes are rolled
    /// back.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for cursor in self.cursors.drain(..) {
            cursor.close();
        }
        self.executor.close(self.is_commit_or_rollback_required(false));
        self.dirty = false;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            if self.dirty {
                warn!("Session dropped with uncommitted changes; rolling back");
            }
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnType;
    use crate::driver::memory::{MemoryDataSource, MemoryTable, Response};
    use crate::mapping::{MappedStatement, ParameterMapping, ResultMap, ResultType, SqlCommandType, StaticSqlSource};
    use crate::transaction::Environment;

    fn factory() -> (MemoryDataSource, SessionFactory) {
        let ds = MemoryDataSource::new();
        ds.on_query(
            "select id, name from users",
            MemoryTable::new(&[("id", ColumnType::Integer), ("name", ColumnType::Varchar)])
                .row(vec![1i64.into(), "ann".into()])
                .row(vec![2i64.into(), "bob".into()]),
        );
        ds.on("update users set name = ?", |_| Ok(Response::updated(2)));

        let mut configuration = Configuration::new(Settings::default())
            .with_environment(Environment::new("test", Arc::new(ds.clone())));
        configuration
            .add_mapped_statement(
                MappedStatement::builder("selectUsers", SqlCommandType::Select, StaticSqlSource::new("select id, name from users"))
                    .result_map(ResultMap::builder("selectUsers-Inline", ResultType::Map).build())
                    .build(),
            )
            .unwrap();
        configuration
            .add_mapped_statement(
                MappedStatement::builder(
                    "renameUsers",
                    SqlCommandType::Update,
                    StaticSqlSource::new("update users set name = ?").param(ParameterMapping::new("name")),
                )
                .build(),
            )
            .unwrap();
        (ds, SessionFactory::new(configuration))
    }

    #[test]
    fn test_select_one_rejects_many_rows() {
        let (_ds, factory) = factory();
        let session = factory.open().unwrap();
        let err = session.select_one("selectUsers", &Node::null()).unwrap_err();
        assert!(matches!(err, DbError::TooManyResults(_)));
    }

    #[test]
    fn test_select_map_keys_rows() {
        let (_ds, factory) = factory();
        let session = factory.open().unwrap();
        let map = session.select_map("selectUsers", &Node::null(), "id").unwrap();
        assert_eq!(map["2"].path_value("name").unwrap(), "bob".into());
    }

    #[test]
    fn test_commit_only_when_dirty_or_forced() {
        let (ds, factory) = factory();
        let mut session = factory.open().unwrap();
        session.select_list("selectUsers", &Node::null()).unwrap();
        session.commit(false).unwrap();
        assert_eq!(ds.commits(), 0);

        let param = crate::object::ObjectRef::new("args");
        param.set("name", "x").unwrap();
        assert_eq!(session.update("renameUsers", &Node::Object(param)).unwrap(), 2);
        session.commit(false).unwrap();
        assert_eq!(ds.commits(), 1);
    }

    #[test]
    fn test_close_closes_open_cursors() {
        let (_ds, factory) = factory();
        let mut session = factory.open().unwrap();
        let cursor = session.select_cursor("selectUsers", &Node::null(), RowBounds::DEFAULT).unwrap();
        session.close();
        assert!(cursor.is_closed());
        assert!(session.is_closed());
    }
}
