// ============================================================================
// Cursor
// ============================================================================
//
// Lazily maps the rows of an open result set, one mapped object per step.
//
//   Created --iter()--> Open --last row / limit--> Consumed
//      \                  \
//       +------close()-----+--------------------> Closed
//
// Offset rows are skipped on the raw result set before the first row is
// mapped; the limit counts mapped rows only. A cursor over a nested result map
// needs ordered rows: an object is only complete once the next row starts a
// different one.
//
// ============================================================================

use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::core::{DbError, Result};
use crate::driver::{close_statement, Statement};
use crate::mapping::{ResultMap, RowBounds};
use crate::object::Node;
use crate::result::{skip_rows, ResultContext, ResultHandler, ResultSetHandler, ResultSetWrapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStatus {
    /// No row fetched yet.
    Created,
    Open,
    Closed,
    /// Every row within the bounds was handed out.
    Consumed,
}

pub(crate) struct CursorCore {
    handler: ResultSetHandler,
    result_map: Arc<ResultMap>,
    rsw: ResultSetWrapper,
    bounds: RowBounds,
    status: CursorStatus,
    /// Objects mapped so far; skipped offset rows are not counted.
    read_count: usize,
    statement: Option<Box<dyn Statement>>,
}

/// Keeps exactly one mapped row, then asks the mapper to stop.
#[derive(Default)]
struct SingleRowHandler {
    fetched: bool,
    result: Option<Node>,
}

impl ResultHandler for SingleRowHandler {
    fn handle_result(&mut self, context: &mut ResultContext) -> Result<()> {
        self.fetched = true;
        self.result = context.take_result_object();
        context.stop();
        Ok(())
    }
}

impl CursorCore {
    fn is_closed(&self) -> bool {
        matches!(self.status, CursorStatus::Closed | CursorStatus::Consumed)
    }

    fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.release();
        self.status = CursorStatus::Closed;
    }

    fn release(&mut self) {
        self.rsw.close();
        if let Some(mut statement) = self.statement.take() {
            close_statement(statement.as_mut());
        }
    }

    fn fetch_next_using_bounds(&mut self) -> Result<Option<Node>> {
        if self.status == CursorStatus::Created && !self.rsw.is_closed() {
            if let Err(e) = skip_rows(&mut self.rsw, self.bounds) {
                self.close();
                return Err(e);
            }
        }
        self.fetch_next_from_database()
    }

    /// `None` once the rows or the bounds are exhausted. A fetched row that
    /// mapped to nothing comes back as a null node.
    fn fetch_next_from_database(&mut self) -> Result<Option<Node>> {
        if self.is_closed() {
            return Ok(None);
        }
        self.status = CursorStatus::Open;

        let mut collector = SingleRowHandler::default();
        if !self.rsw.is_closed() {
            let outcome = self.handler.handle_row_values(
                &mut self.rsw,
                &self.result_map,
                &mut collector,
                RowBounds::DEFAULT,
                None,
            );
            if let Err(e) = outcome {
                self.close();
                return Err(e);
            }
        }

        if collector.fetched {
            self.read_count += 1;
        }
        let limit_reached = self.read_count >= self.bounds.limit;
        if !collector.fetched || limit_reached {
            debug!("Cursor over '{}' consumed after {} rows", self.result_map.id, self.read_count);
            self.release();
            self.status = CursorStatus::Consumed;
        }
        Ok(collector.fetched.then(|| collector.result.unwrap_or_else(Node::null)))
    }
}

impl Drop for CursorCore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Row-by-row view over a query result. Only one iterator may be taken.
pub struct Cursor {
    core: Arc<Mutex<CursorCore>>,
    iterator_retrieved: bool,
}

impl Cursor {
    pub(crate) fn new(handler: ResultSetHandler, result_map: Arc<ResultMap>, rsw: ResultSetWrapper) -> Self {
        let bounds = handler.bounds();
        Self {
            core: Arc::new(Mutex::new(CursorCore {
                handler,
                result_map,
                rsw,
                bounds,
                status: CursorStatus::Created,
                read_count: 0,
                statement: None,
            })),
            iterator_retrieved: false,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CursorCore>> {
        Ok(self.core.lock()?)
    }

    pub fn status(&self) -> CursorStatus {
        self.lock().map(|core| core.status).unwrap_or(CursorStatus::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.status() == CursorStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status(), CursorStatus::Closed | CursorStatus::Consumed)
    }

    pub fn is_consumed(&self) -> bool {
        self.status() == CursorStatus::Consumed
    }

    /// Index of the last returned row counted from the start of the result,
    /// offset included; `None` before the first row.
    pub fn current_index(&self) -> Option<usize> {
        let core = self.lock().ok()?;
        core.read_count.checked_sub(1).map(|i| core.bounds.offset + i)
    }

    pub fn close(&self) {
        match self.core.lock() {
            Ok(mut core) => core.close(),
            Err(e) => warn!("Cursor lock poisoned on close: {}", e),
        }
    }

    /// Hands the statement that produced the rows to the cursor; it is
    /// closed together with the result set.
    pub fn close_on_completion(&self, mut statement: Box<dyn Statement>) {
        match self.core.lock() {
            Ok(mut core) if !core.is_closed() => core.statement = Some(statement),
            _ => close_statement(statement.as_mut()),
        }
    }

    pub(crate) fn tracker(&self) -> CursorTracker {
        CursorTracker(Arc::downgrade(&self.core))
    }

    pub fn iter(&mut self) -> Result<CursorIter> {
        if self.is_closed() {
            return Err(DbError::State("A Cursor is already closed.".into()));
        }
        if self.iterator_retrieved {
            return Err(DbError::State("Cannot open more than one iterator on a Cursor".into()));
        }
        self.iterator_retrieved = true;
        Ok(CursorIter {
            core: self.core.clone(),
        })
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").field("status", &self.status()).finish()
    }
}

/// Weak handle a session keeps so it can close cursors it handed out.
#[derive(Clone)]
pub(crate) struct CursorTracker(Weak<Mutex<CursorCore>>);

impl CursorTracker {
    pub(crate) fn close(&self) {
        if let Some(core) = self.0.upgrade() {
            if let Ok(mut core) = core.lock() {
                core.close();
            }
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

pub struct CursorIter {
    core: Arc<Mutex<CursorCore>>,
}

impl Iterator for CursorIter {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut core = match self.core.lock() {
            Ok(core) => core,
            Err(e) => return Some(Err(e.into())),
        };
        core.fetch_next_using_bounds().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnType;
    use crate::driver::memory::{MemoryDataSource, MemoryTable};
    use crate::executor::{Executor, SimpleExecutor};
    use crate::mapping::{MappedStatement, ResultType, SqlCommandType, StaticSqlSource};
    use crate::core::DataType;
    use crate::session::{Configuration, Settings};
    use crate::transaction::Environment;

    fn numbers(count: i64) -> (MemoryDataSource, Arc<dyn Executor>, Arc<MappedStatement>) {
        let ds = MemoryDataSource::new();
        let mut table = MemoryTable::new(&[("n", ColumnType::Integer)]);
        for n in 1..=count {
            table = table.row(vec![n.into()]);
        }
        ds.on_query("select n from numbers", table);
        let configuration = Arc::new(
            Configuration::new(Settings::default())
                .with_environment(Environment::new("test", Arc::new(ds.clone()))),
        );
        let tx = configuration.environment().unwrap().new_transaction(false);
        let executor: Arc<dyn Executor> = SimpleExecutor::new(configuration, tx);
        let ms = MappedStatement::builder(
            "selectNumbers",
            SqlCommandType::Select,
            StaticSqlSource::new("select n from numbers"),
        )
        .result_map(ResultMap::builder("selectNumbers-Inline", ResultType::Scalar(DataType::Integer)).build())
        .build();
        (ds, executor, ms)
    }

    #[test]
    fn test_cursor_honours_offset_and_limit() {
        let (ds, executor, ms) = numbers(10);
        let mut cursor = executor.query_cursor(&ms, &Node::null(), RowBounds::new(2, 3)).unwrap();
        assert_eq!(cursor.status(), CursorStatus::Created);

        let values: Vec<i64> = cursor
            .iter()
            .unwrap()
            .map(|n| n.unwrap().as_value().and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(values, vec![3, 4, 5]);
        assert!(cursor.is_consumed());
        assert_eq!(cursor.current_index(), Some(4));
        assert_eq!(ds.closed_statements(), 1);
    }

    #[test]
    fn test_second_iterator_is_rejected() {
        let (_ds, executor, ms) = numbers(3);
        let mut cursor = executor.query_cursor(&ms, &Node::null(), RowBounds::DEFAULT).unwrap();
        let mut first = cursor.iter().unwrap();
        assert!(first.next().is_some());
        assert!(cursor.is_open());
        assert!(cursor.iter().is_err());

        cursor.close();
        assert!(cursor.is_closed());
        assert!(first.next().is_none());
    }
}
