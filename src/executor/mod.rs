// ============================================================================
// Executors
// ============================================================================
//
// One executor serves one session. The base executor owns the first-level
// cache, the nested query depth and the deferred-load queue; a statement
// strategy decides how query handles are prepared and reused:
//
//   SimpleExecutor  -> fresh handle per call
//   ReuseExecutor   -> handles cached by query text until flush/close
//   BatchExecutor   -> writes grouped by (query text, statement), run on flush
//
// CachingExecutor decorates any of them with the shared second-level cache.
// Executors hand themselves (or their decorator) to statement handlers as
// `Arc<dyn Executor>` so nested queries re-enter through the outermost
// layer.
//
// ============================================================================

mod base;
mod batch;
mod caching;
mod keygen;
mod loader;
mod parameter;
mod reuse;
mod simple;
mod statement;

pub use base::{BaseExecutor, ExecutorContext, StatementStrategy};
pub use batch::{BatchExecutor, BatchStrategy};
pub use caching::CachingExecutor;
pub use loader::{extract_from_list, ResultLoader};
pub use parameter::ParameterHandler;
pub use reuse::{ReuseExecutor, ReuseStrategy};
pub use simple::{SimpleExecutor, SimpleStrategy};
pub use statement::StatementHandler;

use std::fmt;
use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::cache::CacheKey;
use crate::core::{DbError, Result};
use crate::cursor::Cursor;
use crate::mapping::{BoundSql, MappedStatement, ResultMapping, RowBounds};
use crate::object::{Node, ObjectRef, ResultList};
use crate::result::ResultHandler;
use crate::transaction::Transaction;

/// Row count reported by a batched write before the batch is flushed.
pub const BATCH_UPDATE_RETURN_VALUE: i64 = i32::MIN as i64 + 1002;

/// Shape a nested query result is extracted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Single,
    Collection,
}

impl TargetKind {
    pub fn of(mapping: &ResultMapping) -> Self {
        if mapping.collection {
            TargetKind::Collection
        } else {
            TargetKind::Single
        }
    }
}

pub trait Executor: Send + Sync {
    fn transaction(&self) -> Result<Arc<dyn Transaction>>;

    fn update(&self, ms: &Arc<MappedStatement>, parameter: &Node) -> Result<i64>;

    fn query(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
    ) -> Result<ResultList> {
        let bound_sql = ms.bound_sql(parameter)?;
        let key = self.create_cache_key(ms, parameter, bounds, &bound_sql)?;
        self.query_with_key(ms, parameter, bounds, handler, key, bound_sql)
    }

    /// Query with a key computed by the caller; nested queries use this to
    /// share the key they registered a deferred load under.
    fn query_with_key(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: BoundSql,
    ) -> Result<ResultList>;

    fn query_cursor(&self, ms: &Arc<MappedStatement>, parameter: &Node, bounds: RowBounds) -> Result<Cursor>;

    fn flush_statements(&self) -> Result<Vec<BatchResult>>;

    fn commit(&self, required: bool) -> Result<()>;

    fn rollback(&self, required: bool) -> Result<()>;

    fn create_cache_key(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        bound_sql: &BoundSql,
    ) -> Result<CacheKey>;

    /// True when the local cache holds the key, even as an in-flight placeholder.
    fn is_cached(&self, ms: &Arc<MappedStatement>, key: &CacheKey) -> bool;

    fn clear_local_cache(&self);

    /// Assigns `target.property` from the local cache entry for `key`, now if
    /// it is loaded, otherwise once the outermost query completes.
    fn defer_load(
        &self,
        ms: &Arc<MappedStatement>,
        target: &ObjectRef,
        property: &str,
        key: CacheKey,
        kind: TargetKind,
    ) -> Result<()>;

    fn close(&self, force_rollback: bool);

    fn is_closed(&self) -> bool;

    /// Registers the decorator nested queries should re-enter through.
    fn set_executor_wrapper(&self, wrapper: Weak<dyn Executor>) -> Result<()>;
}

/// One group of a flushed batch: every write that shared query text and
/// statement, in submission order.
#[derive(Clone)]
pub struct BatchResult {
    pub mapped_statement: Arc<MappedStatement>,
    pub sql: String,
    pub parameter_objects: Vec<Node>,
    pub update_counts: Vec<i64>,
}

impl BatchResult {
    pub fn new(mapped_statement: Arc<MappedStatement>, sql: impl Into<String>, parameter: Node) -> Self {
        Self {
            mapped_statement,
            sql: sql.into(),
            parameter_objects: vec![parameter],
            update_counts: Vec::new(),
        }
    }

    pub fn statement_id(&self) -> &str {
        &self.mapped_statement.id
    }
}

impl fmt::Debug for BatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchResult")
            .field("statement", &self.mapped_statement.id)
            .field("sql", &self.sql)
            .field("parameters", &self.parameter_objects.len())
            .field("update_counts", &self.update_counts)
            .finish()
    }
}

/// A batch group failed during flush. Groups before it completed and are
/// reported here; groups after it were never run.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct BatchExecutorError {
    pub message: String,
    pub successful_batch_results: Vec<BatchResult>,
    pub failing_batch: BatchResult,
    /// Zero-based position of the failing group.
    pub batch_index: usize,
    #[source]
    pub cause: DbError,
}

impl BatchExecutorError {
    pub fn failing_statement_id(&self) -> &str {
        self.failing_batch.statement_id()
    }
}
