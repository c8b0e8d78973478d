use log::{debug, warn};
use std::sync::{Arc, Mutex, Weak};

use super::{BatchResult, Executor, TargetKind};
use crate::cache::{CacheKey, TransactionalCacheManager};
use crate::core::{DbError, Result};
use crate::cursor::Cursor;
use crate::mapping::{BoundSql, MappedStatement, ParameterMode, RowBounds, StatementType};
use crate::object::{Node, ObjectRef, ResultList};
use crate::result::ResultHandler;
use crate::transaction::Transaction;

/// Adds the shared second-level cache in front of another executor.
///
/// Reads go through a per-session transactional buffer: hits come from the
/// shared cache, results computed here only reach it on commit.
pub struct CachingExecutor {
    delegate: Arc<dyn Executor>,
    tcm: Mutex<TransactionalCacheManager>,
}

impl CachingExecutor {
    /// Wraps `delegate` and makes it route nested queries back through here.
    pub fn new(delegate: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let wrapper: Weak<dyn Executor> = weak.clone();
            if let Err(e) = delegate.set_executor_wrapper(wrapper) {
                warn!("Could not register caching executor as wrapper: {}", e);
            }
            Self {
                delegate,
                tcm: Mutex::new(TransactionalCacheManager::new()),
            }
        })
    }

    pub fn delegate(&self) -> &Arc<dyn Executor> {
        &self.delegate
    }

    fn flush_cache_if_required(&self, ms: &MappedStatement) -> Result<()> {
        if let Some(cache) = &ms.cache {
            if ms.flush_cache_required {
                self.tcm.lock()?.clear(cache);
            }
        }
        Ok(())
    }

    fn ensure_no_out_params(ms: &MappedStatement, bound_sql: &BoundSql) -> Result<()> {
        if ms.statement_type != StatementType::Callable {
            return Ok(());
        }
        if bound_sql
            .parameter_mappings
            .iter()
            .any(|mapping| mapping.mode != ParameterMode::In)
        {
            return Err(DbError::Configuration(format!(
                "Caching stored procedures with OUT params is not supported.  Please configure useCache=false in {} statement.",
                ms.id
            )));
        }
        Ok(())
    }
}

impl Executor for CachingExecutor {
    fn transaction(&self) -> Result<Arc<dyn Transaction>> {
        self.delegate.transaction()
    }

    fn update(&self, ms: &Arc<MappedStatement>, parameter: &Node) -> Result<i64> {
        self.flush_cache_if_required(ms)?;
        self.delegate.update(ms, parameter)
    }

    fn query_with_key(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: BoundSql,
    ) -> Result<ResultList> {
        let cache = match &ms.cache {
            Some(cache) => cache,
            None => return self.delegate.query_with_key(ms, parameter, bounds, handler, key, bound_sql),
        };
        self.flush_cache_if_required(ms)?;
        if !ms.use_cache || handler.is_some() {
            return self.delegate.query_with_key(ms, parameter, bounds, handler, key, bound_sql);
        }

        Self::ensure_no_out_params(ms, &bound_sql)?;
        let cached = self.tcm.lock()?.get(cache, &key)?;
        if let Some(list) = cached {
            debug!("Shared cache hit for '{}'", ms.id);
            return Ok(list);
        }
        let list = self
            .delegate
            .query_with_key(ms, parameter, bounds, None, key.clone(), bound_sql)?;
        self.tcm.lock()?.put(cache, key, list.clone());
        Ok(list)
    }

    fn query_cursor(&self, ms: &Arc<MappedStatement>, parameter: &Node, bounds: RowBounds) -> Result<Cursor> {
        self.flush_cache_if_required(ms)?;
        self.delegate.query_cursor(ms, parameter, bounds)
    }

    fn flush_statements(&self) -> Result<Vec<BatchResult>> {
        self.delegate.flush_statements()
    }

    fn commit(&self, required: bool) -> Result<()> {
        self.delegate.commit(required)?;
        self.tcm.lock()?.commit()
    }

    fn rollback(&self, required: bool) -> Result<()> {
        let outcome = self.delegate.rollback(required);
        if required {
            self.tcm.lock()?.rollback()?;
        }
        outcome
    }

    fn create_cache_key(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        bound_sql: &BoundSql,
    ) -> Result<CacheKey> {
        self.delegate.create_cache_key(ms, parameter, bounds, bound_sql)
    }

    fn is_cached(&self, ms: &Arc<MappedStatement>, key: &CacheKey) -> bool {
        self.delegate.is_cached(ms, key)
    }

    fn clear_local_cache(&self) {
        self.delegate.clear_local_cache()
    }

    fn defer_load(
        &self,
        ms: &Arc<MappedStatement>,
        target: &ObjectRef,
        property: &str,
        key: CacheKey,
        kind: TargetKind,
    ) -> Result<()> {
        self.delegate.defer_load(ms, target, property, key, kind)
    }

    fn close(&self, force_rollback: bool) {
        let outcome = match self.tcm.lock() {
            Ok(mut tcm) if force_rollback => tcm.rollback(),
            Ok(mut tcm) => tcm.commit(),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = outcome {
            warn!("Error settling transactional caches on close: {}", e);
        }
        self.delegate.close(force_rollback);
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }

    fn set_executor_wrapper(&self, _wrapper: Weak<dyn Executor>) -> Result<()> {
        Err(DbError::Executor("This method should not be called".into()))
    }
}
