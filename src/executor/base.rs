use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};

use super::loader::DeferredLoad;
use super::{BatchResult, Executor, StatementHandler, TargetKind};
use crate::cache::CacheKey;
use crate::core::{DbError, Result};
use crate::cursor::Cursor;
use crate::driver::{close_statement, Statement};
use crate::mapping::{BoundSql, MappedStatement, ParameterMode, RowBounds, StatementType};
use crate::object::{Node, ObjectRef, ResultList};
use crate::result::ResultHandler;
use crate::session::{Configuration, LocalCacheScope};
use crate::transaction::Transaction;

/// How an executor prepares, runs and releases query handles.
pub trait StatementStrategy: Send + Sync + 'static {
    fn do_update(&self, ctx: &ExecutorContext, ms: &Arc<MappedStatement>, parameter: &Node) -> Result<i64>;

    fn do_query(
        &self,
        ctx: &ExecutorContext,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        bound_sql: BoundSql,
    ) -> Result<ResultList>;

    fn do_query_cursor(
        &self,
        ctx: &ExecutorContext,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        bound_sql: BoundSql,
    ) -> Result<Cursor>;

    fn do_flush_statements(&self, ctx: &ExecutorContext, is_rollback: bool) -> Result<Vec<BatchResult>>;
}

/// What a strategy needs from its executor.
pub struct ExecutorContext {
    configuration: Arc<Configuration>,
    transaction: Arc<dyn Transaction>,
    wrapper: RwLock<Weak<dyn Executor>>,
    creator: ThreadId,
}

impl ExecutorContext {
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn transaction(&self) -> &Arc<dyn Transaction> {
        &self.transaction
    }

    pub fn creator(&self) -> ThreadId {
        self.creator
    }

    /// The outermost executor layer, which nested queries go through.
    pub fn wrapper(&self) -> Result<Arc<dyn Executor>> {
        self.wrapper
            .read()?
            .upgrade()
            .ok_or_else(|| DbError::Executor("Executor was closed.".into()))
    }

    pub fn statement_handler(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        bound_sql: Option<BoundSql>,
    ) -> Result<StatementHandler> {
        StatementHandler::new(self, ms.clone(), parameter, bounds, bound_sql)
    }

    /// Prepares a fresh handle and binds the parameters into it.
    pub fn prepare_statement(&self, handler: &StatementHandler) -> Result<Box<dyn Statement>> {
        let mut statement = handler.prepare(self.transaction.as_ref())?;
        if let Err(e) = handler.parameterize(statement.as_mut()) {
            close_statement(statement.as_mut());
            return Err(e);
        }
        Ok(statement)
    }
}

enum LocalEntry {
    InFlight,
    Loaded(ResultList),
}

#[derive(Default)]
struct LocalState {
    local_cache: HashMap<CacheKey, LocalEntry>,
    output_parameters: HashMap<CacheKey, Node>,
    deferred_loads: VecDeque<DeferredLoad>,
    query_stack: usize,
}

impl LocalState {
    fn clear_caches(&mut self) {
        self.local_cache.clear();
        self.output_parameters.clear();
    }

    fn loaded(&self, key: &CacheKey) -> Option<ResultList> {
        match self.local_cache.get(key) {
            Some(LocalEntry::Loaded(list)) => Some(list.clone()),
            _ => None,
        }
    }
}

/// Executor core shared by every strategy.
///
/// No lock is held while the strategy runs, so nested queries and deferred
/// loads may re-enter the executor freely.
pub struct BaseExecutor<S: StatementStrategy> {
    context: ExecutorContext,
    strategy: S,
    state: Mutex<LocalState>,
    closed: AtomicBool,
}

impl<S: StatementStrategy> BaseExecutor<S> {
    pub fn with_strategy(configuration: Arc<Configuration>, transaction: Arc<dyn Transaction>, strategy: S) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let wrapper: Weak<dyn Executor> = weak.clone();
            Self {
                context: ExecutorContext {
                    configuration,
                    transaction,
                    wrapper: RwLock::new(wrapper),
                    creator: thread::current().id(),
                },
                strategy,
                state: Mutex::new(LocalState::default()),
                closed: AtomicBool::new(false),
            }
        })
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.context
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DbError::Executor("Executor was closed.".into()));
        }
        Ok(())
    }

    fn local_lookup(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        key: &CacheKey,
        bound_sql: &BoundSql,
    ) -> Result<Option<ResultList>> {
        let (list, cached_parameter) = {
            let state = self.state.lock()?;
            match state.local_cache.get(key) {
                None => return Ok(None),
                Some(LocalEntry::InFlight) => {
                    return Err(DbError::Executor(format!(
                        "Result for statement '{}' is still being loaded under key {}",
                        ms.id, key
                    )));
                }
                Some(LocalEntry::Loaded(list)) => {
                    (list.clone(), state.output_parameters.get(key).cloned())
                }
            }
        };
        trace!("Local cache hit for '{}'", ms.id);
        if ms.statement_type == StatementType::Callable {
            restore_output_parameters(cached_parameter, parameter, bound_sql)?;
        }
        Ok(Some(list))
    }

    fn query_from_database(
        &self,
        ms: &Arc<MappedStatement>,
        parameter: &Node,
        bounds: RowBounds,
        handler: Option<&mut dyn ResultHandler>,
        key: &CacheKey,
        bound_sql: BoundSql,
    ) -> Result<ResultList> {
        let cacheable = !key.is_null();
        if cacheable {
            self.state.lock()?.local_cache.insert(key.clone(), LocalEntry::InFlight);
        }
        let outcome = self
            .strategy
            .do_query(&self.context, ms, parameter, bounds, handler, bound_sql);

        let mut state = self.state.lock()?;
        if cacheable {
            state.local_cache.remove(key);
        }
        let list = outcome?;
        if cacheable {
            state.local_cache.insert(key.clone(), LocalEntry::Loaded(list.clone()));
            if ms.statement_type == StatementType::Callable {
                state.output_parameters.insert(key.clone(), parameter.clone());
            }
        }
        Ok(list)
    }

    /// Runs queued deferred loads in FIFO order. Each load is taken under the
    /// lock and applied outside it.
    fn drain_deferred_loads(&self) -> Result<()> {
        loop {
            let next = {
                let mut state = self.state.lock()?;
                match state.deferred_loads.pop_front() {
                    Some(load) => {
                        let list = state.loaded(load.key());
                        Some((load, list))
                    }
                    None => None,
                }
            };
            let Some((load, list)) = next else {
                return Ok(());
            };
            match list {
                Some(list) => load.apply(&list)?,
                None => debug!(
                    "Skipping deferred load of '{}': no cached result for key {}",
                    load.property(),
                    load.key()
                ),
            }
        }
    }
}

fn restore_output_parameters(cached: Option<Node>, parameter: &Node, bound_sql: &BoundSql) -> Result<()> {
    let Some(cached) = cached else {
        return Ok(());
    };
    if parameter.is_null() {
        return Ok(());
    }
    for mapping in bound_sql.parameter_mappings.iter().filter(|m| m.is_output()) {
        let value = cached.get_path(&mapping.property)?.unwrap_or_else(Node::null);
        parameter.set_path(&mapping.property, value)?;
    }
    Ok(())
}

impl<S: StatementStrategy> Executor for BaseExecutor<S> {
    fn transaction(&self) -> Result<Arc<dyn Transaction>> {
        self.ensure_open()?;
        Ok(self.context.transaction.clone())
    }

    fn update(&self, ms: &Arc<MappedStatement>, parameter: &Node) -> Result<i64> {
        self.ensure_open()?;
        debug!("Executing update '{}'", ms.id);
        self.clear_local_cache();
        self.strategy.do_update(&self.context, ms, parameter)
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
        self.ensure_open()?;
        {
            let mut state = self.state.lock()?;
            if state.query_stack == 0 && ms.flush_cache_required {
                state.clear_caches();
            }
            state.query_stack += 1;
        }

        let outcome = match handler {
            None if !key.is_null() => match self.local_lookup(ms, parameter, &key, &bound_sql) {
                Ok(Some(list)) => Ok(list),
                Ok(None) => self.query_from_database(ms, parameter, bounds, None, &key, bound_sql),
                Err(e) => Err(e),
            },
            handler => self.query_from_database(ms, parameter, bounds, handler, &key, bound_sql),
        };

        let outermost = {
            let mut state = self.state.lock()?;
            state.query_stack = state.query_stack.saturating_sub(1);
            state.query_stack == 0
        };
        let list = outcome?;

        if outermost {
            self.drain_deferred_loads()?;
            if self.context.configuration.settings().local_cache_scope == LocalCacheScope::Statement {
                self.clear_local_cache();
            }
        }
        Ok(list)
    }

    fn query_cursor(&self, ms: &Arc<MappedStatement>, parameter: &Node, bounds: RowBounds) -> Result<Cursor> {
        self.ensure_open()?;
        let bound_sql = ms.bound_sql(parameter)?;
        self.strategy
            .do_query_cursor(&self.context, ms, parameter, bounds, bound_sql)
    }

    fn flush_statements(&self) -> Result<Vec<BatchResult>> {
        self.ensure_open()?;
        self.strategy.do_flush_statements(&self.context, false)
    }

    fn commit(&self, required: bool) -> Result<()> {
        if self.is_closed() {
            return Err(DbError::Executor(
                "Cannot commit, transaction is already closed".into(),
            ));
        }
        self.clear_local_cache();
        self.flush_statements()?;
        if required {
            self.context.transaction.commit()?;
        }
        Ok(())
    }

    fn rollback(&self, required: bool) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.clear_local_cache();
        let flushed = self.strategy.do_flush_statements(&self.context, true);
        if required {
            self.context.transaction.rollback()?;
        }
        flushed.map(|_| ())
    }

    fn create_cache_key(
        &self,
        ms: &Arc<MappedStatement>,
        _parameter: &Node,
        bounds: RowBounds,
        bound_sql: &BoundSql,
    ) -> Result<CacheKey> {
        self.ensure_open()?;
        let mut key = CacheKey::new();
        key.update(ms.id.as_str());
        key.update(bounds.offset);
        key.update(bounds.limit);
        key.update(bound_sql.sql.as_str());
        for mapping in &bound_sql.parameter_mappings {
            if mapping.mode != ParameterMode::Out {
                key.update(bound_sql.parameter_value(&mapping.property)?);
            }
        }
        if let Some(environment) = self.context.configuration.environment() {
            key.update(environment.id.as_str());
        }
        Ok(key)
    }

    fn is_cached(&self, _ms: &Arc<MappedStatement>, key: &CacheKey) -> bool {
        self.state
            .lock()
            .map(|state| state.local_cache.contains_key(key))
            .unwrap_or(false)
    }

    fn clear_local_cache(&self) {
        if self.is_closed() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.clear_caches();
        }
    }

    fn defer_load(
        &self,
        _ms: &Arc<MappedStatement>,
        target: &ObjectRef,
        property: &str,
        key: CacheKey,
        kind: TargetKind,
    ) -> Result<()> {
        self.ensure_open()?;
        let load = DeferredLoad::new(target.clone(), property, key, kind);
        let ready = {
            let mut state = self.state.lock()?;
            match state.loaded(load.key()) {
                Some(list) => Some((load, list)),
                None => {
                    state.deferred_loads.push_back(load);
                    None
                }
            }
        };
        match ready {
            Some((load, list)) => load.apply(&list),
            None => Ok(()),
        }
    }

    fn close(&self, force_rollback: bool) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.rollback(force_rollback) {
            warn!("Unexpected exception on closing transaction.  Cause: {}", e);
        }
        if let Err(e) = self.context.transaction.close() {
            warn!("Unexpected exception on closing transaction.  Cause: {}", e);
        }
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut state) = self.state.lock() {
            *state = LocalState::default();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_executor_wrapper(&self, wrapper: Weak<dyn Executor>) -> Result<()> {
        *self.context.wrapper.write()? = wrapper;
        Ok(())
    }
}
