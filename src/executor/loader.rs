use log::debug;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use super::{Executor, TargetKind};
use crate::cache::CacheKey;
use crate::core::{DbError, Result};
use crate::mapping::{BoundSql, MappedStatement, RowBounds};
use crate::object::{LazyLoad, ListRef, Node, ObjectRef};
use crate::session::{Configuration, ExecutorType};

/// Shapes a nested query result for assignment to a property.
pub fn extract_from_list(list: &[Node], kind: TargetKind) -> Result<Node> {
    match kind {
        TargetKind::Collection => Ok(Node::List(ListRef::from_vec(list.to_vec()))),
        TargetKind::Single => match list {
            [] => Ok(Node::null()),
            [single] => Ok(single.clone()),
            _ => Err(DbError::TooManyResults(
                "Statement returned more than one row, where no more than one was expected.".into(),
            )),
        },
    }
}

/// Property assignment waiting for a nested result that was in flight.
pub(crate) struct DeferredLoad {
    target: ObjectRef,
    property: String,
    key: CacheKey,
    kind: TargetKind,
}

impl DeferredLoad {
    pub(crate) fn new(target: ObjectRef, property: &str, key: CacheKey, kind: TargetKind) -> Self {
        Self {
            target,
            property: property.to_string(),
            key,
            kind,
        }
    }

    pub(crate) fn key(&self) -> &CacheKey {
        &self.key
    }

    pub(crate) fn property(&self) -> &str {
        &self.property
    }

    pub(crate) fn apply(&self, list: &[Node]) -> Result<()> {
        let value = extract_from_list(list, self.kind)?;
        debug!("Deferred load assigns '{}'", self.property);
        Node::Object(self.target.clone()).set_path(&self.property, value)
    }
}

/// Runs one nested query, eagerly or from a lazy property slot.
///
/// Holds its executor weakly. When the executor is gone, closed, or owned by
/// another thread, the query runs on a short-lived executor over a fresh
/// transaction that is closed right after.
pub struct ResultLoader {
    configuration: Arc<Configuration>,
    executor: Weak<dyn Executor>,
    creator: ThreadId,
    mapped_statement: Arc<MappedStatement>,
    parameter: Node,
    kind: TargetKind,
    key: CacheKey,
    bound_sql: BoundSql,
}

impl ResultLoader {
    pub fn new(
        configuration: Arc<Configuration>,
        executor: &Arc<dyn Executor>,
        mapped_statement: Arc<MappedStatement>,
        parameter: Node,
        kind: TargetKind,
        key: CacheKey,
        bound_sql: BoundSql,
    ) -> Self {
        Self {
            configuration,
            executor: Arc::downgrade(executor),
            creator: thread::current().id(),
            mapped_statement,
            parameter,
            kind,
            key,
            bound_sql,
        }
    }

    pub fn load_result(&self) -> Result<Node> {
        let list = self.select_list()?;
        extract_from_list(&list, self.kind)
    }

    fn select_list(&self) -> Result<Arc<Vec<Node>>> {
        let current = self
            .executor
            .upgrade()
            .filter(|executor| thread::current().id() == self.creator && !executor.is_closed());

        match current {
            Some(executor) => self.run_on(executor.as_ref()),
            None => {
                debug!("Loading '{}' on a replacement executor", self.mapped_statement.id);
                let executor = self.new_executor()?;
                let outcome = self.run_on(executor.as_ref());
                executor.close(false);
                outcome
            }
        }
    }

    fn run_on(&self, executor: &dyn Executor) -> Result<Arc<Vec<Node>>> {
        executor.query_with_key(
            &self.mapped_statement,
            &self.parameter,
            RowBounds::DEFAULT,
            None,
            self.key.clone(),
            self.bound_sql.clone(),
        )
    }

    fn new_executor(&self) -> Result<Arc<dyn Executor>> {
        let environment = self.configuration.environment().ok_or_else(|| {
            DbError::Configuration(
                "ResultLoader could not load lazily.  Environment was not configured.".into(),
            )
        })?;
        let transaction = environment.new_transaction(false);
        Ok(self.configuration.new_executor(transaction, ExecutorType::Simple))
    }
}

impl LazyLoad for ResultLoader {
    fn load(&self) -> Result<Node> {
        self.load_result()
    }
}
