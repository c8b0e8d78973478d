use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ExecutorType, Settings};
use crate::cache::Cache;
use crate::codec::TypeHandlerRegistry;
use crate::core::{DbError, Result};
use crate::executor::{BatchExecutor, CachingExecutor, Executor, ReuseExecutor, SimpleExecutor};
use crate::mapping::{MappedStatement, ResultMap};
use crate::object::{DefaultObjectFactory, ObjectFactory};
use crate::transaction::{Environment, Transaction};

/// Registry of everything a session needs: statements, result maps,
/// shared caches, codecs, the object factory and the data source.
///
/// Built once, then shared read-only behind an `Arc`.
pub struct Configuration {
    settings: Settings,
    environment: Option<Environment>,
    mapped_statements: HashMap<String, Arc<MappedStatement>>,
    result_maps: HashMap<String, Arc<ResultMap>>,
    caches: HashMap<String, Arc<dyn Cache>>,
    type_handlers: TypeHandlerRegistry,
    object_factory: Arc<dyn ObjectFactory>,
}

impl Configuration {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            environment: None,
            mapped_statements: HashMap::new(),
            result_maps: HashMap::new(),
            caches: HashMap::new(),
            type_handlers: TypeHandlerRegistry::new(),
            object_factory: Arc::new(DefaultObjectFactory),
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_object_factory(mut self, factory: Arc<dyn ObjectFactory>) -> Self {
        self.object_factory = factory;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    pub fn type_handlers(&self) -> &TypeHandlerRegistry {
        &self.type_handlers
    }

    pub fn type_handlers_mut(&mut self) -> &mut TypeHandlerRegistry {
        &mut self.type_handlers
    }

    pub fn object_factory(&self) -> &dyn ObjectFactory {
        self.object_factory.as_ref()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a statement together with its inline result maps.
    pub fn add_mapped_statement(&mut self, statement: Arc<MappedStatement>) -> Result<()> {
        if self.mapped_statements.contains_key(&statement.id) {
            return Err(DbError::Configuration(format!(
                "Mapped Statements collection already contains key {}",
                statement.id
            )));
        }
        for result_map in &statement.result_maps {
            if !self.result_maps.contains_key(&result_map.id) {
                self.result_maps.insert(result_map.id.clone(), result_map.clone());
            }
        }
        if let Some(cache) = &statement.cache {
            self.caches.entry(cache.id().to_string()).or_insert_with(|| cache.clone());
        }
        debug!("Registered mapped statement '{}'", statement.id);
        self.mapped_statements.insert(statement.id.clone(), statement);
        Ok(())
    }

    pub fn add_result_map(&mut self, result_map: Arc<ResultMap>) -> Result<()> {
        if self.result_maps.contains_key(&result_map.id) {
            return Err(DbError::Configuration(format!(
                "Result Maps collection already contains key {}",
                result_map.id
            )));
        }
        self.result_maps.insert(result_map.id.clone(), result_map);
        Ok(())
    }

    pub fn add_cache(&mut self, cache: Arc<dyn Cache>) -> Result<()> {
        let id = cache.id().to_string();
        if self.caches.contains_key(&id) {
            return Err(DbError::Configuration(format!("Caches collection already contains key {}", id)));
        }
        self.caches.insert(id, cache);
        Ok(())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn mapped_statement(&self, id: &str) -> Result<Arc<MappedStatement>> {
        self.mapped_statements
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::Configuration(format!("Mapped Statements collection does not contain value for {}", id)))
    }

    pub fn has_mapped_statement(&self, id: &str) -> bool {
        self.mapped_statements.contains_key(id)
    }

    pub fn result_map(&self, id: &str) -> Result<Arc<ResultMap>> {
        self.result_maps
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::Configuration(format!("Result Maps collection does not contain value for {}", id)))
    }

    pub fn has_result_map(&self, id: &str) -> bool {
        self.result_maps.contains_key(id)
    }

    pub fn cache(&self, id: &str) -> Result<Arc<dyn Cache>> {
        self.caches
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::Configuration(format!("Caches collection does not contain value for {}", id)))
    }

    // ========================================================================
    // Executors
    // ========================================================================

    /// Builds an executor of `executor_type` over `transaction`, behind the
    /// shared-cache layer when caching is enabled.
    pub fn new_executor(self: &Arc<Self>, transaction: Arc<dyn Transaction>, executor_type: ExecutorType) -> Arc<dyn Executor> {
        let executor: Arc<dyn Executor> = match executor_type {
            ExecutorType::Simple => SimpleExecutor::new(self.clone(), transaction),
            ExecutorType::Reuse => ReuseExecutor::new(self.clone(), transaction),
            ExecutorType::Batch => BatchExecutor::new(self.clone(), transaction),
        };
        if self.settings.cache_enabled {
            CachingExecutor::new(executor)
        } else {
            executor
        }
    }
}
