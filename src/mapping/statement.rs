use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{BoundSql, ResultMap, SqlSource};
use crate::cache::Cache;
use crate::core::Result;
use crate::object::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlCommandType {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    #[default]
    Prepared,
    /// Stored procedure call; may carry OUT parameters.
    Callable,
}

/// How key properties of an inserted parameter object get filled in.
#[derive(Clone, Default)]
pub enum KeyGenerator {
    #[default]
    None,
    /// Keys generated by the database, read back after execution.
    Generated,
    /// Keys produced by a separate query run before or after the write.
    SelectKey {
        statement: Arc<MappedStatement>,
        execute_before: bool,
    },
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenerator::None => write!(f, "None"),
            KeyGenerator::Generated => write!(f, "Generated"),
            KeyGenerator::SelectKey {
                statement,
                execute_before,
            } => write!(f, "SelectKey({}, before={})", statement.id, execute_before),
        }
    }
}

/// Static description of one named statement.
pub struct MappedStatement {
    pub id: String,
    pub command_type: SqlCommandType,
    pub statement_type: StatementType,
    pub sql_source: Arc<dyn SqlSource>,
    pub result_maps: Vec<Arc<ResultMap>>,
    /// Names of the result sets a multi-result-set call returns, in order.
    pub result_sets: Vec<String>,
    pub cache: Option<Arc<dyn Cache>>,
    pub use_cache: bool,
    pub flush_cache_required: bool,
    pub result_ordered: bool,
    pub key_generator: KeyGenerator,
    pub key_properties: Vec<String>,
    pub key_columns: Vec<String>,
    pub timeout: Option<Duration>,
}

impl MappedStatement {
    pub fn builder(
        id: impl Into<String>,
        command_type: SqlCommandType,
        sql_source: impl SqlSource + 'static,
    ) -> MappedStatementBuilder {
        let is_select = command_type == SqlCommandType::Select;
        MappedStatementBuilder {
            statement: MappedStatement {
                id: id.into(),
                command_type,
                statement_type: StatementType::Prepared,
                sql_source: Arc::new(sql_source),
                result_maps: Vec::new(),
                result_sets: Vec::new(),
                cache: None,
                use_cache: is_select,
                flush_cache_required: !is_select,
                result_ordered: false,
                key_generator: KeyGenerator::None,
                key_properties: Vec::new(),
                key_columns: Vec::new(),
                timeout: None,
            },
        }
    }

    pub fn bound_sql(&self, parameter: &Node) -> Result<BoundSql> {
        self.sql_source.bound_sql(parameter)
    }

    pub fn is_select(&self) -> bool {
        self.command_type == SqlCommandType::Select
    }
}

impl fmt::Debug for MappedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedStatement")
            .field("id", &self.id)
            .field("command_type", &self.command_type)
            .field("statement_type", &self.statement_type)
            .field("cache", &self.cache.as_ref().map(|c| c.id().to_string()))
            .field("key_generator", &self.key_generator)
            .finish()
    }
}

pub struct MappedStatementBuilder {
    statement: MappedStatement,
}

impl MappedStatementBuilder {
    pub fn statement_type(mut self, statement_type: StatementType) -> Self {
        self.statement.statement_type = statement_type;
        self
    }

    pub fn result_map(mut self, result_map: Arc<ResultMap>) -> Self {
        self.statement.result_maps.push(result_map);
        self
    }

    pub fn result_sets(mut self, names: &[&str]) -> Self {
        self.statement.result_sets = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.statement.cache = Some(cache);
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.statement.use_cache = use_cache;
        self
    }

    pub fn flush_cache_required(mut self, flush: bool) -> Self {
        self.statement.flush_cache_required = flush;
        self
    }

    pub fn result_ordered(mut self, ordered: bool) -> Self {
        self.statement.result_ordered = ordered;
        self
    }

    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.statement.key_generator = key_generator;
        self
    }

    pub fn key_properties(mut self, properties: &[&str]) -> Self {
        self.statement.key_properties = properties.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn key_columns(mut self, columns: &[&str]) -> Self {
        self.statement.key_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.statement.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Arc<MappedStatement> {
        Arc::new(self.statement)
    }
}
