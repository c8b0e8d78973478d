//! Connection capability the executors run on.
//!
//! Handles are owned trait objects: a statement outlives the borrow of the
//! connection that prepared it, and a result set outlives the statement call
//! that produced it. This lets cursors and reused statements be stored freely.

pub mod memory;

use std::time::Duration;

use crate::core::{ColumnMeta, ColumnType, Result, Value};

/// Which generated keys the driver should make available after an insert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GeneratedKeys {
    #[default]
    None,
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    pub callable: bool,
    pub generated_keys: GeneratedKeys,
}

pub trait DataSource: Send + Sync {
    fn connection(&self) -> Result<Box<dyn Connection>>;
}

pub trait Connection: Send {
    fn prepare(&mut self, sql: &str, options: &PrepareOptions) -> Result<Box<dyn Statement>>;
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()>;
    fn auto_commit(&self) -> bool;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn is_closed(&self) -> bool;
}

/// Prepared query handle. Parameter indexes are 1-based.
pub trait Statement: Send {
    fn bind(&mut self, index: usize, value: Value) -> Result<()>;
    fn register_out_parameter(&mut self, index: usize, column_type: ColumnType) -> Result<()>;
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Runs a query; its result sets are then pulled with `next_result_set`.
    fn execute(&mut self) -> Result<()>;
    fn execute_update(&mut self) -> Result<i64>;
    fn next_result_set(&mut self) -> Result<Option<Box<dyn ResultSet>>>;
    fn out_parameter(&self, index: usize) -> Result<Value>;

    fn add_batch(&mut self) -> Result<()>;
    /// Per-row update counts. A failing row surfaces as
    /// [`DbError::BatchUpdate`](crate::core::DbError::BatchUpdate).
    fn execute_batch(&mut self) -> Result<Vec<i64>>;
    fn generated_keys(&mut self) -> Result<Option<Box<dyn ResultSet>>>;

    fn close(&mut self) -> Result<()>;
    fn is_closed(&self) -> bool;
}

/// Forward-only row source. Column indexes are 0-based.
pub trait ResultSet: Send {
    fn columns(&self) -> &[ColumnMeta];
    fn next(&mut self) -> Result<bool>;
    fn value(&self, index: usize) -> Result<Value>;
    fn close(&mut self) -> Result<()>;
    fn is_closed(&self) -> bool;
}

/// Closes a statement, logging instead of failing.
pub(crate) fn close_statement(statement: &mut dyn Statement) {
    if let Err(e) = statement.close() {
        log::warn!("Error closing statement: {}", e);
    }
}

pub(crate) fn close_result_set(result_set: &mut dyn ResultSet) {
    if let Err(e) = result_set.close() {
        log::warn!("Error closing result set: {}", e);
    }
}
