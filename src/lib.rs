// ============================================================================
// RustSqlMap Library
// ============================================================================
//
// Query execution and result mapping over a pluggable relational driver.
//
//   session      -> SessionFactory / Session facade, Settings, Configuration
//   executor     -> Simple, Reuse, Batch executors + shared-cache decorator
//   result       -> result set to object graph mapping
//   cursor       -> row-by-row mapping of an open result set
//   cache        -> CacheKey, shared cache decorators, transactional buffer
//   mapping      -> mapped statements, result maps, bound SQL
//   object       -> dynamic object graph rows are mapped into
//   codec        -> value conversion between driver and object graph
//   driver       -> driver capability traits and the in-memory driver
//   transaction  -> transactions and environments
//
// ============================================================================

//! Mapping queries to object graphs.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use rustsqlmap::core::ColumnType;
//! use rustsqlmap::driver::memory::{MemoryDataSource, MemoryTable};
//! use rustsqlmap::mapping::{MappedStatement, ResultMap, ResultType, SqlCommandType, StaticSqlSource};
//! use rustsqlmap::object::Node;
//! use rustsqlmap::session::{Configuration, SessionFactory, Settings};
//! use rustsqlmap::transaction::Environment;
//!
//! # fn main() -> rustsqlmap::Result<()> {
//! let ds = MemoryDataSource::new();
//! ds.on_query(
//!     "select name from users",
//!     MemoryTable::new(&[("name", ColumnType::Varchar)]).row(vec!["ann".into()]),
//! );
//!
//! let mut configuration = Configuration::new(Settings::default())
//!     .with_environment(Environment::new("dev", Arc::new(ds.clone())));
//! configuration.add_mapped_statement(
//!     MappedStatement::builder("selectNames", SqlCommandType::Select, StaticSqlSource::new("select name from users"))
//!         .result_map(ResultMap::builder("selectNames-Inline", ResultType::Map).build())
//!         .build(),
//! )?;
//!
//! let session = SessionFactory::new(configuration).open()?;
//! let names = session.select_list("selectNames", &Node::null())?;
//! assert_eq!(names[0].path_value("name")?, "ann".into());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod codec;
pub mod core;
pub mod cursor;
pub mod driver;
pub mod executor;
pub mod mapping;
pub mod object;
pub mod prelude;
pub mod result;
pub mod session;
pub mod transaction;

pub use core::{DataType, DbError, Result, Value};
pub use cursor::Cursor;
pub use object::Node;
pub use session::{Configuration, Session, SessionFactory, Settings};
