//! Recommended API entrypoints grouped by abstraction level.
//!
//! `api` covers sessions, statement and result map declarations.
//! `advanced` exposes executors, caches and the driver layer directly.

pub mod api {
    //! Everyday surface: declare statements, open sessions, read object graphs.
    pub use crate::mapping::{
        Discriminator, FetchType, KeyGenerator, MappedStatement, ObjectType, ParameterMapping,
        ParameterMode, ResultMap, ResultMapping, ResultType, RowBounds, SqlCommandType,
        StatementType, StaticSqlSource,
    };
    pub use crate::object::{ListRef, Node, ObjectRef};
    pub use crate::result::{ResultContext, ResultHandler};
    pub use crate::session::{Configuration, ExecutorType, Session, SessionFactory, Settings};
    pub use crate::transaction::Environment;
    pub use crate::{Cursor, DataType, DbError, Result, Value};
}

pub mod advanced {
    //! Escape hatch for executor, cache and driver internals.
    pub use crate::cache::{Cache, CacheBuilder, CacheKey, Eviction};
    pub use crate::codec::{TypeHandler, TypeHandlerRegistry};
    pub use crate::driver::{Connection, DataSource, ResultSet, Statement};
    pub use crate::executor::{
        BatchExecutor, BatchResult, CachingExecutor, Executor, ReuseExecutor, SimpleExecutor,
    };
    pub use crate::transaction::Transaction;
}
