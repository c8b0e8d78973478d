//! Statement and result descriptors consumed by the executors.

mod result_map;
mod sql;
mod statement;

pub use result_map::{
    find_property, Discriminator, FetchType, ObjectType, ResultMap, ResultMapBuilder, ResultMapping,
    ResultType,
};
pub use sql::{BoundSql, ParameterMapping, ParameterMode, SqlSource, StaticSqlSource};
pub use statement::{
    KeyGenerator, MappedStatement, MappedStatementBuilder, SqlCommandType, StatementType,
};

/// Offset and limit applied while mapping rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl RowBounds {
    pub const NO_ROW_OFFSET: usize = 0;
    pub const NO_ROW_LIMIT: usize = usize::MAX;

    pub const DEFAULT: RowBounds = RowBounds {
        offset: Self::NO_ROW_OFFSET,
        limit: Self::NO_ROW_LIMIT,
    };

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

impl Default for RowBounds {
    fn default() -> Self {
        Self::DEFAULT
    }
}
