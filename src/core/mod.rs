pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{ColumnMeta, ColumnType, DataType, Row};
pub use value::Value;
