use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::codec::{TypeHandler, TypeHandlerRegistry};
use crate::core::{ColumnType, DataType, DbError, Result, Value};
use crate::driver::{close_result_set, ResultSet};
use crate::mapping::ResultMap;

/// Prefixes a column name; an empty prefix leaves it as is.
pub(crate) fn prepend_prefix(column: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() && !column.is_empty() => format!("{}{}", prefix, column),
        _ => column.to_string(),
    }
}

/// A driver result set plus column lookups by name.
///
/// Columns are matched case-insensitively. The split of columns into mapped
/// and unmapped is computed once per (result map, column prefix).
pub struct ResultSetWrapper {
    result_set: Box<dyn ResultSet>,
    column_names: Vec<String>,
    column_types: Vec<ColumnType>,
    index: HashMap<String, usize>,
    mapped_columns: HashMap<String, Arc<HashSet<String>>>,
    unmapped_columns: HashMap<String, Arc<Vec<String>>>,
}

impl ResultSetWrapper {
    pub fn new(result_set: Box<dyn ResultSet>) -> Self {
        let column_names: Vec<String> = result_set.columns().iter().map(|c| c.name.clone()).collect();
        let column_types = result_set.columns().iter().map(|c| c.column_type).collect();
        let mut index = HashMap::new();
        for (i, name) in column_names.iter().enumerate() {
            // first occurrence wins for duplicated labels
            index.entry(name.to_uppercase()).or_insert(i);
        }
        Self {
            result_set,
            column_names,
            column_types,
            index,
            mapped_columns: HashMap::new(),
            unmapped_columns: HashMap::new(),
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.position(column).map(|i| self.column_types[i])
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.index.get(&column.to_uppercase()).copied()
    }

    fn require(&self, column: &str) -> Result<usize> {
        self.position(column)
            .ok_or_else(|| DbError::Execution(format!("Column '{}' not found in result set", column)))
    }

    pub fn next(&mut self) -> Result<bool> {
        self.result_set.next()
    }

    pub fn is_closed(&self) -> bool {
        self.result_set.is_closed()
    }

    pub fn close(&mut self) {
        if !self.result_set.is_closed() {
            close_result_set(self.result_set.as_mut());
        }
    }

    /// Current row's value for `column`, unconverted.
    pub fn raw_value(&self, column: &str) -> Result<Value> {
        let index = self.require(column)?;
        self.result_set.value(index)
    }

    /// Current row's value for `column`, converted by `handler`.
    pub fn get(&self, column: &str, handler: &dyn TypeHandler) -> Result<Value> {
        let index = self.require(column)?;
        handler.get_result(self.result_set.as_ref(), index)
    }

    pub fn type_handler(
        &self,
        registry: &TypeHandlerRegistry,
        data_type: DataType,
        column: &str,
    ) -> Arc<dyn TypeHandler> {
        let column_type = self.column_type(column).unwrap_or(ColumnType::Other);
        registry.for_column(data_type, column_type)
    }

    /// Upper-cased result columns claimed by `result_map` under `prefix`.
    pub fn mapped_column_names(&mut self, result_map: &ResultMap, prefix: Option<&str>) -> Arc<HashSet<String>> {
        let key = partition_key(result_map, prefix);
        if !self.mapped_columns.contains_key(&key) {
            self.partition_columns(result_map, prefix, &key);
        }
        self.mapped_columns.get(&key).cloned().unwrap_or_default()
    }

    /// Result columns, in original case, that `result_map` leaves unclaimed.
    pub fn unmapped_column_names(&mut self, result_map: &ResultMap, prefix: Option<&str>) -> Arc<Vec<String>> {
        let key = partition_key(result_map, prefix);
        if !self.unmapped_columns.contains_key(&key) {
            self.partition_columns(result_map, prefix, &key);
        }
        self.unmapped_columns.get(&key).cloned().unwrap_or_default()
    }

    fn partition_columns(&mut self, result_map: &ResultMap, prefix: Option<&str>, key: &str) {
        let upper_prefix = prefix.map(str::to_uppercase);
        let claimed: HashSet<String> = result_map
            .mapped_columns
            .iter()
            .map(|c| prepend_prefix(c, upper_prefix.as_deref()))
            .collect();

        let mut mapped = HashSet::new();
        let mut unmapped = Vec::new();
        for name in &self.column_names {
            let upper = name.to_uppercase();
            if claimed.contains(&upper) {
                mapped.insert(upper);
            } else {
                unmapped.push(name.clone());
            }
        }
        self.mapped_columns.insert(key.to_string(), Arc::new(mapped));
        self.unmapped_columns.insert(key.to_string(), Arc::new(unmapped));
    }
}

fn partition_key(result_map: &ResultMap, prefix: Option<&str>) -> String {
    format!("{}:{}", result_map.id, prefix.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDataSource, MemoryTable, Response};
    use crate::driver::{DataSource, PrepareOptions};
    use crate::mapping::{ResultMapping, ResultType};

    fn wrapper() -> ResultSetWrapper {
        let ds = MemoryDataSource::new();
        ds.on("q", |_| {
            Ok(Response::table(
                MemoryTable::new(&[
                    ("id", ColumnType::Integer),
                    ("Name", ColumnType::Varchar),
                    ("author_id", ColumnType::Integer),
                    ("author_name", ColumnType::Varchar),
                ])
                .row(vec![1i64.into(), "post".into(), 7i64.into(), "ann".into()]),
            ))
        });
        let mut connection = ds.connection().unwrap();
        let mut statement = connection.prepare("q", &PrepareOptions::default()).unwrap();
        statement.execute().unwrap();
        ResultSetWrapper::new(statement.next_result_set().unwrap().unwrap())
    }

    #[test]
    fn test_columns_resolve_case_insensitively() {
        let mut rsw = wrapper();
        assert!(rsw.next().unwrap());
        assert_eq!(rsw.raw_value("NAME").unwrap(), Value::from("post"));
        assert_eq!(rsw.column_type("Author_Id"), Some(ColumnType::Integer));
        assert!(rsw.raw_value("missing").is_err());
    }

    #[test]
    fn test_mapped_and_unmapped_partition_with_prefix() {
        let mut rsw = wrapper();
        let author = ResultMap::builder("author", ResultType::Map)
            .mapping(ResultMapping::column_of("id", "id"))
            .build();

        let mapped = rsw.mapped_column_names(&author, Some("author_"));
        assert!(mapped.contains("AUTHOR_ID"));
        assert!(!mapped.contains("ID"));

        let unmapped = rsw.unmapped_column_names(&author, Some("author_"));
        assert_eq!(
            unmapped.as_slice(),
            &["id".to_string(), "Name".to_string(), "author_name".to_string()]
        );
    }
}
