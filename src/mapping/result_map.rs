use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::codec::TypeHandler;
use crate::core::{ColumnType, DataType, Value};

/// Shape of the objects a result map produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Object(ObjectType),
    /// Open property bag; every column is a property.
    Map,
    /// Whole row collapses to one converted column value.
    Scalar(DataType),
}

impl ResultType {
    pub fn object(name: impl Into<String>) -> Self {
        ResultType::Object(ObjectType::new(name))
    }

    pub fn type_name(&self) -> String {
        match self {
            ResultType::Object(ty) => ty.name.clone(),
            ResultType::Map => "map".to_string(),
            ResultType::Scalar(ty) => ty.to_string(),
        }
    }

    /// Declared property types, or `None` for open shapes.
    pub fn declared(&self) -> Option<&BTreeMap<String, DataType>> {
        match self {
            ResultType::Object(ty) => ty.properties.as_ref(),
            _ => None,
        }
    }
}

/// Named object type, optionally declaring its scalar properties.
///
/// Declared types restrict auto-mapping to the declared names and give the
/// property type used to pick a value codec. Undeclared types accept any
/// property.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub name: String,
    pub properties: Option<BTreeMap<String, DataType>>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: None,
        }
    }

    pub fn property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), data_type);
        self
    }
}

/// Resolves a column-derived name to a property of `result_type`.
/// Declared properties are matched case-insensitively.
pub fn find_property(result_type: &ResultType, name: &str, underscore_to_camel: bool) -> Option<String> {
    match result_type.declared() {
        Some(properties) => {
            let wanted = if underscore_to_camel {
                name.replace('_', "")
            } else {
                name.to_string()
            };
            properties
                .keys()
                .find(|p| p.eq_ignore_ascii_case(&wanted))
                .cloned()
        }
        None if underscore_to_camel => Some(to_camel_case(name)),
        None => Some(name.to_string()),
    }
}

fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for (i, ch) in name.chars().enumerate() {
        if ch == '_' {
            upper_next = i > 0;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchType {
    Lazy,
    Eager,
}

/// One property/column rule of a result map.
#[derive(Clone)]
pub struct ResultMapping {
    pub property: String,
    pub column: Option<String>,
    pub data_type: DataType,
    pub column_type: Option<ColumnType>,
    pub type_handler: Option<Arc<dyn TypeHandler>>,
    pub id: bool,
    pub constructor: bool,
    pub nested_query_id: Option<String>,
    pub nested_result_map_id: Option<String>,
    pub column_prefix: Option<String>,
    pub not_null_columns: BTreeSet<String>,
    pub foreign_column: Option<String>,
    pub result_set: Option<String>,
    pub composites: Vec<ResultMapping>,
    pub fetch: Option<FetchType>,
    pub collection: bool,
}

impl ResultMapping {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            column: None,
            data_type: DataType::Any,
            column_type: None,
            type_handler: None,
            id: false,
            constructor: false,
            nested_query_id: None,
            nested_result_map_id: None,
            column_prefix: None,
            not_null_columns: BTreeSet::new(),
            foreign_column: None,
            result_set: None,
            composites: Vec::new(),
            fetch: None,
            collection: false,
        }
    }

    /// Plain `property <- column` rule.
    pub fn column_of(property: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(property).column(column)
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn column_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }

    pub fn type_handler(mut self, handler: Arc<dyn TypeHandler>) -> Self {
        self.type_handler = Some(handler);
        self
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    pub fn constructor(mut self) -> Self {
        self.constructor = true;
        self
    }

    pub fn nested_query(mut self, statement_id: impl Into<String>) -> Self {
        self.nested_query_id = Some(statement_id.into());
        self
    }

    pub fn nested_result_map(mut self, result_map_id: impl Into<String>) -> Self {
        self.nested_result_map_id = Some(result_map_id.into());
        self
    }

    pub fn column_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.column_prefix = Some(prefix.into());
        self
    }

    pub fn not_null_columns(mut self, columns: &[&str]) -> Self {
        self.not_null_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn foreign_column(mut self, column: impl Into<String>) -> Self {
        self.foreign_column = Some(column.into());
        self
    }

    pub fn result_set(mut self, name: impl Into<String>) -> Self {
        self.result_set = Some(name.into());
        self
    }

    /// Adds one `property=column` pair of a composite nested-query key.
    pub fn composite(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.composites.push(ResultMapping::column_of(property, column));
        self
    }

    pub fn fetch(mut self, fetch: FetchType) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn collection(mut self) -> Self {
        self.collection = true;
        self
    }

    pub fn is_composite(&self) -> bool {
        !self.composites.is_empty()
    }

    /// Joined nested map, as opposed to one fed from a separate result set.
    pub fn has_joined_result_map(&self) -> bool {
        self.nested_result_map_id.is_some() && self.result_set.is_none()
    }

    pub fn is_lazy(&self, lazy_loading_enabled: bool) -> bool {
        match self.fetch {
            Some(fetch) => fetch == FetchType::Lazy,
            None => lazy_loading_enabled,
        }
    }
}

impl fmt::Debug for ResultMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultMapping")
            .field("property", &self.property)
            .field("column", &self.column)
            .field("nested_query_id", &self.nested_query_id)
            .field("nested_result_map_id", &self.nested_result_map_id)
            .field("result_set", &self.result_set)
            .finish()
    }
}

/// Column-driven selection of a result map variant.
#[derive(Debug, Clone)]
pub struct Discriminator {
    pub column: String,
    pub data_type: DataType,
    pub column_type: Option<ColumnType>,
    cases: HashMap<String, String>,
}

impl Discriminator {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            data_type: DataType::Any,
            column_type: None,
            cases: HashMap::new(),
        }
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn case(mut self, value: impl Into<String>, result_map_id: impl Into<String>) -> Self {
        self.cases.insert(value.into(), result_map_id.into());
        self
    }

    pub fn map_id_for(&self, value: &Value) -> Option<&str> {
        self.cases.get(&value.to_key_string()).map(String::as_str)
    }
}

/// Declared mapping from rows to one object shape.
pub struct ResultMap {
    pub id: String,
    pub result_type: ResultType,
    pub result_mappings: Vec<Arc<ResultMapping>>,
    pub id_result_mappings: Vec<Arc<ResultMapping>>,
    pub constructor_result_mappings: Vec<Arc<ResultMapping>>,
    pub property_result_mappings: Vec<Arc<ResultMapping>>,
    /// Upper-cased columns claimed by explicit mappings.
    pub mapped_columns: HashSet<String>,
    pub mapped_properties: HashSet<String>,
    pub discriminator: Option<Arc<Discriminator>>,
    pub has_nested_result_maps: bool,
    pub has_nested_queries: bool,
    pub auto_mapping: Option<bool>,
}

impl ResultMap {
    pub fn builder(id: impl Into<String>, result_type: ResultType) -> ResultMapBuilder {
        ResultMapBuilder {
            id: id.into(),
            result_type,
            mappings: Vec::new(),
            discriminator: None,
            auto_mapping: None,
        }
    }
}

impl fmt::Debug for ResultMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultMap")
            .field("id", &self.id)
            .field("result_type", &self.result_type)
            .field("mappings", &self.result_mappings.len())
            .finish()
    }
}

pub struct ResultMapBuilder {
    id: String,
    result_type: ResultType,
    mappings: Vec<ResultMapping>,
    discriminator: Option<Discriminator>,
    auto_mapping: Option<bool>,
}

impl ResultMapBuilder {
    pub fn mapping(mut self, mapping: ResultMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn discriminator(mut self, discriminator: Discriminator) -> Self {
        self.discriminator = Some(discriminator);
        self
    }

    pub fn auto_mapping(mut self, enabled: bool) -> Self {
        self.auto_mapping = Some(enabled);
        self
    }

    pub fn build(self) -> Arc<ResultMap> {
        let mut mapped_columns = HashSet::new();
        let mut mapped_properties = HashSet::new();
        let mut id_result_mappings = Vec::new();
        let mut constructor_result_mappings = Vec::new();
        let mut property_result_mappings = Vec::new();
        let mut has_nested_result_maps = false;
        let mut has_nested_queries = false;

        let result_mappings: Vec<Arc<ResultMapping>> = self.mappings.into_iter().map(Arc::new).collect();

        for mapping in &result_mappings {
            has_nested_queries |= mapping.nested_query_id.is_some();
            has_nested_result_maps |= mapping.has_joined_result_map();

            if let Some(column) = &mapping.column {
                mapped_columns.insert(column.to_uppercase());
            } else if mapping.is_composite() {
                for composite in &mapping.composites {
                    if let Some(column) = &composite.column {
                        mapped_columns.insert(column.to_uppercase());
                    }
                }
            }

            if !mapping.property.is_empty() {
                mapped_properties.insert(mapping.property.clone());
            }
            if mapping.constructor {
                constructor_result_mappings.push(mapping.clone());
            } else {
                property_result_mappings.push(mapping.clone());
            }
            if mapping.id {
                id_result_mappings.push(mapping.clone());
            }
        }

        if id_result_mappings.is_empty() {
            id_result_mappings = result_mappings.clone();
        }

        Arc::new(ResultMap {
            id: self.id,
            result_type: self.result_type,
            result_mappings,
            id_result_mappings,
            constructor_result_mappings,
            property_result_mappings,
            mapped_columns,
            mapped_properties,
            discriminator: self.discriminator.map(Arc::new),
            has_nested_result_maps,
            has_nested_queries,
            auto_mapping: self.auto_mapping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_derives_mapping_sets() {
        let map = ResultMap::builder("blog", ResultType::object("Blog"))
            .mapping(ResultMapping::column_of("id", "blog_id").id())
            .mapping(ResultMapping::column_of("title", "Title"))
            .mapping(
                ResultMapping::new("posts")
                    .nested_result_map("post")
                    .collection(),
            )
            .mapping(ResultMapping::new("author").nested_query("selectAuthor").column("author_id"))
            .build();

        assert_eq!(map.id_result_mappings.len(), 1);
        assert_eq!(map.property_result_mappings.len(), 4);
        assert!(map.mapped_columns.contains("TITLE"));
        assert!(map.mapped_columns.contains("AUTHOR_ID"));
        assert!(map.has_nested_result_maps);
        assert!(map.has_nested_queries);
    }

    #[test]
    fn test_ids_default_to_all_mappings() {
        let map = ResultMap::builder("tag", ResultType::Map)
            .mapping(ResultMapping::column_of("name", "name"))
            .build();
        assert_eq!(map.id_result_mappings.len(), 1);
    }

    #[test]
    fn test_find_property() {
        let declared = ResultType::Object(
            ObjectType::new("User")
                .property("firstName", DataType::Text)
                .property("id", DataType::Integer),
        );
        assert_eq!(find_property(&declared, "ID", false), Some("id".to_string()));
        assert_eq!(
            find_property(&declared, "first_name", true),
            Some("firstName".to_string())
        );
        assert_eq!(find_property(&declared, "first_name", false), None);
        assert_eq!(
            find_property(&ResultType::Map, "LAST_NAME", true),
            Some("lastName".to_string())
        );
    }

    #[test]
    fn test_discriminator_cases_match_text() {
        let d = Discriminator::new("kind").case("1", "car").case("null", "unknown");
        assert_eq!(d.map_id_for(&Value::Integer(1)), Some("car"));
        assert_eq!(d.map_id_for(&Value::Null), Some("unknown"));
        assert_eq!(d.map_id_for(&Value::Integer(2)), None);
    }
}
