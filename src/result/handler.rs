// ============================================================================
// Result Set Handler
// ============================================================================
//
// Maps the result sets of one statement execution. Two row walks exist:
//
//   simple  -> one object per row
//   nested  -> rows sharing a row key fold into one object; joined child
//              maps are linked into the parent per row
//
// Every row first resolves its discriminator chain. Nested queries are run
// eagerly, deferred until the outermost query completes (when the key is
// already in the local cache) or installed as lazy slots.
//
// Rows of named result sets are linked to earlier parents through pending
// relations keyed by the joining column values.
//
// ============================================================================

use log::{trace, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::wrapper::prepend_prefix;
use super::{DefaultResultHandler, ResultContext, ResultHandler, ResultSetWrapper};
use crate::cache::CacheKey;
use crate::codec::TypeHandler;
use crate::core::{DataType, DbError, Result, Value};
use crate::cursor::Cursor;
use crate::driver::Statement;
use crate::executor::{Executor, ResultLoader, TargetKind};
use crate::mapping::{find_property, MappedStatement, ResultMap, ResultMapping, ResultType, RowBounds};
use crate::object::{LazyValue, ListRef, Node, ObjectRef, ResultList};
use crate::session::{AutoMappingBehavior, AutoMappingUnknownColumnBehavior, Configuration};

struct PendingRelation {
    target: ObjectRef,
    mapping: Arc<ResultMapping>,
}

struct AutoMapping {
    column: String,
    property: String,
    handler: Arc<dyn TypeHandler>,
}

enum MappedValue {
    Value(Node),
    /// Filled later: deferred load, lazy slot or pending relation.
    Deferred,
}

pub struct ResultSetHandler {
    executor: Arc<dyn Executor>,
    configuration: Arc<Configuration>,
    mapped_statement: Arc<MappedStatement>,
    bounds: RowBounds,
    has_custom_handler: bool,

    nested_result_objects: HashMap<CacheKey, Node>,
    ancestor_objects: HashMap<String, Node>,
    previous_row_value: Option<Node>,

    next_result_maps: HashMap<String, Arc<ResultMapping>>,
    pending_relations: HashMap<CacheKey, Vec<PendingRelation>>,

    auto_mapping_cache: HashMap<String, Arc<Vec<AutoMapping>>>,
    use_constructor_mappings: bool,
}

impl ResultSetHandler {
    pub fn new(
        executor: Arc<dyn Executor>,
        configuration: Arc<Configuration>,
        mapped_statement: Arc<MappedStatement>,
        bounds: RowBounds,
    ) -> Self {
        Self {
            executor,
            configuration,
            mapped_statement,
            bounds,
            has_custom_handler: false,
            nested_result_objects: HashMap::new(),
            ancestor_objects: HashMap::new(),
            previous_row_value: None,
            next_result_maps: HashMap::new(),
            pending_relations: HashMap::new(),
            auto_mapping_cache: HashMap::new(),
            use_constructor_mappings: false,
        }
    }

    pub(crate) fn bounds(&self) -> RowBounds {
        self.bounds
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Maps every result set of `statement`. With a custom handler rows are
    /// pushed to it and the returned list is empty.
    pub fn handle_result_sets(
        &mut self,
        statement: &mut dyn Statement,
        mut handler: Option<&mut dyn ResultHandler>,
    ) -> Result<ResultList> {
        self.has_custom_handler = handler.is_some();
        let result_maps = self.mapped_statement.result_maps.clone();
        let mut multiple_results: Vec<Vec<Node>> = Vec::new();

        let mut rsw = next_wrapper(statement)?;
        if rsw.is_some() && result_maps.is_empty() {
            return Err(DbError::Configuration(format!(
                "A query was run and no Result Maps were found for the Mapped Statement '{}'.  \
                 It's likely that neither a Result Type nor a Result Map was specified.",
                self.mapped_statement.id
            )));
        }

        let mut result_set_count = 0;
        while let Some(mut current) = rsw.take() {
            let Some(result_map) = result_maps.get(result_set_count) else {
                rsw = Some(current);
                break;
            };
            let outcome = match handler.as_deref_mut() {
                Some(custom) => self.handle_row_values(&mut current, result_map, custom, self.bounds, None),
                None => {
                    let mut collector = DefaultResultHandler::new();
                    let outcome = self.handle_row_values(&mut current, result_map, &mut collector, self.bounds, None);
                    multiple_results.push(collector.into_list());
                    outcome
                }
            };
            current.close();
            outcome?;
            rsw = next_wrapper(statement)?;
            self.nested_result_objects.clear();
            result_set_count += 1;
        }

        let result_sets = self.mapped_statement.result_sets.clone();
        while let Some(mut current) = rsw.take() {
            let Some(name) = result_sets.get(result_set_count) else {
                current.close();
                break;
            };
            let outcome = match self.next_result_maps.get(name).cloned() {
                Some(parent_mapping) => {
                    let map_id = parent_mapping.nested_result_map_id.clone().unwrap_or_default();
                    match self.configuration.result_map(&map_id) {
                        Ok(result_map) => {
                            let mut unused = DefaultResultHandler::new();
                            self.handle_row_values(
                                &mut current,
                                &result_map,
                                &mut unused,
                                RowBounds::DEFAULT,
                                Some(&parent_mapping),
                            )
                        }
                        Err(e) => Err(e),
                    }
                }
                None => Ok(()),
            };
            current.close();
            outcome?;
            rsw = next_wrapper(statement)?;
            self.nested_result_objects.clear();
            result_set_count += 1;
        }

        Ok(Arc::new(collapse_single_result_list(multiple_results)))
    }

    /// Hands the first result set to a cursor that maps it row by row.
    pub fn handle_cursor_result_sets(self, statement: &mut dyn Statement) -> Result<Cursor> {
        let rsw = next_wrapper(statement)?.ok_or_else(|| {
            DbError::Execution(format!(
                "Statement '{}' returned no result set for a cursor",
                self.mapped_statement.id
            ))
        })?;
        let result_map = match self.mapped_statement.result_maps.as_slice() {
            [] => {
                return Err(DbError::Configuration(format!(
                    "A query was run and no Result Maps were found for the Mapped Statement '{}'.  \
                     It's likely that neither a Result Type nor a Result Map was specified.",
                    self.mapped_statement.id
                )));
            }
            [single] => single.clone(),
            _ => {
                return Err(DbError::Executor(
                    "Cursor results cannot be mapped to multiple resultMaps".into(),
                ));
            }
        };
        if result_map.has_nested_result_maps && !self.mapped_statement.result_ordered {
            return Err(DbError::Configuration(format!(
                "Cursor over nested result map '{}' requires an ordered statement; set resultOrdered=true on '{}'",
                result_map.id, self.mapped_statement.id
            )));
        }
        Ok(Cursor::new(self, result_map, rsw))
    }

    /// Maps rows of `rsw` until the handler stops, `bounds.limit` rows were
    /// handed out or the rows run out.
    pub(crate) fn handle_row_values(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        handler: &mut dyn ResultHandler,
        bounds: RowBounds,
        parent_mapping: Option<&Arc<ResultMapping>>,
    ) -> Result<()> {
        if result_map.has_nested_result_maps {
            self.ensure_no_row_bounds()?;
            self.check_result_handler()?;
            self.handle_rows_for_nested_result_map(rsw, result_map, handler, bounds, parent_mapping)
        } else {
            self.handle_rows_for_simple_result_map(rsw, result_map, handler, bounds, parent_mapping)
        }
    }

    fn ensure_no_row_bounds(&self) -> Result<()> {
        if self.configuration.settings().safe_row_bounds_enabled && !self.bounds.is_default() {
            return Err(DbError::Configuration(
                "Mapped Statements with nested result mappings cannot be safely constrained by RowBounds. \
                 Use safeRowBoundsEnabled=false setting to bypass this check."
                    .into(),
            ));
        }
        Ok(())
    }

    fn check_result_handler(&self) -> Result<()> {
        if self.has_custom_handler
            && self.configuration.settings().safe_result_handler_enabled
            && !self.mapped_statement.result_ordered
        {
            return Err(DbError::Configuration(
                "Mapped Statements with nested result mappings cannot be safely used with a custom ResultHandler. \
                 Use safeResultHandlerEnabled=false setting to bypass this check \
                 or ensure your statement returns ordered data and set resultOrdered=true on it."
                    .into(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Row walks
    // ========================================================================

    fn handle_rows_for_simple_result_map(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        handler: &mut dyn ResultHandler,
        bounds: RowBounds,
        parent_mapping: Option<&Arc<ResultMapping>>,
    ) -> Result<()> {
        let mut context = ResultContext::new();
        skip_rows(rsw, bounds)?;
        while should_process_more_rows(&context, bounds) && !rsw.is_closed() && rsw.next()? {
            let discriminated = self.resolve_discriminated_result_map(rsw, result_map, None)?;
            let row_value = self.get_row_value(rsw, &discriminated, None)?;
            self.store_object(handler, &mut context, row_value, parent_mapping, rsw)?;
        }
        Ok(())
    }

    fn handle_rows_for_nested_result_map(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        handler: &mut dyn ResultHandler,
        bounds: RowBounds,
        parent_mapping: Option<&Arc<ResultMapping>>,
    ) -> Result<()> {
        let ordered = self.mapped_statement.result_ordered;
        let mut context = ResultContext::new();
        skip_rows(rsw, bounds)?;
        let mut row_value = self.previous_row_value.take();

        while should_process_more_rows(&context, bounds) && !rsw.is_closed() && rsw.next()? {
            let discriminated = self.resolve_discriminated_result_map(rsw, result_map, None)?;
            let row_key = self.create_row_key(&discriminated, rsw, None)?;
            let partial = self.nested_result_objects.get(&row_key).cloned();
            if ordered {
                if partial.is_none() && row_value.is_some() {
                    self.nested_result_objects.clear();
                    self.store_object(handler, &mut context, row_value.take(), parent_mapping, rsw)?;
                }
                row_value = self.get_nested_row_value(rsw, &discriminated, &row_key, None, partial)?;
            } else {
                let is_new = partial.is_none();
                row_value = self.get_nested_row_value(rsw, &discriminated, &row_key, None, partial)?;
                if is_new {
                    self.store_object(handler, &mut context, row_value.clone(), parent_mapping, rsw)?;
                }
            }
        }

        if row_value.is_some() && ordered && should_process_more_rows(&context, bounds) {
            self.store_object(handler, &mut context, row_value, parent_mapping, rsw)?;
            self.previous_row_value = None;
        } else if row_value.is_some() {
            self.previous_row_value = row_value;
        }
        Ok(())
    }

    fn store_object(
        &mut self,
        handler: &mut dyn ResultHandler,
        context: &mut ResultContext,
        row_value: Option<Node>,
        parent_mapping: Option<&Arc<ResultMapping>>,
        rsw: &ResultSetWrapper,
    ) -> Result<()> {
        match parent_mapping {
            Some(parent_mapping) => self.link_to_parents(rsw, parent_mapping, row_value),
            None => {
                context.next_result_object(row_value);
                handler.handle_result(context)
            }
        }
    }

    // ========================================================================
    // Discriminators
    // ========================================================================

    /// Follows the discriminator chain from `result_map`. Stops at the last
    /// resolved map when a value has no case, names an unknown map or leads
    /// back to a map already visited.
    fn resolve_discriminated_result_map(
        &self,
        rsw: &ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        prefix: Option<&str>,
    ) -> Result<Arc<ResultMap>> {
        let mut result_map = result_map.clone();
        let mut past_discriminators = HashSet::new();
        let mut discriminator = result_map.discriminator.clone();

        while let Some(current) = discriminator {
            let column = prepend_prefix(&current.column, prefix);
            let handler = match current.column_type {
                Some(column_type) => self
                    .configuration
                    .type_handlers()
                    .handler(current.data_type, Some(column_type))
                    .unwrap_or_else(|| rsw.type_handler(self.configuration.type_handlers(), current.data_type, &column)),
                None => rsw.type_handler(self.configuration.type_handlers(), current.data_type, &column),
            };
            let value = rsw.get(&column, handler.as_ref())?;
            let Some(map_id) = current.map_id_for(&value) else {
                break;
            };
            if !self.configuration.has_result_map(map_id) {
                break;
            }
            let map_id = map_id.to_string();
            result_map = self.configuration.result_map(&map_id)?;
            discriminator = result_map.discriminator.clone();
            let same = discriminator
                .as_ref()
                .is_some_and(|next| Arc::ptr_eq(next, &current));
            if same || !past_discriminators.insert(map_id) {
                trace!("Discriminator chain stops at '{}'", result_map.id);
                break;
            }
        }
        Ok(result_map)
    }

    // ========================================================================
    // Row values
    // ========================================================================

    fn get_row_value(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        prefix: Option<&str>,
    ) -> Result<Option<Node>> {
        let mut lazy_count = 0;
        let row_value = self.create_result_object(rsw, result_map, prefix)?;
        let Some(Node::Object(target)) = row_value.clone() else {
            return Ok(row_value);
        };

        let mut found = self.use_constructor_mappings;
        if self.should_apply_automatic_mappings(result_map, false) {
            found = self.apply_automatic_mappings(rsw, result_map, &target, prefix)? || found;
        }
        found = self.apply_property_mappings(rsw, result_map, &target, prefix, &mut lazy_count)? || found;
        found = lazy_count > 0 || found;
        Ok(self.keep_if_found(row_value, found))
    }

    fn get_nested_row_value(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        combined_key: &CacheKey,
        prefix: Option<&str>,
        partial: Option<Node>,
    ) -> Result<Option<Node>> {
        let map_id = result_map.id.clone();

        if let Some(existing) = partial {
            if let Node::Object(target) = &existing {
                self.ancestor_objects.insert(map_id.clone(), existing.clone());
                let outcome = self.apply_nested_result_mappings(rsw, result_map, target, prefix, combined_key, false);
                self.ancestor_objects.remove(&map_id);
                outcome?;
            }
            return Ok(Some(existing));
        }

        let mut lazy_count = 0;
        let mut row_value = self.create_result_object(rsw, result_map, prefix)?;
        if let Some(Node::Object(target)) = row_value.clone() {
            let mut found = self.use_constructor_mappings;
            if self.should_apply_automatic_mappings(result_map, true) {
                found = self.apply_automatic_mappings(rsw, result_map, &target, prefix)? || found;
            }
            found = self.apply_property_mappings(rsw, result_map, &target, prefix, &mut lazy_count)? || found;

            self.ancestor_objects.insert(map_id.clone(), Node::Object(target.clone()));
            let nested = self.apply_nested_result_mappings(rsw, result_map, &target, prefix, combined_key, true);
            self.ancestor_objects.remove(&map_id);
            found = nested? || found;

            found = lazy_count > 0 || found;
            row_value = self.keep_if_found(row_value, found);
        }
        if !combined_key.is_null() {
            if let Some(value) = &row_value {
                self.nested_result_objects.insert(combined_key.clone(), value.clone());
            }
        }
        Ok(row_value)
    }

    fn keep_if_found(&self, row_value: Option<Node>, found: bool) -> Option<Node> {
        if found || self.configuration.settings().return_instance_for_empty_row {
            row_value
        } else {
            None
        }
    }

    fn should_apply_automatic_mappings(&self, result_map: &ResultMap, nested: bool) -> bool {
        if let Some(enabled) = result_map.auto_mapping {
            return enabled;
        }
        let behavior = self.configuration.settings().auto_mapping_behavior;
        if nested {
            behavior == AutoMappingBehavior::Full
        } else {
            behavior != AutoMappingBehavior::None
        }
    }

    // ========================================================================
    // Object creation
    // ========================================================================

    fn create_result_object(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        prefix: Option<&str>,
    ) -> Result<Option<Node>> {
        self.use_constructor_mappings = false;

        if let ResultType::Scalar(data_type) = &result_map.result_type {
            return self.create_scalar_result_object(rsw, result_map, *data_type, prefix);
        }

        let constructor_mappings = &result_map.constructor_result_mappings;
        if constructor_mappings.is_empty() {
            let object = self
                .configuration
                .object_factory()
                .create(&result_map.result_type.type_name(), Vec::new())?;
            return Ok(Some(Node::Object(object)));
        }

        let mut args = Vec::with_capacity(constructor_mappings.len());
        let mut found = false;
        for mapping in constructor_mappings {
            let value = self.constructor_arg_value(rsw, result_map, mapping, prefix)?;
            found = found || !value.is_null();
            args.push((mapping.property.clone(), value));
        }
        if !found {
            return Ok(None);
        }
        let object = self
            .configuration
            .object_factory()
            .create(&result_map.result_type.type_name(), args)?;
        self.use_constructor_mappings = true;
        Ok(Some(Node::Object(object)))
    }

    fn create_scalar_result_object(
        &self,
        rsw: &ResultSetWrapper,
        result_map: &ResultMap,
        data_type: DataType,
        prefix: Option<&str>,
    ) -> Result<Option<Node>> {
        let first_mapping = result_map.result_mappings.first();
        let column = match first_mapping.and_then(|m| m.column.as_deref()) {
            Some(column) => prepend_prefix(column, prefix),
            None => rsw
                .column_names()
                .first()
                .cloned()
                .ok_or_else(|| DbError::Execution("Result set has no columns".into()))?,
        };
        let handler = match first_mapping.and_then(|m| m.type_handler.clone()) {
            Some(handler) => handler,
            None => rsw.type_handler(self.configuration.type_handlers(), data_type, &column),
        };
        let value = rsw.get(&column, handler.as_ref())?;
        Ok(if value.is_null() { None } else { Some(Node::Value(value)) })
    }

    fn constructor_arg_value(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &ResultMap,
        mapping: &Arc<ResultMapping>,
        prefix: Option<&str>,
    ) -> Result<Node> {
        let value = if let Some(query_id) = &mapping.nested_query_id {
            self.nested_query_constructor_value(rsw, mapping, query_id, prefix)
        } else if let Some(map_id) = &mapping.nested_result_map_id {
            let nested_map = self.configuration.result_map(map_id)?;
            let nested_prefix = column_prefix_of(prefix, mapping);
            self.get_row_value(rsw, &nested_map, nested_prefix.as_deref())
                .map(|v| v.unwrap_or_else(Node::null))
        } else {
            let column = prepend_prefix(mapping.column.as_deref().unwrap_or_default(), prefix);
            let handler = self.property_handler(rsw, &result_map.result_type, mapping, &column);
            rsw.get(&column, handler.as_ref()).map(Node::Value)
        };
        value.map_err(|e| {
            DbError::Executor(format!(
                "Could not process constructor argument '{}'. Cause: {}",
                mapping.property, e
            ))
        })
    }

    // ========================================================================
    // Property mappings
    // ========================================================================

    fn property_handler(
        &self,
        rsw: &ResultSetWrapper,
        result_type: &ResultType,
        mapping: &ResultMapping,
        column: &str,
    ) -> Arc<dyn TypeHandler> {
        if let Some(handler) = &mapping.type_handler {
            return handler.clone();
        }
        let data_type = if mapping.data_type != DataType::Any {
            mapping.data_type
        } else {
            result_type
                .declared()
                .and_then(|declared| declared.get(&mapping.property).copied())
                .unwrap_or(DataType::Any)
        };
        let registry = self.configuration.type_handlers();
        mapping
            .column_type
            .and_then(|column_type| registry.handler(data_type, Some(column_type)))
            .unwrap_or_else(|| rsw.type_handler(registry, data_type, column))
    }

    fn apply_property_mappings(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        target: &ObjectRef,
        prefix: Option<&str>,
        lazy_count: &mut usize,
    ) -> Result<bool> {
        let mapped_columns = rsw.mapped_column_names(result_map, prefix);
        let call_setters_on_nulls = self.configuration.settings().call_setters_on_nulls;
        let mut found = false;

        for mapping in &result_map.property_result_mappings {
            let column = match (&mapping.nested_result_map_id, &mapping.column) {
                (None, Some(column)) => Some(prepend_prefix(column, prefix)),
                _ => None,
            };
            let applies = mapping.is_composite()
                || column
                    .as_ref()
                    .is_some_and(|c| mapped_columns.contains(&c.to_uppercase()))
                || mapping.result_set.is_some();
            if !applies {
                continue;
            }

            let value = self.property_mapping_value(rsw, result_map, target, mapping, prefix, lazy_count)?;
            if mapping.property.is_empty() {
                continue;
            }
            match value {
                MappedValue::Deferred => found = true,
                MappedValue::Value(node) => {
                    if !node.is_null() {
                        found = true;
                    }
                    if !node.is_null() || call_setters_on_nulls {
                        Node::Object(target.clone()).set_path(&mapping.property, node)?;
                    }
                }
            }
        }
        Ok(found)
    }

    fn property_mapping_value(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &ResultMap,
        target: &ObjectRef,
        mapping: &Arc<ResultMapping>,
        prefix: Option<&str>,
        lazy_count: &mut usize,
    ) -> Result<MappedValue> {
        if let Some(query_id) = &mapping.nested_query_id {
            return self.nested_query_mapping_value(rsw, target, mapping, query_id, prefix, lazy_count);
        }
        if mapping.result_set.is_some() {
            self.add_pending_child_relation(rsw, target, mapping)?;
            return Ok(MappedValue::Deferred);
        }
        let column = prepend_prefix(mapping.column.as_deref().unwrap_or_default(), prefix);
        let handler = self.property_handler(rsw, &result_map.result_type, mapping, &column);
        Ok(MappedValue::Value(Node::Value(rsw.get(&column, handler.as_ref())?)))
    }

    // ========================================================================
    // Auto-mapping
    // ========================================================================

    fn apply_automatic_mappings(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        target: &ObjectRef,
        prefix: Option<&str>,
    ) -> Result<bool> {
        let auto_mappings = self.create_automatic_mappings(rsw, result_map, prefix)?;
        let call_setters_on_nulls = self.configuration.settings().call_setters_on_nulls;
        let mut found = false;
        for auto in auto_mappings.iter() {
            let value = rsw.get(&auto.column, auto.handler.as_ref())?;
            if !value.is_null() {
                found = true;
            }
            if !value.is_null() || call_setters_on_nulls {
                Node::Object(target.clone()).set_path(&auto.property, Node::Value(value))?;
            }
        }
        Ok(found)
    }

    fn create_automatic_mappings(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        prefix: Option<&str>,
    ) -> Result<Arc<Vec<AutoMapping>>> {
        let cache_key = format!("{}:{}", result_map.id, prefix.unwrap_or(""));
        if let Some(cached) = self.auto_mapping_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        let settings = self.configuration.settings();
        let registry = self.configuration.type_handlers();
        let unmapped = rsw.unmapped_column_names(result_map, prefix);
        let mut auto_mappings = Vec::new();

        for column in unmapped.iter() {
            let property_name = match prefix.filter(|p| !p.is_empty()) {
                Some(prefix) => match strip_column_prefix(column, prefix) {
                    Some(rest) => rest.to_string(),
                    None => continue,
                },
                None => column.clone(),
            };

            let property = match &result_map.result_type {
                ResultType::Map => Some(property_name.clone()),
                other => find_property(other, &property_name, settings.map_underscore_to_camel_case),
            };
            let Some(property) = property else {
                self.unknown_column(column, &property_name, None)?;
                continue;
            };
            if result_map.mapped_properties.contains(&property) {
                continue;
            }

            let property_type = result_map
                .result_type
                .declared()
                .and_then(|declared| declared.get(&property).copied())
                .unwrap_or(DataType::Any);
            if registry.has_handler(property_type) {
                auto_mappings.push(AutoMapping {
                    column: column.clone(),
                    handler: rsw.type_handler(registry, property_type, column),
                    property,
                });
            } else {
                self.unknown_column(column, &property, Some(property_type))?;
            }
        }

        let auto_mappings = Arc::new(auto_mappings);
        self.auto_mapping_cache.insert(cache_key, auto_mappings.clone());
        Ok(auto_mappings)
    }

    fn unknown_column(&self, column: &str, property: &str, property_type: Option<DataType>) -> Result<()> {
        let message = || {
            format!(
                "Unknown column is detected on '{}' auto-mapping. Mapping parameters are \
                 [columnName={},propertyName={},propertyType={}]",
                self.mapped_statement.id,
                column,
                property,
                property_type.map_or_else(|| "null".to_string(), |t| t.to_string())
            )
        };
        match self.configuration.settings().auto_mapping_unknown_column_behavior {
            AutoMappingUnknownColumnBehavior::None => Ok(()),
            AutoMappingUnknownColumnBehavior::Warning => {
                warn!("{}", message());
                Ok(())
            }
            AutoMappingUnknownColumnBehavior::Failing => Err(DbError::Configuration(message())),
        }
    }

    // ========================================================================
    // Nested queries
    // ========================================================================

    fn nested_query_constructor_value(
        &mut self,
        rsw: &ResultSetWrapper,
        mapping: &ResultMapping,
        query_id: &str,
        prefix: Option<&str>,
    ) -> Result<Node> {
        let nested_query = self.configuration.mapped_statement(query_id)?;
        let Some(parameter) = self.prepare_parameter_for_nested_query(rsw, mapping, prefix)? else {
            return Ok(Node::null());
        };
        let bound_sql = nested_query.bound_sql(&parameter)?;
        let key = self
            .executor
            .create_cache_key(&nested_query, &parameter, RowBounds::DEFAULT, &bound_sql)?;
        ResultLoader::new(
            self.configuration.clone(),
            &self.executor,
            nested_query,
            parameter,
            TargetKind::of(mapping),
            key,
            bound_sql,
        )
        .load_result()
    }

    fn nested_query_mapping_value(
        &mut self,
        rsw: &ResultSetWrapper,
        target: &ObjectRef,
        mapping: &ResultMapping,
        query_id: &str,
        prefix: Option<&str>,
        lazy_count: &mut usize,
    ) -> Result<MappedValue> {
        let nested_query = self.configuration.mapped_statement(query_id)?;
        let Some(parameter) = self.prepare_parameter_for_nested_query(rsw, mapping, prefix)? else {
            return Ok(MappedValue::Value(Node::null()));
        };
        let bound_sql = nested_query.bound_sql(&parameter)?;
        let key = self
            .executor
            .create_cache_key(&nested_query, &parameter, RowBounds::DEFAULT, &bound_sql)?;
        let kind = TargetKind::of(mapping);

        if self.executor.is_cached(&nested_query, &key) {
            self.executor
                .defer_load(&nested_query, target, &mapping.property, key, kind)?;
            return Ok(MappedValue::Deferred);
        }

        let loader = ResultLoader::new(
            self.configuration.clone(),
            &self.executor,
            nested_query,
            parameter,
            kind,
            key,
            bound_sql,
        );
        if mapping.is_lazy(self.configuration.settings().lazy_loading_enabled) {
            target.set_lazy(&mapping.property, LazyValue::new(loader))?;
            *lazy_count += 1;
            Ok(MappedValue::Deferred)
        } else {
            Ok(MappedValue::Value(loader.load_result()?))
        }
    }

    /// Parameter for a nested query; `None` when every key column is NULL.
    fn prepare_parameter_for_nested_query(
        &self,
        rsw: &ResultSetWrapper,
        mapping: &ResultMapping,
        prefix: Option<&str>,
    ) -> Result<Option<Node>> {
        if mapping.is_composite() {
            let parameter = ObjectRef::new("map");
            let mut found = false;
            for inner in &mapping.composites {
                let column = prepend_prefix(inner.column.as_deref().unwrap_or_default(), prefix);
                let handler = rsw.type_handler(self.configuration.type_handlers(), inner.data_type, &column);
                let value = rsw.get(&column, handler.as_ref())?;
                if !value.is_null() {
                    parameter.set(&inner.property, value)?;
                    found = true;
                }
            }
            return Ok(found.then_some(Node::Object(parameter)));
        }
        let column = prepend_prefix(mapping.column.as_deref().unwrap_or_default(), prefix);
        let handler = match &mapping.type_handler {
            Some(handler) => handler.clone(),
            None => rsw.type_handler(self.configuration.type_handlers(), DataType::Any, &column),
        };
        let value = rsw.get(&column, handler.as_ref())?;
        Ok((!value.is_null()).then_some(Node::Value(value)))
    }

    // ========================================================================
    // Nested result maps
    // ========================================================================

    fn apply_nested_result_mappings(
        &mut self,
        rsw: &mut ResultSetWrapper,
        result_map: &Arc<ResultMap>,
        target: &ObjectRef,
        parent_prefix: Option<&str>,
        parent_row_key: &CacheKey,
        new_object: bool,
    ) -> Result<bool> {
        let mut found = false;
        for mapping in &result_map.property_result_mappings {
            if !mapping.has_joined_result_map() {
                continue;
            }
            let Some(nested_map_id) = mapping.nested_result_map_id.as_deref() else {
                continue;
            };
            let prefix = column_prefix_of(parent_prefix, mapping);
            let nested_map = self.configuration.result_map(nested_map_id)?;
            let nested_map = self.resolve_discriminated_result_map(rsw, &nested_map, prefix.as_deref())?;

            if mapping.column_prefix.is_none() {
                if let Some(ancestor) = self.ancestor_objects.get(nested_map_id).cloned() {
                    if new_object {
                        link_objects(target, mapping, ancestor)?;
                    }
                    continue;
                }
            }

            let row_key = self.create_row_key(&nested_map, rsw, prefix.as_deref())?;
            let combined_key = row_key.combine(parent_row_key);
            let known = self.nested_result_objects.get(&combined_key).cloned();
            let known_value = known.is_some();
            instantiate_collection_if_appropriate(target, mapping)?;

            if any_not_null_column_has_value(mapping, prefix.as_deref(), rsw)? {
                let row_value =
                    self.get_nested_row_value(rsw, &nested_map, &combined_key, prefix.as_deref(), known)?;
                if let Some(row_value) = row_value {
                    if !known_value {
                        link_objects(target, mapping, row_value)?;
                        found = true;
                    }
                }
            }
        }
        Ok(found)
    }

    // ========================================================================
    // Row keys
    // ========================================================================

    /// Identity of the current row under `result_map`: id columns when
    /// declared, else mapped columns, else every column. Fewer than two
    /// parts yields the null key.
    fn create_row_key(
        &self,
        result_map: &Arc<ResultMap>,
        rsw: &mut ResultSetWrapper,
        prefix: Option<&str>,
    ) -> Result<CacheKey> {
        let mut key = CacheKey::new();
        key.update(result_map.id.as_str());

        let mappings = if result_map.id_result_mappings.is_empty() {
            &result_map.property_result_mappings
        } else {
            &result_map.id_result_mappings
        };
        if mappings.is_empty() {
            match &result_map.result_type {
                ResultType::Map => self.row_key_for_map(rsw, &mut key)?,
                _ => self.row_key_for_unmapped_properties(result_map, rsw, &mut key, prefix)?,
            }
        } else {
            self.row_key_for_mapped_properties(result_map, rsw, &mut key, mappings, prefix)?;
        }

        if key.update_count() < 2 {
            return Ok(CacheKey::null());
        }
        Ok(key)
    }

    fn row_key_for_mapped_properties(
        &self,
        result_map: &ResultMap,
        rsw: &mut ResultSetWrapper,
        key: &mut CacheKey,
        mappings: &[Arc<ResultMapping>],
        prefix: Option<&str>,
    ) -> Result<()> {
        for mapping in mappings {
            if mapping.has_joined_result_map() {
                if let Some(map_id) = &mapping.nested_result_map_id {
                    let nested_map = self.configuration.result_map(map_id)?;
                    let nested_prefix = mapping
                        .column_prefix
                        .as_deref()
                        .map(|p| prepend_prefix(p, prefix).to_uppercase())
                        .or_else(|| prefix.map(str::to_string));
                    self.row_key_for_mapped_properties(
                        &nested_map,
                        rsw,
                        key,
                        &nested_map.constructor_result_mappings,
                        nested_prefix.as_deref(),
                    )?;
                }
                continue;
            }
            if mapping.nested_query_id.is_some() || mapping.result_set.is_some() {
                continue;
            }
            let Some(column) = mapping.column.as_deref() else {
                continue;
            };
            let column = prepend_prefix(column, prefix);
            let mapped_columns = rsw.mapped_column_names(result_map, prefix);
            if !mapped_columns.contains(&column.to_uppercase()) {
                continue;
            }
            let handler = self.property_handler(rsw, &result_map.result_type, mapping, &column);
            let value = rsw.get(&column, handler.as_ref())?;
            if !value.is_null() || self.configuration.settings().return_instance_for_empty_row {
                key.update(column.as_str());
                key.update(value);
            }
        }
        Ok(())
    }

    fn row_key_for_unmapped_properties(
        &self,
        result_map: &ResultMap,
        rsw: &mut ResultSetWrapper,
        key: &mut CacheKey,
        prefix: Option<&str>,
    ) -> Result<()> {
        let camel = self.configuration.settings().map_underscore_to_camel_case;
        let unmapped = rsw.unmapped_column_names(result_map, prefix);
        for column in unmapped.iter() {
            let property = match prefix.filter(|p| !p.is_empty()) {
                Some(prefix) => match strip_column_prefix(column, prefix) {
                    Some(rest) => rest,
                    None => continue,
                },
                None => column.as_str(),
            };
            if find_property(&result_map.result_type, property, camel).is_none() {
                continue;
            }
            let value = rsw.raw_value(column)?;
            if !value.is_null() {
                key.update(column.as_str());
                key.update(value.to_key_string());
            }
        }
        Ok(())
    }

    fn row_key_for_map(&self, rsw: &ResultSetWrapper, key: &mut CacheKey) -> Result<()> {
        for column in rsw.column_names() {
            let value = rsw.raw_value(column)?;
            if !value.is_null() {
                key.update(column.as_str());
                key.update(value.to_key_string());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Multiple result sets
    // ========================================================================

    fn add_pending_child_relation(
        &mut self,
        rsw: &ResultSetWrapper,
        target: &ObjectRef,
        mapping: &Arc<ResultMapping>,
    ) -> Result<()> {
        let columns = mapping.column.as_deref().unwrap_or_default();
        let key = key_for_multiple_results(rsw, mapping, columns, columns)?;
        self.pending_relations.entry(key).or_default().push(PendingRelation {
            target: target.clone(),
            mapping: mapping.clone(),
        });

        let Some(result_set) = mapping.result_set.as_deref() else {
            return Ok(());
        };
        match self.next_result_maps.get(result_set) {
            None => {
                self.next_result_maps.insert(result_set.to_string(), mapping.clone());
                Ok(())
            }
            Some(previous) if Arc::ptr_eq(previous, mapping) => Ok(()),
            Some(_) => Err(DbError::Executor(
                "Two different properties are mapped to the same resultSet".into(),
            )),
        }
    }

    fn link_to_parents(
        &mut self,
        rsw: &ResultSetWrapper,
        parent_mapping: &Arc<ResultMapping>,
        row_value: Option<Node>,
    ) -> Result<()> {
        let names = parent_mapping.column.as_deref().unwrap_or_default();
        let columns = parent_mapping.foreign_column.as_deref().unwrap_or_default();
        let key = key_for_multiple_results(rsw, parent_mapping, names, columns)?;
        let Some(row_value) = row_value else {
            return Ok(());
        };
        if let Some(parents) = self.pending_relations.get(&key) {
            for parent in parents {
                link_objects(&parent.target, &parent.mapping, row_value.clone())?;
            }
        }
        Ok(())
    }
}

fn next_wrapper(statement: &mut dyn Statement) -> Result<Option<ResultSetWrapper>> {
    Ok(statement.next_result_set()?.map(ResultSetWrapper::new))
}

fn collapse_single_result_list(mut multiple_results: Vec<Vec<Node>>) -> Vec<Node> {
    if multiple_results.len() == 1 {
        return multiple_results.pop().unwrap_or_default();
    }
    multiple_results
        .into_iter()
        .map(|list| Node::List(ListRef::from_vec(list)))
        .collect()
}

/// `column` without its upper-cased `prefix`, matched case-insensitively.
/// `None` when the prefix does not match or would split a character.
fn strip_column_prefix<'a>(column: &'a str, prefix: &str) -> Option<&'a str> {
    let head = column.get(..prefix.len())?;
    (head.to_uppercase() == prefix).then(|| &column[prefix.len()..])
}

/// Advances past `bounds.offset` rows without mapping them.
pub(crate) fn skip_rows(rsw: &mut ResultSetWrapper, bounds: RowBounds) -> Result<()> {
    for _ in 0..bounds.offset {
        if !rsw.next()? {
            break;
        }
    }
    Ok(())
}

fn should_process_more_rows(context: &ResultContext, bounds: RowBounds) -> bool {
    !context.is_stopped() && context.result_count() < bounds.limit
}

/// Accumulated, upper-cased prefix for a nested mapping.
fn column_prefix_of(parent_prefix: Option<&str>, mapping: &ResultMapping) -> Option<String> {
    let mut prefix = String::new();
    if let Some(parent) = parent_prefix {
        prefix.push_str(parent);
    }
    if let Some(own) = &mapping.column_prefix {
        prefix.push_str(own);
    }
    (!prefix.is_empty()).then(|| prefix.to_uppercase())
}

fn any_not_null_column_has_value(
    mapping: &ResultMapping,
    prefix: Option<&str>,
    rsw: &ResultSetWrapper,
) -> Result<bool> {
    if !mapping.not_null_columns.is_empty() {
        for column in &mapping.not_null_columns {
            if !rsw.raw_value(&prepend_prefix(column, prefix))?.is_null() {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    if let Some(prefix) = prefix {
        let upper = prefix.to_uppercase();
        return Ok(rsw
            .column_names()
            .iter()
            .any(|name| name.to_uppercase().starts_with(&upper)));
    }
    Ok(true)
}

/// Reads a property without running a pending lazy fetch.
fn peek_property(target: &ObjectRef, path: &str) -> Result<Option<Node>> {
    match path.rsplit_once('.') {
        None => target.peek(path),
        Some((parent, last)) => match Node::Object(target.clone()).get_path(parent)? {
            Some(Node::Object(owner)) => owner.peek(last),
            _ => Ok(None),
        },
    }
}

fn instantiate_collection_if_appropriate(target: &ObjectRef, mapping: &ResultMapping) -> Result<Option<ListRef>> {
    if !mapping.collection || mapping.property.is_empty() {
        return Ok(None);
    }
    if let Some(Node::List(list)) = peek_property(target, &mapping.property)? {
        return Ok(Some(list));
    }
    let list = ListRef::new();
    Node::Object(target.clone()).set_path(&mapping.property, Node::List(list.clone()))?;
    Ok(Some(list))
}

fn link_objects(target: &ObjectRef, mapping: &ResultMapping, value: Node) -> Result<()> {
    match instantiate_collection_if_appropriate(target, mapping)? {
        Some(list) => list.push(value),
        None => Node::Object(target.clone()).set_path(&mapping.property, value),
    }
}

/// Key joining a parent row to rows of a named result set: the mapping's
/// identity plus the values of the listed columns.
fn key_for_multiple_results(
    rsw: &ResultSetWrapper,
    mapping: &ResultMapping,
    names: &str,
    columns: &str,
) -> Result<CacheKey> {
    let mut key = CacheKey::new();
    key.update(mapping.result_set.as_deref().unwrap_or_default());
    key.update(mapping.property.as_str());
    for (name, column) in names.split(',').zip(columns.split(',')) {
        let (name, column) = (name.trim(), column.trim());
        if column.is_empty() {
            continue;
        }
        let value: Value = rsw.raw_value(column)?;
        if !value.is_null() {
            key.update(name.to_lowercase());
            key.update(value.to_key_string());
        }
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_column_prefix_ignores_case_and_char_boundaries() {
        assert_eq!(strip_column_prefix("author_name", "AUTHOR_"), Some("name"));
        assert_eq!(strip_column_prefix("post_name", "AUTHOR_"), None);
        assert_eq!(strip_column_prefix("é_id", "E_"), None);
        // byte 2 falls inside 'é'
        assert_eq!(strip_column_prefix("aé_id", "AB"), None);
        assert_eq!(strip_column_prefix("ab", "ABC"), None);
    }

    #[test]
    fn test_column_prefix_accumulates_upper_case() {
        let mapping = ResultMapping::new("author").nested_result_map("author").column_prefix("author_");
        assert_eq!(column_prefix_of(None, &mapping), Some("AUTHOR_".to_string()));
        assert_eq!(column_prefix_of(Some("POST_"), &mapping), Some("POST_AUTHOR_".to_string()));
        assert_eq!(column_prefix_of(None, &ResultMapping::new("x")), None);
    }

    #[test]
    fn test_collapse_single_result_list() {
        let single = collapse_single_result_list(vec![vec![Node::from(1i64), Node::from(2i64)]]);
        assert_eq!(single.len(), 2);

        let many = collapse_single_result_list(vec![vec![Node::from(1i64)], vec![]]);
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].as_list().map(|l| l.len()), Some(0));
    }

    #[test]
    fn test_collection_property_instantiated_once() {
        let target = ObjectRef::new("blog");
        let mapping = ResultMapping::new("posts").nested_result_map("post").collection();
        link_objects(&target, &mapping, Node::from(1i64)).unwrap();
        link_objects(&target, &mapping, Node::from(2i64)).unwrap();
        let posts = target.peek("posts").unwrap().unwrap();
        assert_eq!(posts.as_list().map(|l| l.len()), Some(2));
    }
}
