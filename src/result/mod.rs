// ============================================================================
// Result Mapping
// ============================================================================
//
// Turns driver result sets into object graphs. Mapped rows are pushed one at
// a time to a ResultHandler; the default handler collects them into a list.
//
//   ResultSetWrapper  -> column metadata, per-map column partitions
//   ResultSetHandler  -> simple, nested, discriminated and multi-result-set
//                        mapping, auto-mapping and nested queries
//
// ============================================================================

mod handler;
mod wrapper;

pub use handler::ResultSetHandler;
pub(crate) use handler::skip_rows;
pub use wrapper::ResultSetWrapper;

use std::collections::HashMap;

use crate::core::Result;
use crate::object::Node;

/// Per-row view handed to a [`ResultHandler`].
#[derive(Debug, Default)]
pub struct ResultContext {
    result_object: Option<Node>,
    result_count: usize,
    stopped: bool,
}

impl ResultContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The row just mapped; `None` for a row that mapped to nothing.
    pub fn result_object(&self) -> Option<&Node> {
        self.result_object.as_ref()
    }

    pub fn take_result_object(&mut self) -> Option<Node> {
        self.result_object.take()
    }

    pub fn result_count(&self) -> usize {
        self.result_count
    }

    /// Asks the mapper to stop fetching rows.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub(crate) fn next_result_object(&mut self, object: Option<Node>) {
        self.result_count += 1;
        self.result_object = object;
    }
}

pub trait ResultHandler {
    fn handle_result(&mut self, context: &mut ResultContext) -> Result<()>;
}

impl<F> ResultHandler for F
where
    F: FnMut(&mut ResultContext) -> Result<()>,
{
    fn handle_result(&mut self, context: &mut ResultContext) -> Result<()> {
        self(context)
    }
}

/// Collects mapped rows in order. Rows that mapped to nothing become nulls.
#[derive(Debug, Default)]
pub struct DefaultResultHandler {
    list: Vec<Node>,
}

impl DefaultResultHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_list(self) -> Vec<Node> {
        self.list
    }
}

impl ResultHandler for DefaultResultHandler {
    fn handle_result(&mut self, context: &mut ResultContext) -> Result<()> {
        self.list
            .push(context.take_result_object().unwrap_or_else(Node::null));
        Ok(())
    }
}

/// Collects mapped rows into a map keyed by one property of each row.
/// A later row with the same key replaces an earlier one.
#[derive(Debug)]
pub struct MapResultHandler {
    key_property: String,
    map: HashMap<String, Node>,
    order: Vec<String>,
}

impl MapResultHandler {
    pub fn new(key_property: impl Into<String>) -> Self {
        Self {
            key_property: key_property.into(),
            map: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn into_map(self) -> HashMap<String, Node> {
        self.map
    }

    /// Keys in first-seen order.
    pub fn keys(&self) -> &[String] {
        &self.order
    }
}

impl ResultHandler for MapResultHandler {
    fn handle_result(&mut self, context: &mut ResultContext) -> Result<()> {
        let Some(object) = context.take_result_object() else {
            return Ok(());
        };
        let key = object.path_value(&self.key_property)?.to_key_string();
        if self.map.insert(key.clone(), object).is_none() {
            self.order.push(key);
        }
        Ok(())
    }
}
