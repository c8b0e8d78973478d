// ============================================================================
// Scripted In-Memory Driver
// ============================================================================
//
// Answers statements from per-query-text scripts instead of a real database.
// A script receives the bound parameters of one execution and returns the
// result sets, update count, generated keys and OUT parameter values.
//
// Every execution, prepared statement, commit, rollback and fetched row is
// counted, which makes at-most-once execution and on-demand fetching
// observable.
//
// ============================================================================

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use super::{Connection, DataSource, PrepareOptions, ResultSet, Statement};
use crate::core::{ColumnMeta, ColumnType, DbError, Result, Row, Value};

type Script = Arc<dyn Fn(&[Value]) -> Result<Response> + Send + Sync>;

/// Tabular data returned by a script.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: Vec<ColumnMeta>,
    rows: Vec<Row>,
}

impl MemoryTable {
    pub fn new(columns: &[(&str, ColumnType)]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnMeta::new(*name, *ty))
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

/// Outcome of one scripted execution.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub result_sets: Vec<MemoryTable>,
    pub update_count: i64,
    pub generated_keys: Option<MemoryTable>,
    pub out_parameters: BTreeMap<usize, Value>,
}

impl Response {
    pub fn table(table: MemoryTable) -> Self {
        Self {
            result_sets: vec![table],
            ..Self::default()
        }
    }

    pub fn updated(count: i64) -> Self {
        Self {
            update_count: count,
            ..Self::default()
        }
    }

    pub fn with_result_set(mut self, table: MemoryTable) -> Self {
        self.result_sets.push(table);
        self
    }

    pub fn with_generated_keys(mut self, keys: MemoryTable) -> Self {
        self.generated_keys = Some(keys);
        self
    }

    pub fn with_out_parameter(mut self, index: usize, value: impl Into<Value>) -> Self {
        self.out_parameters.insert(index, value.into());
        self
    }
}

#[derive(Debug, Default)]
struct Stats {
    executions: HashMap<String, usize>,
    prepared: usize,
    closed_statements: usize,
    commits: usize,
    rollbacks: usize,
    rows_fetched: usize,
    connections_opened: usize,
    connections_closed: usize,
}

#[derive(Default)]
struct MemoryState {
    scripts: RwLock<HashMap<String, Script>>,
    stats: Mutex<Stats>,
}

impl MemoryState {
    fn run(&self, sql: &str, params: &[Value]) -> Result<Response> {
        let script = self
            .scripts
            .read()?
            .get(sql)
            .cloned()
            .ok_or_else(|| DbError::Driver(format!("No script registered for: {}", sql)))?;
        *self.stats.lock()?.executions.entry(sql.to_string()).or_insert(0) += 1;
        script(params)
    }

    fn record(&self, update: impl FnOnce(&mut Stats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    fn read(&self, read: impl FnOnce(&Stats) -> usize) -> usize {
        self.stats.lock().map(|s| read(&s)).unwrap_or(0)
    }
}

/// Shared handle; clones observe the same scripts and counters.
#[derive(Clone, Default)]
pub struct MemoryDataSource {
    state: Arc<MemoryState>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the script answering `sql`.
    pub fn on<F>(&self, sql: &str, script: F)
    where
        F: Fn(&[Value]) -> Result<Response> + Send + Sync + 'static,
    {
        if let Ok(mut scripts) = self.state.scripts.write() {
            scripts.insert(sql.to_string(), Arc::new(script));
        }
    }

    /// Answers `sql` with the same table on every execution.
    pub fn on_query(&self, sql: &str, table: MemoryTable) {
        self.on(sql, move |_| Ok(Response::table(table.clone())));
    }

    /// Answers `sql` with a fixed update count.
    pub fn on_update(&self, sql: &str, count: i64) {
        self.on(sql, move |_| Ok(Response::updated(count)));
    }

    pub fn executions(&self, sql: &str) -> usize {
        self.state
            .read(|s| s.executions.get(sql).copied().unwrap_or(0))
    }

    pub fn total_executions(&self) -> usize {
        self.state.read(|s| s.executions.values().sum())
    }

    pub fn prepared_statements(&self) -> usize {
        self.state.read(|s| s.prepared)
    }

    pub fn closed_statements(&self) -> usize {
        self.state.read(|s| s.closed_statements)
    }

    pub fn commits(&self) -> usize {
        self.state.read(|s| s.commits)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.read(|s| s.rollbacks)
    }

    pub fn rows_fetched(&self) -> usize {
        self.state.read(|s| s.rows_fetched)
    }

    pub fn connections_opened(&self) -> usize {
        self.state.read(|s| s.connections_opened)
    }

    pub fn connections_closed(&self) -> usize {
        self.state.read(|s| s.connections_closed)
    }
}

impl DataSource for MemoryDataSource {
    fn connection(&self) -> Result<Box<dyn Connection>> {
        self.state.record(|s| s.connections_opened += 1);
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            auto_commit: true,
            closed: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<MemoryState>,
    auto_commit: bool,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::Driver("Connection is closed".into()));
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn prepare(&mut self, sql: &str, options: &PrepareOptions) -> Result<Box<dyn Statement>> {
        self.ensure_open()?;
        self.state.record(|s| s.prepared += 1);
        Ok(Box::new(MemoryStatement {
            state: self.state.clone(),
            sql: sql.to_string(),
            options: options.clone(),
            params: BTreeMap::new(),
            out_registered: BTreeMap::new(),
            batch: Vec::new(),
            pending: VecDeque::new(),
            out_values: BTreeMap::new(),
            generated: None,
            timeout: None,
            closed: false,
        }))
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        self.ensure_open()?;
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state.record(|s| s.commits += 1);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state.record(|s| s.rollbacks += 1);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.state.record(|s| s.connections_closed += 1);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct MemoryStatement {
    state: Arc<MemoryState>,
    sql: String,
    options: PrepareOptions,
    params: BTreeMap<usize, Value>,
    out_registered: BTreeMap<usize, ColumnType>,
    batch: Vec<Vec<Value>>,
    pending: VecDeque<MemoryTable>,
    out_values: BTreeMap<usize, Value>,
    generated: Option<MemoryTable>,
    timeout: Option<Duration>,
    closed: bool,
}

impl MemoryStatement {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::Driver("Statement is closed".into()));
        }
        Ok(())
    }

    fn bound_values(&self) -> Vec<Value> {
        let count = self
            .params
            .keys()
            .chain(self.out_registered.keys())
            .max()
            .copied()
            .unwrap_or(0);
        (1..=count)
            .map(|i| self.params.get(&i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn absorb(&mut self, response: Response) {
        self.pending = response.result_sets.into();
        self.out_values = response.out_parameters;
        self.generated = response.generated_keys;
    }
}

impl Statement for MemoryStatement {
    fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        self.ensure_open()?;
        self.params.insert(index, value);
        Ok(())
    }

    fn register_out_parameter(&mut self, index: usize, column_type: ColumnType) -> Result<()> {
        self.ensure_open()?;
        if !self.options.callable {
            return Err(DbError::Driver(
                "OUT parameters require a callable statement".into(),
            ));
        }
        self.out_registered.insert(index, column_type);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        self.ensure_open()?;
        let response = self.state.run(&self.sql, &self.bound_values())?;
        self.absorb(response);
        Ok(())
    }

    fn execute_update(&mut self) -> Result<i64> {
        self.ensure_open()?;
        let response = self.state.run(&self.sql, &self.bound_values())?;
        let count = response.update_count;
        self.absorb(response);
        Ok(count)
    }

    fn next_result_set(&mut self) -> Result<Option<Box<dyn ResultSet>>> {
        self.ensure_open()?;
        Ok(self.pending.pop_front().map(|table| {
            Box::new(MemoryResultSet::new(table, Some(self.state.clone()))) as Box<dyn ResultSet>
        }))
    }

    fn out_parameter(&self, index: usize) -> Result<Value> {
        if !self.out_registered.contains_key(&index) {
            return Err(DbError::Driver(format!(
                "Parameter {} was not registered for output",
                index
            )));
        }
        Ok(self.out_values.get(&index).cloned().unwrap_or(Value::Null))
    }

    fn add_batch(&mut self) -> Result<()> {
        self.ensure_open()?;
        let values = self.bound_values();
        self.batch.push(values);
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<Vec<i64>> {
        self.ensure_open()?;
        let mut counts = Vec::new();
        let mut keys: Option<MemoryTable> = None;
        for (i, params) in std::mem::take(&mut self.batch).into_iter().enumerate() {
            match self.state.run(&self.sql, &params) {
                Ok(response) => {
                    counts.push(response.update_count);
                    if let Some(generated) = response.generated_keys {
                        match keys.as_mut() {
                            Some(all) => all.rows.extend(generated.rows),
                            None => keys = Some(generated),
                        }
                    }
                }
                Err(e) => {
                    return Err(DbError::BatchUpdate {
                        message: format!("batch entry {} failed: {}", i, e),
                        update_counts: counts,
                    });
                }
            }
        }
        self.generated = keys;
        Ok(counts)
    }

    fn generated_keys(&mut self) -> Result<Option<Box<dyn ResultSet>>> {
        Ok(self
            .generated
            .take()
            .map(|table| Box::new(MemoryResultSet::new(table, None)) as Box<dyn ResultSet>))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.pending.clear();
            self.state.record(|s| s.closed_statements += 1);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct MemoryResultSet {
    // None for generated-key result sets, which are not counted as fetched rows
    state: Option<Arc<MemoryState>>,
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Row>,
    current: Option<Row>,
    closed: bool,
}

impl MemoryResultSet {
    fn new(table: MemoryTable, state: Option<Arc<MemoryState>>) -> Self {
        Self {
            state,
            columns: table.columns,
            rows: table.rows.into(),
            current: None,
            closed: false,
        }
    }
}

impl ResultSet for MemoryResultSet {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(DbError::Driver("ResultSet is closed".into()));
        }
        self.current = self.rows.pop_front();
        if self.current.is_some() {
            if let Some(state) = &self.state {
                state.record(|s| s.rows_fetched += 1);
            }
        }
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> Result<Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DbError::Driver("No current row".into()))?;
        row.get(index)
            .cloned()
            .ok_or_else(|| DbError::Driver(format!("Column index {} out of range", index)))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rows.clear();
        self.current = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
