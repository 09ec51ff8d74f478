/// # Test Utilities Module
///
/// Scripted driver for unit tests. `MockDriver` serves result sets queued
/// by the test and records every native call it receives, so tests can
/// assert both on what the portability layer returned and on what it asked
/// the engine to do. Connection accessors and quoting are not recorded.
use crate::core::datatype::quote_literal;
use crate::core::driver::{
    binding_types, Binding, ConnectionHandle, Driver, NativeStatement, PrepareMode, QueryOutcome,
    ResultHandle,
};
use crate::core::hooks::{ExecuteEvent, ExecuteOutcome, ExecutionHook};
use crate::core::options::Options;
use crate::core::session::Session;
use crate::core::value::{RowMap, Value};
use crate::core::{DbError, Result};
use crate::LogicalType;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted result set.
#[derive(Debug, Clone, Default)]
pub struct MockResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl MockResult {
    pub fn new(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        MockResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            cursor: 0,
        }
    }
}

#[derive(Debug, Default)]
struct MockStatement {
    bindings: Vec<Binding>,
    long_data: HashMap<usize, Vec<u8>>,
}

#[derive(Debug)]
struct MockState {
    connected: bool,
    prepare_mode: PrepareMode,
    calls: Vec<String>,
    next_id: u64,
    results: HashMap<u64, MockResult>,
    queued: VecDeque<Vec<MockResult>>,
    pending: HashMap<u64, VecDeque<MockResult>>,
    advanced: HashMap<u64, MockResult>,
    statements: HashMap<u64, MockStatement>,
    last_bindings: Vec<Binding>,
    last_long_data: HashMap<usize, Vec<u8>>,
    affected: u64,
    fail_free: bool,
    fail_next_result: bool,
    fail_bind: bool,
    fail_execute: bool,
    fail_close: bool,
}

impl MockState {
    fn register(&mut self, result: MockResult) -> ResultHandle {
        self.next_id += 1;
        self.results.insert(self.next_id, result);
        ResultHandle(self.next_id)
    }

    /// Opens the first set of a batch and chains the rest behind it.
    fn open_batch(&mut self, batch: Vec<MockResult>) -> Option<ResultHandle> {
        let mut batch = batch.into_iter();
        let first = batch.next()?;
        let handle = self.register(first);
        self.pending.insert(handle.0, batch.collect());
        Some(handle)
    }

    fn result(&mut self, handle: ResultHandle) -> Result<&mut MockResult> {
        self.results
            .get_mut(&handle.0)
            .ok_or_else(|| DbError::Driver(format!("unknown result {}", handle.0)))
    }

    fn check(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DbError::Connection("mock connection closed".to_string()))
        }
    }
}

/// Driver half of the mock; owned by the session.
#[derive(Debug)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

/// Test half of the mock; scripts results and inspects calls.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new(prepare_mode: PrepareMode) -> (MockDriver, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            connected: true,
            prepare_mode,
            calls: Vec::new(),
            next_id: 0,
            results: HashMap::new(),
            queued: VecDeque::new(),
            pending: HashMap::new(),
            advanced: HashMap::new(),
            statements: HashMap::new(),
            last_bindings: Vec::new(),
            last_long_data: HashMap::new(),
            affected: 0,
            fail_free: false,
            fail_next_result: false,
            fail_bind: false,
            fail_execute: false,
            fail_close: false,
        }));
        (
            MockDriver {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: String) -> MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

/// A session over a fresh mock driver.
pub fn mock_session(prepare_mode: PrepareMode, options: Options) -> (Arc<Session>, MockHandle) {
    let (driver, handle) = MockDriver::new(prepare_mode);
    (Arc::new(Session::new(driver, options)), handle)
}

/// A session over a fresh mock driver with an extra hook installed.
pub fn mock_session_with_hook<H: ExecutionHook + 'static>(
    prepare_mode: PrepareMode,
    options: Options,
    hook: H,
) -> (Arc<Session>, MockHandle) {
    let (driver, handle) = MockDriver::new(prepare_mode);
    (Arc::new(Session::new(driver, options).with_hook(hook)), handle)
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a result directly, as if a query had produced it.
    pub fn push_result(&self, result: MockResult) -> ResultHandle {
        self.lock().register(result)
    }

    /// Opens the first result of a batch directly and chains the rest.
    pub fn push_batch(&self, batch: Vec<MockResult>) -> ResultHandle {
        let mut state = self.lock();
        let mut batch = batch.into_iter();
        let first = batch.next().unwrap_or_default();
        let handle = state.register(first);
        state.pending.insert(handle.0, batch.collect());
        handle
    }

    /// Queues a result for the next row-producing query or statement.
    pub fn queue_result(&self, result: MockResult) {
        self.queue_batch(vec![result]);
    }

    pub fn queue_batch(&self, batch: Vec<MockResult>) {
        self.lock().queued.push_back(batch);
    }

    /// Drops a result without going through the driver.
    pub fn forget_result(&self, handle: ResultHandle) {
        self.lock().results.remove(&handle.0);
    }

    pub fn open_results(&self) -> usize {
        self.lock().results.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of recorded calls whose name starts with `name`.
    pub fn count_calls(&self, name: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.starts_with(name)).count()
    }

    pub fn last_bindings(&self) -> Vec<Binding> {
        self.lock().last_bindings.clone()
    }

    /// Long data received for parameter `index` by the last executed statement.
    pub fn long_data(&self, index: usize) -> Vec<u8> {
        self.lock().last_long_data.get(&index).cloned().unwrap_or_default()
    }

    pub fn set_affected(&self, affected: u64) {
        self.lock().affected = affected;
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn fail_free(&self, fail: bool) {
        self.lock().fail_free = fail;
    }

    pub fn fail_next_result(&self, fail: bool) {
        self.lock().fail_next_result = fail;
    }

    pub fn fail_bind(&self, fail: bool) {
        self.lock().fail_bind = fail;
    }

    pub fn fail_execute(&self, fail: bool) {
        self.lock().fail_execute = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        self.lock().fail_close = fail;
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn get_connection(&mut self) -> Result<ConnectionHandle> {
        self.lock().check()?;
        Ok(ConnectionHandle(1))
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.record("disconnect".to_string());
        state.connected = false;
        state.results.clear();
        state.pending.clear();
        state.advanced.clear();
        state.statements.clear();
        Ok(())
    }

    fn do_query(&mut self, _conn: ConnectionHandle, sql: &str, is_manip: bool) -> Result<QueryOutcome> {
        let mut state = self.record(format!("do_query:{}", sql));
        state.check()?;
        if is_manip {
            return Ok(QueryOutcome::Done);
        }
        match state.queued.pop_front().and_then(|batch| state.open_batch(batch)) {
            Some(handle) => Ok(QueryOutcome::Rows(handle)),
            None => Ok(QueryOutcome::Done),
        }
    }

    fn affected_rows(&mut self, _conn: ConnectionHandle, _outcome: &QueryOutcome) -> Result<u64> {
        Ok(self.lock().affected)
    }

    fn quote(&self, value: &Value, ty: Option<LogicalType>, with_quotes: bool) -> Result<String> {
        quote_literal(value, ty, with_quotes)
    }

    fn num_fields(&mut self, result: ResultHandle) -> Result<usize> {
        Ok(self.lock().result(result)?.columns.len())
    }

    fn field_name(&mut self, result: ResultHandle, index: usize) -> Result<String> {
        self.lock()
            .result(result)?
            .columns
            .get(index)
            .cloned()
            .ok_or_else(|| DbError::Driver(format!("no column {}", index)))
    }

    fn fetch_row(&mut self, result: ResultHandle) -> Result<Option<Vec<Value>>> {
        let mut state = self.record(format!("fetch_row:{}", result.0));
        let result = state.result(result)?;
        let row = result.rows.get(result.cursor).cloned();
        if row.is_some() {
            result.cursor += 1;
        }
        Ok(row)
    }

    fn fetch_assoc(&mut self, result: ResultHandle) -> Result<Option<RowMap>> {
        let mut state = self.record(format!("fetch_assoc:{}", result.0));
        let result = state.result(result)?;
        let row = match result.rows.get(result.cursor) {
            Some(row) => row.clone(),
            None => return Ok(None),
        };
        result.cursor += 1;
        Ok(Some(result.columns.iter().cloned().zip(row).collect()))
    }

    fn seek(&mut self, result: ResultHandle, row: usize) -> Result<bool> {
        let mut state = self.record(format!("seek:{}:{}", result.0, row));
        let result = state.result(result)?;
        if row >= result.rows.len() {
            return Ok(false);
        }
        result.cursor = row;
        Ok(true)
    }

    fn free_result(&mut self, result: ResultHandle) -> Result<bool> {
        let mut state = self.record(format!("free_result:{}", result.0));
        if state.fail_free {
            return Ok(false);
        }
        state.pending.remove(&result.0);
        state.advanced.remove(&result.0);
        Ok(state.results.remove(&result.0).is_some())
    }

    fn more_results(&mut self, _conn: ConnectionHandle, result: ResultHandle) -> Result<bool> {
        let state = self.record(format!("more_results:{}", result.0));
        state.check()?;
        Ok(state.pending.get(&result.0).is_some_and(|chain| !chain.is_empty()))
    }

    fn next_result(&mut self, _conn: ConnectionHandle, result: ResultHandle) -> Result<bool> {
        let mut state = self.record(format!("next_result:{}", result.0));
        state.check()?;
        if state.fail_next_result {
            return Err(DbError::Driver("lost connection during next_result".to_string()));
        }
        match state.pending.get_mut(&result.0).and_then(VecDeque::pop_front) {
            Some(next) => {
                state.advanced.insert(result.0, next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn use_result(&mut self, _conn: ConnectionHandle, result: ResultHandle) -> Result<Option<ResultHandle>> {
        let mut state = self.record(format!("use_result:{}", result.0));
        state.check()?;
        let next = match state.advanced.remove(&result.0) {
            Some(next) => next,
            None => return Ok(None),
        };
        let handle = state.register(next);
        if let Some(rest) = state.pending.remove(&result.0) {
            state.pending.insert(handle.0, rest);
        }
        Ok(Some(handle))
    }

    fn prepare_mode(&self) -> PrepareMode {
        self.lock().prepare_mode
    }

    fn prepare(&mut self, _conn: ConnectionHandle, sql: &str) -> Result<NativeStatement> {
        let mut state = self.record(format!("prepare:{}", sql));
        state.check()?;
        state.next_id += 1;
        let id = state.next_id;
        state.statements.insert(id, MockStatement::default());
        Ok(NativeStatement(id))
    }

    fn bind(&mut self, stmt: NativeStatement, bindings: &[Binding]) -> Result<()> {
        let mut state = self.record(format!("bind:{}", binding_types(bindings)));
        if state.fail_bind {
            return Err(DbError::Driver("type mismatch".to_string()));
        }
        let statement = state
            .statements
            .get_mut(&stmt.0)
            .ok_or_else(|| DbError::Driver("unknown statement".to_string()))?;
        statement.bindings = bindings.to_vec();
        statement.long_data.clear();
        Ok(())
    }

    fn send_long_data(&mut self, stmt: NativeStatement, index: usize, chunk: &[u8]) -> Result<()> {
        let mut state = self.record(format!("send_long_data:{}:{}", index, chunk.len()));
        let statement = state
            .statements
            .get_mut(&stmt.0)
            .ok_or_else(|| DbError::Driver("unknown statement".to_string()))?;
        statement.long_data.entry(index).or_default().extend_from_slice(chunk);
        Ok(())
    }

    fn execute(&mut self, stmt: NativeStatement) -> Result<()> {
        let mut state = self.record(format!("execute:{}", stmt.0));
        if state.fail_execute {
            return Err(DbError::Driver("constraint violation".to_string()));
        }
        let statement = state
            .statements
            .get_mut(&stmt.0)
            .ok_or_else(|| DbError::Driver("unknown statement".to_string()))?;
        let bindings = statement.bindings.clone();
        let long_data = std::mem::take(&mut statement.long_data);
        state.last_bindings = bindings;
        state.last_long_data = long_data;
        Ok(())
    }

    fn statement_affected_rows(&mut self, _stmt: NativeStatement) -> Result<u64> {
        Ok(self.lock().affected)
    }

    fn store_result(&mut self, stmt: NativeStatement) -> Result<()> {
        self.record(format!("store_result:{}", stmt.0));
        Ok(())
    }

    fn statement_result(&mut self, stmt: NativeStatement) -> Result<ResultHandle> {
        let mut state = self.record(format!("statement_result:{}", stmt.0));
        let batch = state.queued.pop_front().unwrap_or_default();
        Ok(state
            .open_batch(batch)
            .unwrap_or_else(|| state.register(MockResult::default())))
    }

    fn close(&mut self, stmt: NativeStatement) -> Result<()> {
        let mut state = self.record(format!("close:{}", stmt.0));
        if state.fail_close {
            return Err(DbError::Driver("statement busy".to_string()));
        }
        state.statements.remove(&stmt.0);
        Ok(())
    }
}

/// Hook that records events as strings.
#[derive(Debug, Default)]
pub struct RecordingHook {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingHook {
    pub fn events(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.events)
    }
}

impl ExecutionHook for RecordingHook {
    fn pre_execute(&self, event: &ExecuteEvent<'_>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(format!("pre:{}:manip={}", event.query, event.is_manip));
        }
    }

    fn post_execute(&self, event: &ExecuteEvent<'_>, outcome: ExecuteOutcome) {
        if let Ok(mut events) = self.events.lock() {
            events.push(format!("post:{}:{:?}", event.query, outcome));
        }
    }
}
