/// SQLite Driver Module
///
/// Implements the driver contract on top of `rusqlite`. Result sets are
/// materialized when a statement runs, so every result is buffered and any
/// number of them may be open at once. Multi-statement text produces one
/// chained result set per row-returning statement, queued behind the handle
/// of the set before it.
use crate::core::datatype::{quote_literal, LogicalType, TypeCode};
use crate::core::driver::{
    Binding, ConnectionHandle, Driver, NativeStatement, PrepareMode, QueryOutcome, ResultHandle,
};
use crate::core::value::{RowMap, Value};
use crate::core::{DbError, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Batch, Connection, Params, Statement};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug)]
struct BufferedResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

#[derive(Debug)]
struct SqliteStatement {
    sql: String,
    bindings: Vec<Binding>,
    long_data: HashMap<usize, Vec<u8>>,
    output: Option<BufferedResult>,
    affected: u64,
}

/// Driver for SQLite databases.
#[derive(Debug)]
pub struct SqliteDriver {
    connection: Option<Connection>,
    path: Option<String>,
    generation: u64,
    next_id: u64,
    results: HashMap<u64, BufferedResult>,
    /// sets still queued behind an open result, keyed by its handle
    pending: HashMap<u64, VecDeque<BufferedResult>>,
    advanced: HashMap<u64, BufferedResult>,
    statements: HashMap<u64, SqliteStatement>,
}

fn no_connection() -> DbError {
    DbError::Connection("no database connection available".to_string())
}

fn unknown_result(result: ResultHandle) -> DbError {
    DbError::Driver(format!("unknown result handle: {}", result.0))
}

fn unknown_statement(stmt: NativeStatement) -> DbError {
    DbError::Driver(format!("unknown statement handle: {}", stmt.0))
}

impl SqliteDriver {
    /// Opens a database file
    pub fn connect(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut driver = Self::with_connection(conn)?;
        if path != ":memory:" {
            driver.path = Some(path.to_string());
        }
        Ok(driver)
    }

    /// Opens a private in-memory database
    pub fn connect_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // Initialize connection with common pragmas
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(SqliteDriver {
            connection: Some(conn),
            path: None,
            generation: 1,
            next_id: 0,
            results: HashMap::new(),
            pending: HashMap::new(),
            advanced: HashMap::new(),
            statements: HashMap::new(),
        })
    }

    /// Path of the open database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn connection(&self, handle: ConnectionHandle) -> Result<&Connection> {
        match &self.connection {
            Some(conn) if handle.0 == self.generation => Ok(conn),
            Some(_) => Err(DbError::Connection("connection handle is stale".to_string())),
            None => Err(no_connection()),
        }
    }

    fn live_connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or_else(no_connection)
    }

    fn register(&mut self, result: BufferedResult) -> ResultHandle {
        self.next_id += 1;
        self.results.insert(self.next_id, result);
        ResultHandle(self.next_id)
    }

    fn result_mut(&mut self, result: ResultHandle) -> Result<&mut BufferedResult> {
        self.results.get_mut(&result.0).ok_or_else(|| unknown_result(result))
    }
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn materialize<P: Params>(stmt: &mut Statement<'_>, params: P) -> Result<BufferedResult> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params)?;
    let mut data = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(to_value(row.get_ref(i)?));
        }
        data.push(values);
    }
    Ok(BufferedResult {
        columns,
        rows: data,
        cursor: 0,
    })
}

/// Turns a binding descriptor into the value handed to SQLite.
fn bound_value(binding: &Binding, long_data: Option<Vec<u8>>) -> SqlValue {
    match binding {
        Binding::Scalar { literal: None, .. } => SqlValue::Null,
        Binding::Scalar {
            code,
            literal: Some(literal),
        } => match code {
            TypeCode::Integer => literal
                .parse()
                .map(SqlValue::Integer)
                .unwrap_or_else(|_| SqlValue::Text(literal.clone())),
            TypeCode::Double => literal
                .parse()
                .map(SqlValue::Real)
                .unwrap_or_else(|_| SqlValue::Text(literal.clone())),
            TypeCode::String => SqlValue::Text(literal.clone()),
            TypeCode::Blob => SqlValue::Blob(literal.clone().into_bytes()),
        },
        Binding::Lob { ty } => {
            let data = long_data.unwrap_or_default();
            match ty {
                LogicalType::Clob => SqlValue::Text(String::from_utf8_lossy(&data).into_owned()),
                _ => SqlValue::Blob(data),
            }
        }
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn get_connection(&mut self) -> Result<ConnectionHandle> {
        self.live_connection()?;
        Ok(ConnectionHandle(self.generation))
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.take() {
            conn.close().map_err(|(_, e)| DbError::Database(e))?;
        }
        self.results.clear();
        self.pending.clear();
        self.advanced.clear();
        self.statements.clear();
        self.generation += 1;
        self.path = None;
        Ok(())
    }

    fn do_query(&mut self, conn: ConnectionHandle, sql: &str, is_manip: bool) -> Result<QueryOutcome> {
        debug!(sql, is_manip, "sqlite query");
        let mut sets = Vec::new();
        {
            let mut batch = Batch::new(self.connection(conn)?, sql);
            while let Some(mut stmt) = batch.next()? {
                if stmt.column_count() == 0 {
                    stmt.execute([])?;
                } else {
                    sets.push(materialize(&mut stmt, [])?);
                }
            }
        }

        let mut sets = sets.into_iter();
        match sets.next() {
            Some(first) => {
                let handle = self.register(first);
                let rest: VecDeque<_> = sets.collect();
                if !rest.is_empty() {
                    self.pending.insert(handle.0, rest);
                }
                Ok(QueryOutcome::Rows(handle))
            }
            None => Ok(QueryOutcome::Done),
        }
    }

    fn affected_rows(&mut self, conn: ConnectionHandle, _outcome: &QueryOutcome) -> Result<u64> {
        Ok(self.connection(conn)?.changes() as u64)
    }

    fn quote(&self, value: &Value, ty: Option<LogicalType>, with_quotes: bool) -> Result<String> {
        quote_literal(value, ty, with_quotes)
    }

    fn num_fields(&mut self, result: ResultHandle) -> Result<usize> {
        Ok(self.result_mut(result)?.columns.len())
    }

    fn field_name(&mut self, result: ResultHandle, index: usize) -> Result<String> {
        self.result_mut(result)?
            .columns
            .get(index)
            .cloned()
            .ok_or_else(|| DbError::Driver(format!("column index out of range: {}", index)))
    }

    fn fetch_row(&mut self, result: ResultHandle) -> Result<Option<Vec<Value>>> {
        let result = self.result_mut(result)?;
        let row = result.rows.get(result.cursor).cloned();
        if row.is_some() {
            result.cursor += 1;
        }
        Ok(row)
    }

    fn fetch_assoc(&mut self, result: ResultHandle) -> Result<Option<RowMap>> {
        let result = self.result_mut(result)?;
        let row = match result.rows.get(result.cursor) {
            Some(row) => row,
            None => return Ok(None),
        };
        let map = result.columns.iter().cloned().zip(row.iter().cloned()).collect();
        result.cursor += 1;
        Ok(Some(map))
    }

    fn seek(&mut self, result: ResultHandle, row: usize) -> Result<bool> {
        let result = self.result_mut(result)?;
        if row >= result.rows.len() {
            return Ok(false);
        }
        result.cursor = row;
        Ok(true)
    }

    fn free_result(&mut self, result: ResultHandle) -> Result<bool> {
        self.pending.remove(&result.0);
        self.advanced.remove(&result.0);
        Ok(self.results.remove(&result.0).is_some())
    }

    fn more_results(&mut self, conn: ConnectionHandle, result: ResultHandle) -> Result<bool> {
        self.connection(conn)?;
        Ok(self.pending.get(&result.0).is_some_and(|chain| !chain.is_empty()))
    }

    fn next_result(&mut self, conn: ConnectionHandle, result: ResultHandle) -> Result<bool> {
        self.connection(conn)?;
        match self.pending.get_mut(&result.0).and_then(VecDeque::pop_front) {
            Some(next) => {
                self.advanced.insert(result.0, next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn use_result(&mut self, conn: ConnectionHandle, result: ResultHandle) -> Result<Option<ResultHandle>> {
        self.connection(conn)?;
        let next = match self.advanced.remove(&result.0) {
            Some(next) => next,
            None => return Ok(None),
        };
        let handle = self.register(next);
        if let Some(rest) = self.pending.remove(&result.0) {
            if !rest.is_empty() {
                self.pending.insert(handle.0, rest);
            }
        }
        Ok(Some(handle))
    }

    fn prepare_mode(&self) -> PrepareMode {
        PrepareMode::Native
    }

    fn prepare(&mut self, conn: ConnectionHandle, sql: &str) -> Result<NativeStatement> {
        // compiles the statement now so syntax errors surface at prepare time
        self.connection(conn)?.prepare_cached(sql)?;
        self.next_id += 1;
        self.statements.insert(
            self.next_id,
            SqliteStatement {
                sql: sql.to_string(),
                bindings: Vec::new(),
                long_data: HashMap::new(),
                output: None,
                affected: 0,
            },
        );
        Ok(NativeStatement(self.next_id))
    }

    fn bind(&mut self, stmt: NativeStatement, bindings: &[Binding]) -> Result<()> {
        let connection = self.connection.as_ref().ok_or_else(no_connection)?;
        let statement = self.statements.get_mut(&stmt.0).ok_or_else(|| unknown_statement(stmt))?;
        let expected = connection.prepare_cached(&statement.sql)?.parameter_count();
        if expected != bindings.len() {
            return Err(DbError::Driver(format!(
                "statement expects {} parameters, got {}",
                expected,
                bindings.len()
            )));
        }
        statement.bindings = bindings.to_vec();
        statement.long_data.clear();
        Ok(())
    }

    fn send_long_data(&mut self, stmt: NativeStatement, index: usize, chunk: &[u8]) -> Result<()> {
        let statement = self.statements.get_mut(&stmt.0).ok_or_else(|| unknown_statement(stmt))?;
        match statement.bindings.get(index) {
            Some(Binding::Lob { .. }) => {
                statement.long_data.entry(index).or_default().extend_from_slice(chunk);
                Ok(())
            }
            _ => Err(DbError::Driver(format!(
                "parameter {} is not bound as a large object",
                index
            ))),
        }
    }

    fn execute(&mut self, stmt: NativeStatement) -> Result<()> {
        let connection = self.connection.as_ref().ok_or_else(no_connection)?;
        let statement = self.statements.get_mut(&stmt.0).ok_or_else(|| unknown_statement(stmt))?;

        let mut long_data = std::mem::take(&mut statement.long_data);
        let params: Vec<SqlValue> = statement
            .bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| bound_value(binding, long_data.remove(&index)))
            .collect();

        let mut prepared = connection.prepare_cached(&statement.sql)?;
        if prepared.column_count() == 0 {
            statement.affected = prepared.execute(params_from_iter(params))? as u64;
            statement.output = None;
        } else {
            statement.output = Some(materialize(&mut prepared, params_from_iter(params))?);
            statement.affected = 0;
        }
        Ok(())
    }

    fn statement_affected_rows(&mut self, stmt: NativeStatement) -> Result<u64> {
        self.statements
            .get(&stmt.0)
            .map(|s| s.affected)
            .ok_or_else(|| unknown_statement(stmt))
    }

    fn statement_result(&mut self, stmt: NativeStatement) -> Result<ResultHandle> {
        let output = self
            .statements
            .get_mut(&stmt.0)
            .ok_or_else(|| unknown_statement(stmt))?
            .output
            .take()
            .ok_or_else(|| DbError::Driver("statement produced no result set".to_string()))?;
        Ok(self.register(output))
    }

    fn close(&mut self, stmt: NativeStatement) -> Result<()> {
        self.statements
            .remove(&stmt.0)
            .map(|_| ())
            .ok_or_else(|| unknown_statement(stmt))
    }
}
