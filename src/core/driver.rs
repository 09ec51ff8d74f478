/// Driver Contract Module
///
/// The interface a concrete engine driver exposes to the portability layer.
/// Handles are plain ids: the driver owns the native objects and the layer
/// above only passes ids back in. Every call reports failure through `Err`,
/// and negative-but-successful outcomes (no more results, seek out of range,
/// free refused) through the `Ok` value, so the two can be told apart.
use crate::core::datatype::{LogicalType, TypeCode};
use crate::core::value::{RowMap, Value};
use crate::core::{DbError, Result};

/// Token for the live connection. A token handed out before the connection
/// was closed or reopened is rejected by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Id of an open native result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultHandle(pub u64);

/// Id of a natively prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeStatement(pub u64);

/// What a literal query produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// A row-producing result set
    Rows(ResultHandle),
    /// The statement ran without producing rows
    Done,
}

/// How a driver supports prepared statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    /// Native prepared statements with parameter binding
    Native,
    /// Server-side `PREPARE` / `EXECUTE ... USING @var`
    Emulated,
    /// No preparation; placeholders are substituted with literals
    Unsupported,
}

/// One parameter of a native bind call.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Inline value, pre-rendered as an unquoted literal. `None` binds NULL.
    Scalar {
        code: TypeCode,
        literal: Option<String>,
    },
    /// Large object whose data follows through `send_long_data`.
    Lob { ty: LogicalType },
}

impl Binding {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Binding::Scalar { code, .. } => *code,
            Binding::Lob { .. } => TypeCode::Blob,
        }
    }
}

/// Renders the combined type string of a bind call, e.g. `"isb"`.
pub fn binding_types(bindings: &[Binding]) -> String {
    bindings.iter().map(|b| b.type_code().as_char()).collect()
}

fn unsupported(operation: &str) -> DbError {
    DbError::Driver(format!("{} is not supported by this driver", operation))
}

/// Engine driver consumed by the session, cursors and statements.
///
/// Statement operations have default bodies that fail, so drivers without
/// native preparation only implement the query and result-set side.
pub trait Driver: Send {
    /// Short engine name used in logs.
    fn name(&self) -> &str;

    /// Returns the live connection or fails if there is none.
    fn get_connection(&mut self) -> Result<ConnectionHandle>;

    fn is_connected(&self) -> bool;

    /// Closes the connection. Open results and statements die with it.
    fn disconnect(&mut self) -> Result<()>;

    /// Runs literal SQL text.
    fn do_query(&mut self, conn: ConnectionHandle, sql: &str, is_manip: bool) -> Result<QueryOutcome>;

    /// Row count of the last manipulation on this connection.
    fn affected_rows(&mut self, conn: ConnectionHandle, outcome: &QueryOutcome) -> Result<u64>;

    /// Renders an engine-safe literal for `value`.
    fn quote(&self, value: &Value, ty: Option<LogicalType>, with_quotes: bool) -> Result<String>;

    fn num_fields(&mut self, result: ResultHandle) -> Result<usize>;

    fn field_name(&mut self, result: ResultHandle, index: usize) -> Result<String>;

    /// Next row by position, `None` at end of data.
    fn fetch_row(&mut self, result: ResultHandle) -> Result<Option<Vec<Value>>>;

    /// Next row keyed by column name, `None` at end of data.
    fn fetch_assoc(&mut self, result: ResultHandle) -> Result<Option<RowMap>>;

    /// Moves to absolute row `row`. `Ok(false)` when out of range.
    fn seek(&mut self, result: ResultHandle, row: usize) -> Result<bool>;

    /// Releases a result and any sets still chained behind it.
    /// `Ok(false)` when the engine refused.
    fn free_result(&mut self, result: ResultHandle) -> Result<bool>;

    /// Whether further result sets of the same batch are chained behind `result`.
    fn more_results(&mut self, conn: ConnectionHandle, result: ResultHandle) -> Result<bool>;

    /// Advances the chain behind `result` to its next set.
    fn next_result(&mut self, conn: ConnectionHandle, result: ResultHandle) -> Result<bool>;

    /// Opens the set advanced to by `next_result`. The rest of the chain
    /// moves behind the returned handle; `result` itself stays open.
    fn use_result(&mut self, conn: ConnectionHandle, result: ResultHandle) -> Result<Option<ResultHandle>>;

    fn prepare_mode(&self) -> PrepareMode {
        PrepareMode::Unsupported
    }

    /// Prepares `sql` (positional `?` placeholders) natively.
    fn prepare(&mut self, _conn: ConnectionHandle, _sql: &str) -> Result<NativeStatement> {
        Err(unsupported("native prepare"))
    }

    fn bind(&mut self, _stmt: NativeStatement, _bindings: &[Binding]) -> Result<()> {
        Err(unsupported("parameter binding"))
    }

    /// Appends one chunk of data to the large-object parameter at `index`.
    fn send_long_data(&mut self, _stmt: NativeStatement, _index: usize, _chunk: &[u8]) -> Result<()> {
        Err(unsupported("long data transmission"))
    }

    fn execute(&mut self, _stmt: NativeStatement) -> Result<()> {
        Err(unsupported("statement execution"))
    }

    fn statement_affected_rows(&mut self, _stmt: NativeStatement) -> Result<u64> {
        Err(unsupported("statement row counts"))
    }

    /// Buffers the whole statement result on the client.
    fn store_result(&mut self, _stmt: NativeStatement) -> Result<()> {
        Ok(())
    }

    /// Hands the statement's current result set out as a result handle.
    fn statement_result(&mut self, _stmt: NativeStatement) -> Result<ResultHandle> {
        Err(unsupported("statement results"))
    }

    fn close(&mut self, _stmt: NativeStatement) -> Result<()> {
        Err(unsupported("statement close"))
    }
}
