/// Session Module
///
/// A session owns one driver, the options every cursor and statement reads,
/// and the execution hooks. Cursors and statements keep an `Arc<Session>` and
/// lock the driver only for the duration of a single operation.
use crate::core::datatype::LogicalType;
use crate::core::driver::{ConnectionHandle, Driver, PrepareMode, QueryOutcome, ResultHandle};
use crate::core::hooks::{ExecuteEvent, ExecuteOutcome, ExecutionHook, TracingHook};
use crate::core::options::Options;
use crate::core::value::Value;
use crate::core::{DbError, Result};
use crate::result::ResultCursor;
use crate::statement::placeholder;
use crate::statement::{PreparedStatement, StatementHandle};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// How a row-producing execution hands its result back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultHint {
    /// Wrap the native result in a [`ResultCursor`]
    #[default]
    Cursor,
    /// Return the raw native handle; the caller owns freeing it
    Native,
}

/// Result of running a query or executing a prepared statement.
#[derive(Debug)]
pub enum ExecuteResult {
    /// Rows touched by a manipulation statement
    Affected(u64),
    Rows(ResultCursor),
    Native(ResultHandle),
    /// Nothing to report (dry run, or a statement without rows)
    Nothing,
}

impl ExecuteResult {
    pub fn affected(&self) -> Option<u64> {
        match self {
            ExecuteResult::Affected(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_cursor(self) -> Option<ResultCursor> {
        match self {
            ExecuteResult::Rows(cursor) => Some(cursor),
            _ => None,
        }
    }

    pub fn outcome(&self) -> ExecuteOutcome {
        match self {
            ExecuteResult::Affected(n) => ExecuteOutcome::Affected(*n),
            ExecuteResult::Rows(_) => ExecuteOutcome::Rows,
            ExecuteResult::Native(_) => ExecuteOutcome::Native,
            ExecuteResult::Nothing => ExecuteOutcome::Nothing,
        }
    }
}

/// Native outcome of an execution, before it is wrapped.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Executed {
    Affected(u64),
    Result(ResultHandle),
    Empty,
}

/// Represents different SQL statement kinds, as far as the manipulation
/// flag is concerned
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementKind {
    /// SELECT, WITH and VALUES queries
    Select,
    Insert,
    Update,
    Delete,
    Replace,
    Create,
    Drop,
    Alter,
    /// BEGIN/COMMIT/ROLLBACK and savepoint commands
    Transaction,
    /// SET, GRANT, TRUNCATE and other commands that change state
    Command,
    /// Other statement kinds (PRAGMA, EXPLAIN, SHOW, ...)
    Other,
}

impl StatementKind {
    /// Classifies a SQL statement by its leading keyword
    pub fn from_sql(sql: &str) -> Self {
        let keyword = sql
            .trim_start()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
            .to_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" | "VALUES" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "REPLACE" => StatementKind::Replace,
            "CREATE" => StatementKind::Create,
            "DROP" => StatementKind::Drop,
            "ALTER" => StatementKind::Alter,
            "BEGIN" | "COMMIT" | "ROLLBACK" | "START" | "END" | "SAVEPOINT" | "RELEASE" => {
                StatementKind::Transaction
            }
            "SET" | "GRANT" | "REVOKE" | "TRUNCATE" | "LOCK" | "UNLOCK" | "LOAD" | "COPY" => {
                StatementKind::Command
            }
            _ => StatementKind::Other,
        }
    }

    /// Whether statements of this kind report affected rows instead of a result set.
    pub fn is_manip(self) -> bool {
        !matches!(self, StatementKind::Select | StatementKind::Other)
    }
}

/// A driver plus the options and hooks around it.
pub struct Session {
    driver: Mutex<Box<dyn Driver>>,
    options: Options,
    hooks: Vec<Box<dyn ExecutionHook>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Session {
    /// Creates a session around `driver`, logging executions through `tracing`.
    pub fn new<D: Driver + 'static>(driver: D, options: Options) -> Self {
        Session {
            driver: Mutex::new(Box::new(driver)),
            options,
            hooks: vec![Box::new(TracingHook)],
        }
    }

    /// Adds an execution hook.
    pub fn with_hook<H: ExecutionHook + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn driver(&self) -> Result<MutexGuard<'_, Box<dyn Driver>>> {
        self.driver
            .lock()
            .map_err(|_| DbError::App("Failed to acquire driver lock".to_string()))
    }

    /// Checks if the driver has a live connection
    pub fn is_connected(&self) -> bool {
        self.driver().map(|d| d.is_connected()).unwrap_or(false)
    }

    /// Returns the live connection token, failing if there is none.
    pub fn connection(&self) -> Result<ConnectionHandle> {
        self.driver()?.get_connection()
    }

    /// Closes the driver's connection. Cursors and statements still alive
    /// fail cleanly on their next operation.
    pub fn disconnect(&self) -> Result<()> {
        self.driver()?.disconnect()
    }

    /// Quotes a value through the driver.
    pub fn quote(&self, value: &Value, ty: Option<LogicalType>) -> Result<String> {
        self.driver()?.quote(value, ty, true)
    }

    pub(crate) fn notify_pre(&self, event: &ExecuteEvent<'_>) {
        for hook in &self.hooks {
            hook.pre_execute(event);
        }
    }

    pub(crate) fn notify_post(&self, event: &ExecuteEvent<'_>, outcome: ExecuteOutcome) {
        for hook in &self.hooks {
            hook.post_execute(event, outcome);
        }
    }

    /// Runs a query, detecting from its text whether it manipulates data.
    pub fn query(self: &Arc<Self>, sql: &str) -> Result<ExecuteResult> {
        self.query_with_types(sql, &[])
    }

    /// Runs a query whose result columns have declared logical types.
    pub fn query_with_types(self: &Arc<Self>, sql: &str, types: &[LogicalType]) -> Result<ExecuteResult> {
        let is_manip = StatementKind::from_sql(sql).is_manip();
        self.run_query(sql, is_manip, types, ResultHint::Cursor, None, 0)
    }

    /// Runs a manipulation statement and returns the affected row count.
    pub fn exec(self: &Arc<Self>, sql: &str) -> Result<u64> {
        let result = self.run_query(sql, true, &[], ResultHint::Cursor, None, 0)?;
        Ok(result.affected().unwrap_or(0))
    }

    pub(crate) fn run_query(
        self: &Arc<Self>,
        sql: &str,
        is_manip: bool,
        types: &[LogicalType],
        hint: ResultHint,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<ExecuteResult> {
        let event = ExecuteEvent {
            query: sql,
            is_manip,
            parameters: Vec::new(),
        };
        self.notify_pre(&event);

        if self.options.disable_query {
            let result = if is_manip {
                ExecuteResult::Affected(0)
            } else {
                ExecuteResult::Nothing
            };
            self.notify_post(&event, result.outcome());
            return Ok(result);
        }

        let executed = {
            let mut driver = self.driver()?;
            let conn = driver.get_connection()?;
            let outcome = driver.do_query(conn, sql, is_manip)?;
            if is_manip {
                let affected = driver.affected_rows(conn, &outcome)?;
                if let QueryOutcome::Rows(handle) = outcome {
                    driver.free_result(handle)?;
                }
                Executed::Affected(affected)
            } else {
                match outcome {
                    QueryOutcome::Rows(handle) => Executed::Result(handle),
                    QueryOutcome::Done => Executed::Empty,
                }
            }
        };

        let result = self.finish(executed, types, hint, limit, offset)?;
        self.notify_post(&event, result.outcome());
        Ok(result)
    }

    pub(crate) fn finish(
        self: &Arc<Self>,
        executed: Executed,
        types: &[LogicalType],
        hint: ResultHint,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<ExecuteResult> {
        match executed {
            Executed::Affected(n) => Ok(ExecuteResult::Affected(n)),
            Executed::Result(handle) => self.wrap_result(handle, types, hint, limit, offset),
            Executed::Empty if types.is_empty() => Ok(ExecuteResult::Nothing),
            Executed::Empty => Ok(ExecuteResult::Rows(ResultCursor::without_handle(
                Arc::clone(self),
                types,
            ))),
        }
    }

    /// Wraps a native result handle according to `hint`.
    pub fn wrap_result(
        self: &Arc<Self>,
        handle: ResultHandle,
        types: &[LogicalType],
        hint: ResultHint,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<ExecuteResult> {
        match hint {
            ResultHint::Native => Ok(ExecuteResult::Native(handle)),
            ResultHint::Cursor => {
                let mut cursor = ResultCursor::open(Arc::clone(self), handle);
                cursor.set_limit(limit, offset);
                if !types.is_empty() {
                    cursor.set_result_types(types)?;
                }
                Ok(ExecuteResult::Rows(cursor))
            }
        }
    }

    /// Prepares a statement.
    ///
    /// `?` and `:name` placeholders are recognized. `param_types` are matched
    /// to placeholders in order of appearance and `result_types` to result
    /// columns by position.
    pub fn prepare(
        self: &Arc<Self>,
        sql: &str,
        param_types: &[LogicalType],
        result_types: &[LogicalType],
    ) -> Result<PreparedStatement> {
        let is_manip = StatementKind::from_sql(sql).is_manip();
        let scanned = placeholder::scan(sql);

        let handle = {
            let mut driver = self.driver()?;
            match driver.prepare_mode() {
                PrepareMode::Native => {
                    let conn = driver.get_connection()?;
                    StatementHandle::Native(driver.prepare(conn, &scanned.rewritten)?)
                }
                PrepareMode::Emulated => {
                    let conn = driver.get_connection()?;
                    let name = format!("dbport_{}", Uuid::new_v4().simple());
                    let quoted = driver.quote(
                        &Value::Text(scanned.rewritten.clone()),
                        Some(LogicalType::Text),
                        true,
                    )?;
                    driver.do_query(conn, &format!("PREPARE {} FROM {}", name, quoted), true)?;
                    StatementHandle::Emulated(name)
                }
                PrepareMode::Unsupported => StatementHandle::Unprepared,
            }
        };
        debug!(
            query = sql,
            placeholders = scanned.placeholders.len(),
            ?handle,
            "prepared statement"
        );

        Ok(PreparedStatement::new(
            Arc::clone(self),
            handle,
            sql.to_string(),
            scanned.placeholders,
            param_types,
            result_types,
            is_manip,
        ))
    }
}
