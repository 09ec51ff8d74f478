/// Prepared Statement Module
///
/// A prepared statement binds values to the placeholders of a query,
/// executes it through one of three strategies (native binding, server-side
/// `PREPARE`/`EXECUTE` with session variables, or literal substitution) and
/// wraps the outcome as an affected-row count or a result cursor.
mod lob;
pub mod placeholder;

pub use lob::Param;
pub use placeholder::Placeholder;

use crate::core::datatype::{LogicalType, TypeCode};
use crate::core::driver::{Binding, NativeStatement, QueryOutcome};
use crate::core::hooks::ExecuteEvent;
use crate::core::session::{ExecuteResult, Executed, ResultHint, Session};
use crate::core::value::Value;
use crate::core::{DbError, Result};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// How the statement exists on the engine side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementHandle {
    /// Natively prepared statement
    Native(NativeStatement),
    /// Server-side plan created with `PREPARE <name> FROM ...`
    Emulated(String),
    /// Nothing prepared; placeholders are replaced by quoted literals
    Unprepared,
}

#[derive(Debug)]
pub struct PreparedStatement {
    session: Arc<Session>,
    handle: StatementHandle,
    query: String,
    /// `None` once freed
    positions: Option<Vec<Placeholder>>,
    values: HashMap<String, Param>,
    types: HashMap<String, LogicalType>,
    result_types: Vec<LogicalType>,
    is_manip: bool,
    limit: Option<usize>,
    offset: usize,
}

enum Strategy {
    Native(NativeStatement),
    Emulated(String),
}

fn already_freed() -> DbError {
    DbError::AlreadyFreed("prepared statement has already been freed".to_string())
}

impl PreparedStatement {
    pub(crate) fn new(
        session: Arc<Session>,
        handle: StatementHandle,
        query: String,
        positions: Vec<Placeholder>,
        param_types: &[LogicalType],
        result_types: &[LogicalType],
        is_manip: bool,
    ) -> Self {
        let mut types = HashMap::new();
        let mut declared = param_types.iter();
        for placeholder in &positions {
            if types.contains_key(&placeholder.name) {
                continue;
            }
            match declared.next() {
                Some(ty) => {
                    types.insert(placeholder.name.clone(), *ty);
                }
                None => break,
            }
        }

        PreparedStatement {
            session,
            handle,
            query,
            positions: Some(positions),
            values: HashMap::new(),
            types,
            result_types: result_types.to_vec(),
            is_manip,
            limit: None,
            offset: 0,
        }
    }

    pub fn handle(&self) -> &StatementHandle {
        &self.handle
    }

    /// The query text as given to `prepare`.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_freed(&self) -> bool {
        self.positions.is_none()
    }

    pub fn is_manip(&self) -> bool {
        self.is_manip
    }

    fn positions(&self) -> Result<&[Placeholder]> {
        self.positions.as_deref().ok_or_else(already_freed)
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn parameter_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for placeholder in self.positions()? {
            if !names.contains(&placeholder.name) {
                names.push(placeholder.name.clone());
            }
        }
        Ok(names)
    }

    fn placeholder_key(&self, key: &str) -> Result<String> {
        let name = key.strip_prefix(':').unwrap_or(key);
        if self.positions()?.iter().any(|p| p.name == name) {
            Ok(name.to_string())
        } else {
            Err(DbError::NotFound(format!(
                "unable to bind to missing placeholder: {}",
                name
            )))
        }
    }

    /// Binds a value to a placeholder, by position (`0`, `1`, ...) or name.
    pub fn bind_value<K: ToString>(&mut self, key: K, value: impl Into<Value>) -> Result<()> {
        let name = self.placeholder_key(&key.to_string())?;
        self.values.insert(name, Param::Value(value.into()));
        Ok(())
    }

    /// Binds a value and declares its logical type.
    pub fn bind_param<K: ToString>(&mut self, key: K, value: impl Into<Value>, ty: LogicalType) -> Result<()> {
        let name = self.placeholder_key(&key.to_string())?;
        self.values.insert(name.clone(), Param::Value(value.into()));
        self.types.insert(name, ty);
        Ok(())
    }

    pub fn bind_values<I, K, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: Into<Value>,
    {
        for (key, value) in values {
            self.bind_value(key, value)?;
        }
        Ok(())
    }

    /// Binds a stream read at execute time as a large object.
    ///
    /// The stream is consumed by the first execution.
    pub fn bind_stream<K, R>(&mut self, key: K, reader: R) -> Result<()>
    where
        K: ToString,
        R: Read + Send + 'static,
    {
        let name = self.placeholder_key(&key.to_string())?;
        self.values.insert(name, Param::Stream(Box::new(reader)));
        Ok(())
    }

    /// Sets the row window of results produced by this statement.
    pub fn set_limit(&mut self, limit: Option<usize>, offset: usize) -> Result<()> {
        self.positions()?;
        self.limit = limit;
        self.offset = offset;
        Ok(())
    }

    /// Overrides whether the statement reports affected rows.
    pub fn set_manip(&mut self, is_manip: bool) -> Result<()> {
        self.positions()?;
        self.is_manip = is_manip;
        Ok(())
    }

    fn event<'a>(&'a self, positions: &'a [Placeholder]) -> ExecuteEvent<'a> {
        ExecuteEvent {
            query: &self.query,
            is_manip: self.is_manip,
            parameters: positions
                .iter()
                .map(|p| (p.name.as_str(), self.values.get(&p.name).and_then(Param::as_value)))
                .collect(),
        }
    }

    pub fn execute(&mut self) -> Result<ExecuteResult> {
        self.execute_with(ResultHint::Cursor)
    }

    /// Executes the statement with the bound values.
    pub fn execute_with(&mut self, hint: ResultHint) -> Result<ExecuteResult> {
        let positions = self.positions()?.to_vec();
        let strategy = match self.handle.clone() {
            StatementHandle::Unprepared => return self.execute_unprepared(&positions, hint),
            StatementHandle::Native(stmt) => Strategy::Native(stmt),
            StatementHandle::Emulated(plan) => Strategy::Emulated(plan),
        };

        let session = Arc::clone(&self.session);
        session.notify_pre(&self.event(&positions));

        if session.options().disable_query {
            let result = if self.is_manip {
                ExecuteResult::Affected(0)
            } else {
                ExecuteResult::Nothing
            };
            session.notify_post(&self.event(&positions), result.outcome());
            return Ok(result);
        }

        session.connection()?;
        if let Some(missing) = positions.iter().find(|p| !self.values.contains_key(&p.name)) {
            return Err(DbError::NotFound(format!(
                "unable to bind to missing placeholder: {}",
                missing.name
            )));
        }

        let executed = match strategy {
            Strategy::Native(stmt) => self.execute_native(stmt, &positions)?,
            Strategy::Emulated(plan) => self.execute_emulated(&plan, &positions)?,
        };
        let result = session.finish(executed, &self.result_types, hint, self.limit, self.offset)?;

        session.notify_post(&self.event(&positions), result.outcome());
        Ok(result)
    }

    fn execute_emulated(&mut self, plan: &str, positions: &[Placeholder]) -> Result<Executed> {
        let options = self.session.options();
        let mut driver = self.session.driver()?;
        let conn = driver.get_connection()?;

        let mut assigned: Vec<&str> = Vec::new();
        for placeholder in positions {
            let name = placeholder.name.as_str();
            if assigned.contains(&name) {
                continue;
            }
            assigned.push(name);

            let ty = self.types.get(name).copied();
            let param = self
                .values
                .get_mut(name)
                .ok_or_else(|| DbError::NotFound(format!("unable to bind to missing placeholder: {}", name)))?;
            let literal = if lob::is_lob(param, ty) {
                let mut reader = lob::open(param, options.lob_allow_url_include)?;
                let data = lob::drain(&mut reader, options.lob_buffer_length)?;
                driver.quote(&lob::drained_value(data, ty), ty, true)?
            } else {
                let value = lob::inline_value(param);
                driver.quote(value, ty, true)?
            };
            driver.do_query(conn, &format!("SET @{} = {}", name, literal), true)?;
        }

        let mut query = format!("EXECUTE {}", plan);
        if !positions.is_empty() {
            let variables: Vec<String> = positions.iter().map(|p| format!("@{}", p.name)).collect();
            query.push_str(" USING ");
            query.push_str(&variables.join(", "));
        }
        debug!(query = %query, "executing emulated statement");

        let outcome = driver.do_query(conn, &query, self.is_manip)?;
        if self.is_manip {
            let affected = driver.affected_rows(conn, &outcome)?;
            if let QueryOutcome::Rows(handle) = outcome {
                driver.free_result(handle)?;
            }
            return Ok(Executed::Affected(affected));
        }
        Ok(match outcome {
            QueryOutcome::Rows(handle) => Executed::Result(handle),
            QueryOutcome::Done => Executed::Empty,
        })
    }

    fn execute_native(&mut self, stmt: NativeStatement, positions: &[Placeholder]) -> Result<Executed> {
        let options = self.session.options();
        let mut driver = self.session.driver()?;

        let mut bindings = Vec::with_capacity(positions.len());
        let mut lobs = Vec::new();
        for (index, placeholder) in positions.iter().enumerate() {
            let ty = self.types.get(&placeholder.name).copied();
            let param = self.values.get(&placeholder.name).ok_or_else(|| {
                DbError::NotFound(format!(
                    "unable to bind to missing placeholder: {}",
                    placeholder.name
                ))
            })?;
            if lob::is_lob(param, ty) {
                bindings.push(Binding::Lob {
                    ty: ty.unwrap_or(LogicalType::Blob),
                });
                lobs.push((index, placeholder.name.as_str()));
                continue;
            }
            let value = lob::inline_value(param);
            let binding = if value.is_null() {
                Binding::Scalar {
                    code: TypeCode::for_type(ty),
                    literal: None,
                }
            } else {
                let ty = ty.unwrap_or_else(|| LogicalType::infer(value));
                Binding::Scalar {
                    code: TypeCode::for_type(Some(ty)),
                    literal: Some(driver.quote(value, Some(ty), false)?),
                }
            };
            bindings.push(binding);
        }

        driver
            .bind(stmt, &bindings)
            .map_err(|e| DbError::Driver(format!("unable to bind parameters: {}", e)))?;

        for (index, name) in lobs {
            if let Some(param) = self.values.get_mut(name) {
                let mut reader = lob::open(param, options.lob_allow_url_include)?;
                lob::send_chunks(&mut reader, options.lob_buffer_length, |chunk| {
                    driver.send_long_data(stmt, index, chunk)
                })?;
            }
        }

        driver
            .execute(stmt)
            .map_err(|e| DbError::Driver(format!("unable to execute statement: {}", e)))?;

        if self.is_manip {
            return Ok(Executed::Affected(driver.statement_affected_rows(stmt)?));
        }
        if options.result_buffering {
            driver.store_result(stmt)?;
        }
        Ok(Executed::Result(driver.statement_result(stmt)?))
    }

    /// Substitutes quoted literals for the placeholders and runs the text as
    /// a plain query.
    fn execute_unprepared(&mut self, positions: &[Placeholder], hint: ResultHint) -> Result<ExecuteResult> {
        let options = self.session.options();
        let mut sql = String::with_capacity(self.query.len());
        let mut last = 0;
        {
            let driver = self.session.driver()?;
            for placeholder in positions {
                let ty = self.types.get(&placeholder.name).copied();
                let param = self.values.get_mut(&placeholder.name).ok_or_else(|| {
                    DbError::NotFound(format!(
                        "unable to bind to missing placeholder: {}",
                        placeholder.name
                    ))
                })?;
                let literal = if lob::is_lob(param, ty) {
                    let mut reader = lob::open(param, options.lob_allow_url_include)?;
                    let data = lob::drain(&mut reader, options.lob_buffer_length)?;
                    driver.quote(&lob::drained_value(data, ty), ty, true)?
                } else {
                    driver.quote(lob::inline_value(param), ty, true)?
                };
                sql.push_str(&self.query[last..placeholder.offset]);
                sql.push_str(&literal);
                last = placeholder.offset + placeholder.len;
            }
        }
        sql.push_str(&self.query[last..]);

        let session = Arc::clone(&self.session);
        session.run_query(&sql, self.is_manip, &self.result_types, hint, self.limit, self.offset)
    }

    /// Releases the statement on the engine side and drops the bound values.
    ///
    /// The statement ends up freed even when the release fails; the first
    /// error is returned.
    pub fn free(&mut self) -> Result<()> {
        if self.is_freed() {
            return Err(already_freed());
        }
        let outcome = self.release();
        self.positions = None;
        self.values.clear();
        self.types.clear();
        outcome
    }

    fn release(&self) -> Result<()> {
        match &self.handle {
            StatementHandle::Native(stmt) => self
                .session
                .driver()?
                .close(*stmt)
                .map_err(|e| DbError::Driver(format!("could not free statement: {}", e))),
            StatementHandle::Emulated(name) => {
                let mut driver = self.session.driver()?;
                let conn = driver.get_connection()?;
                driver.do_query(conn, &format!("DEALLOCATE PREPARE {}", name), true)?;
                Ok(())
            }
            StatementHandle::Unprepared => Ok(()),
        }
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        if !self.is_freed() {
            if let Err(e) = self.free() {
                warn!(query = %self.query, error = %e, "failed to free statement on drop");
            }
        }
    }
}
