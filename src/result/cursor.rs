/// Result Cursor Module
///
/// A cursor walks the rows of one native result set, advances through the
/// chained result sets of a multi-statement batch, and releases all of them
/// exactly once. Every fetched row goes through the normalizer before it is
/// handed out.
use super::normalize::{normalize_row, NormalizeContext};
use crate::core::datatype::LogicalType;
use crate::core::driver::ResultHandle;
use crate::core::options::{FetchMode, Portability};
use crate::core::session::Session;
use crate::core::value::{Row, Value};
use crate::core::{DbError, Result};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Lifecycle of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Wraps a live native result
    Open(ResultHandle),
    /// No server-side result; the row shape comes from declared types
    NoHandle,
    /// Freed or exhausted; every fetch fails
    Freed,
}

/// Column addressed by ordinal or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        ColumnRef::Index(index)
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

/// Output slot updated with a column's value on every fetch.
#[derive(Debug, Clone)]
pub struct BoundColumn(Arc<Mutex<Value>>);

impl BoundColumn {
    pub(crate) fn new() -> Self {
        BoundColumn(Arc::new(Mutex::new(Value::Null)))
    }

    /// Value copied in by the most recent fetch, `Null` before the first.
    pub fn get(&self) -> Value {
        match self.0.lock() {
            Ok(value) => value.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set(&self, value: Value) {
        match self.0.lock() {
            Ok(mut slot) => *slot = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

/// Stateful iterator over a result set.
#[derive(Debug)]
pub struct ResultCursor {
    pub(super) session: Arc<Session>,
    pub(super) state: CursorState,
    rownum: Option<usize>,
    pub(super) types: Vec<LogicalType>,
    types_assoc: HashMap<String, LogicalType>,
    values: BTreeMap<usize, BoundColumn>,
    limit: Option<usize>,
    offset: usize,
    offset_skipped: bool,
    returned: usize,
}

impl ResultCursor {
    pub(crate) fn open(session: Arc<Session>, handle: ResultHandle) -> Self {
        Self::with_state(session, CursorState::Open(handle))
    }

    /// Cursor for a statement that produced no server-side result but has
    /// declared result types.
    pub(crate) fn without_handle(session: Arc<Session>, types: &[LogicalType]) -> Self {
        let mut cursor = Self::with_state(session, CursorState::NoHandle);
        cursor.types = types.to_vec();
        cursor
    }

    fn with_state(session: Arc<Session>, state: CursorState) -> Self {
        ResultCursor {
            session,
            state,
            rownum: None,
            types: Vec::new(),
            types_assoc: HashMap::new(),
            values: BTreeMap::new(),
            limit: None,
            offset: 0,
            offset_skipped: false,
            returned: 0,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_freed(&self) -> bool {
        self.state == CursorState::Freed
    }

    /// 0-based index of the last fetched row, `None` before the first fetch.
    pub fn row_number(&self) -> Option<usize> {
        self.rownum
    }

    /// Sets the row window: the first fetch skips `offset` rows and at most
    /// `limit` rows are returned.
    pub fn set_limit(&mut self, limit: Option<usize>, offset: usize) {
        self.limit = limit;
        self.offset = offset;
        self.offset_skipped = offset == 0;
    }

    /// Declares the logical types of the result columns by position.
    ///
    /// On a live result the name-keyed types are derived from the column
    /// names, folded the same way fetched keys are.
    pub fn set_result_types(&mut self, types: &[LogicalType]) -> Result<()> {
        self.types = types.to_vec();
        self.types_assoc.clear();
        if let CursorState::Open(_) = self.state {
            let names = self.column_names_list()?;
            self.types_assoc = names.into_iter().zip(types.iter().copied()).collect();
        }
        Ok(())
    }

    /// Registers an output slot for a column.
    pub fn bind_column(&mut self, column: impl Into<ColumnRef>) -> Result<BoundColumn> {
        let ordinal = match column.into() {
            ColumnRef::Index(index) => index,
            ColumnRef::Name(name) => {
                let names = self.column_names()?;
                let key = self.column_key(&name);
                *names.get(&key).ok_or_else(|| {
                    DbError::NotFound(format!("column is not defined in the result set: {}", name))
                })?
            }
        };
        Ok(self.values.entry(ordinal).or_insert_with(BoundColumn::new).clone())
    }

    fn column_key(&self, name: &str) -> String {
        let options = self.session.options();
        if options.portability.contains(Portability::FIX_CASE) {
            options.field_case.fold(name)
        } else {
            name.to_string()
        }
    }

    /// Fetches the next row, or the row at `row_index` when given.
    ///
    /// Returns `Ok(None)` at end of data and once the limit is reached.
    pub fn fetch_row(&mut self, mode: FetchMode, row_index: Option<usize>) -> Result<Option<Row>> {
        if let Some(index) = row_index {
            self.seek(index)?;
        }
        let handle = match self.state {
            CursorState::Freed => return Err(DbError::result_freed()),
            CursorState::NoHandle => return Ok(None),
            CursorState::Open(handle) => handle,
        };
        if self.limit.is_some_and(|limit| self.returned >= limit) {
            return Ok(None);
        }

        let options = self.session.options();
        let mode = mode.resolve(options.fetch_mode);
        let raw = {
            let mut driver = self.session.driver()?;
            if !self.offset_skipped {
                self.offset_skipped = true;
                let mut skipped = 0;
                while skipped < self.offset && driver.fetch_row(handle)?.is_some() {
                    skipped += 1;
                }
                if skipped > 0 {
                    self.rownum = Some(self.rownum.map_or(skipped - 1, |n| n + skipped));
                }
            }
            if mode.is_named() {
                driver.fetch_assoc(handle)?.map(Row::Assoc)
            } else {
                driver.fetch_row(handle)?.map(Row::Ordered)
            }
        };
        let raw = match raw {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let ctx = NormalizeContext {
            options,
            types: &self.types,
            types_assoc: &self.types_assoc,
            bound: &self.values,
        };
        let row = normalize_row(raw, mode, &ctx)?;
        self.rownum = Some(self.rownum.map_or(0, |n| n + 1));
        self.returned += 1;
        Ok(Some(row))
    }

    /// Fetches one column of the next row (or of the row at `row_index`).
    pub fn fetch_one(&mut self, column: impl Into<ColumnRef>, row_index: Option<usize>) -> Result<Option<Value>> {
        let column = column.into();
        let mode = match column {
            ColumnRef::Index(_) => FetchMode::Ordered,
            ColumnRef::Name(_) => FetchMode::Assoc,
        };
        let row = match self.fetch_row(mode, row_index)? {
            Some(row) => row,
            None => return Ok(None),
        };
        let value = match &column {
            ColumnRef::Index(index) => row.get(*index),
            ColumnRef::Name(name) => row.get_named(&self.column_key(name)),
        };
        match value {
            Some(value) => Ok(Some(value.clone())),
            None => Err(DbError::NotFound(format!(
                "column is not defined in the result set: {:?}",
                column
            ))),
        }
    }

    /// Fetches one column of every remaining row.
    pub fn fetch_col(&mut self, column: impl Into<ColumnRef>) -> Result<Vec<Value>> {
        let column = column.into();
        let mut values = Vec::new();
        while let Some(value) = self.fetch_one(column.clone(), None)? {
            values.push(value);
        }
        Ok(values)
    }

    /// Fetches every remaining row.
    pub fn fetch_all(&mut self, mode: FetchMode) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_row(mode, None)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Fetches the next row as a caller-chosen type built from the row map.
    pub fn fetch_object<T: DeserializeOwned>(&mut self, row_index: Option<usize>) -> Result<Option<T>> {
        let row = match self.fetch_row(FetchMode::Assoc, row_index)? {
            Some(row) => row,
            None => return Ok(None),
        };
        let json = serde_json::to_value(&row)?;
        Ok(Some(serde_json::from_value(json)?))
    }

    /// Repositions to absolute row `row`. Out of range is an error.
    pub fn seek(&mut self, row: usize) -> Result<()> {
        let handle = match self.state {
            CursorState::Freed => return Err(DbError::result_freed()),
            CursorState::NoHandle => return Ok(()),
            CursorState::Open(handle) => handle,
        };
        if !self.session.driver()?.seek(handle, row)? {
            return Err(DbError::Driver(format!(
                "tried to seek to an invalid row number ({})",
                row
            )));
        }
        self.rownum = row.checked_sub(1);
        self.offset_skipped = true;
        Ok(())
    }

    /// Advances to the next result set of a batch.
    ///
    /// Only a missing connection is an error. Driver failures while advancing
    /// read as "no more results". The set stepped past is released, and the
    /// row window and name-keyed types start over for the new set.
    pub fn next_result(&mut self) -> Result<bool> {
        let current = match self.state {
            CursorState::Freed => return Err(DbError::result_freed()),
            CursorState::NoHandle => {
                self.session.connection()?;
                return Ok(false);
            }
            CursorState::Open(handle) => handle,
        };
        let next = match self.advance(current)? {
            Some(next) => next,
            None => return Ok(false),
        };

        {
            let mut driver = self.session.driver()?;
            if let Err(e) = driver.free_result(current) {
                warn!(handle = ?current, error = %e, "could not free previous result");
            }
        }
        debug!(handle = ?next, "advanced to next result set");
        self.state = CursorState::Open(next);
        self.returned = 0;
        self.offset_skipped = self.offset == 0;
        if !self.types.is_empty() {
            let types = std::mem::take(&mut self.types);
            self.set_result_types(&types)?;
        }
        Ok(true)
    }

    /// Opens the set chained behind `handle`, leaving `handle` open.
    fn advance(&self, handle: ResultHandle) -> Result<Option<ResultHandle>> {
        let mut driver = self.session.driver()?;
        let conn = driver.get_connection()?;

        match driver.more_results(conn, handle) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                debug!(error = %e, "could not check for more results");
                return Ok(None);
            }
        }
        match driver.next_result(conn, handle) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                debug!(error = %e, "could not advance to the next result");
                return Ok(None);
            }
        }
        match driver.use_result(conn, handle) {
            Ok(next) => Ok(next),
            Err(e) => {
                debug!(error = %e, "could not open the next result");
                Ok(None)
            }
        }
    }

    /// Frees the current result and every chained result after it.
    ///
    /// The cursor is `Freed` afterwards even when an error is returned.
    /// Freeing a freed cursor does nothing.
    pub fn free(&mut self) -> Result<()> {
        let outcome = self.free_chain();
        self.state = CursorState::Freed;
        outcome
    }

    fn free_chain(&mut self) -> Result<()> {
        while let CursorState::Open(handle) = self.state {
            // the next set has to be opened before its head goes away
            let next = self.advance(handle).unwrap_or(None);
            {
                let mut driver = self.session.driver()?;
                if driver.is_connected() {
                    match driver.free_result(handle) {
                        Ok(true) => {}
                        Ok(false) => return Err(DbError::Driver("could not free result".to_string())),
                        Err(e) => return Err(DbError::Driver(format!("could not free result: {}", e))),
                    }
                }
            }
            match next {
                Some(next) => self.state = CursorState::Open(next),
                None => break,
            }
        }
        Ok(())
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        if let CursorState::Open(handle) = self.state {
            if let Err(e) = self.free() {
                warn!(?handle, error = %e, "failed to free result on drop");
            }
        }
    }
}
