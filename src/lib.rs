// Core infrastructure modules
pub mod core;

// Result cursors and prepared statements
pub mod result;
pub mod statement;

// Drivers
pub mod sqlite;

#[cfg(test)]
mod test_utils;

pub use crate::core::datatype::LogicalType;
pub use crate::core::hooks::{ExecuteEvent, ExecuteOutcome, ExecutionHook};
pub use crate::core::options::load_options;
pub use crate::core::{
    DbError, ErrorKind, ExecuteResult, FetchMode, FieldCase, Options, Portability, Record, Result,
    ResultHint, Row, RowMap, Session, Value,
};
pub use crate::result::{BoundColumn, ColumnRef, ResultCursor};
pub use crate::sqlite::SqliteDriver;
pub use crate::statement::PreparedStatement;
