/// Core Module for dbport
///
/// This module contains the components every other layer builds on: the
/// error type, values and rows, session options, the datatype subsystem,
/// the driver contract, execution hooks and the session itself.

pub mod datatype;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod options;
pub mod session;
pub mod value;

// Re-export commonly used types for convenience
pub use error::{DbError, ErrorKind, Result};
pub use options::{FetchMode, FieldCase, Options, Portability};
pub use session::{ExecuteResult, ResultHint, Session, StatementKind};
pub use value::{Record, Row, RowMap, Value};
