//! Result cursors, their column catalog and the row normalizer.

mod columns;
mod cursor;
mod normalize;

pub use cursor::{BoundColumn, ColumnRef, CursorState, ResultCursor};
