//! Column metadata of a cursor's current result.
use super::cursor::{CursorState, ResultCursor};
use crate::core::options::Portability;
use crate::core::{DbError, Result};
use indexmap::IndexMap;

impl ResultCursor {
    /// Number of columns in the current result.
    ///
    /// A cursor without a server-side result reports its declared types.
    pub fn column_count(&self) -> Result<usize> {
        match self.state {
            CursorState::Freed => Err(DbError::result_freed()),
            CursorState::NoHandle => Ok(self.types.len()),
            CursorState::Open(handle) => self
                .session
                .driver()?
                .num_fields(handle)
                .map_err(|e| DbError::Driver(format!("could not get column count: {}", e))),
        }
    }

    /// Maps column name to ordinal.
    ///
    /// Names are folded when `FIX_CASE` is on. A repeated name maps to its
    /// last ordinal.
    pub fn column_names(&self) -> Result<IndexMap<String, usize>> {
        let names = self.column_names_list()?;
        let mut map = IndexMap::with_capacity(names.len());
        for (ordinal, name) in names.into_iter().enumerate() {
            map.insert(name, ordinal);
        }
        Ok(map)
    }

    /// Column names in ordinal order, folded like [`column_names`](Self::column_names).
    pub fn column_names_list(&self) -> Result<Vec<String>> {
        let count = self.column_count()?;
        let handle = match self.state {
            CursorState::Open(handle) => handle,
            _ => return Ok(Vec::new()),
        };

        let options = self.session.options();
        let fold = options.portability.contains(Portability::FIX_CASE);
        let mut driver = self.session.driver()?;
        (0..count)
            .map(|ordinal| -> Result<String> {
                let name = driver.field_name(handle, ordinal)?;
                Ok(if fold { options.field_case.fold(&name) } else { name })
            })
            .collect()
    }
}
