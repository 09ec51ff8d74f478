//! Per-row portability pipeline run on every fetched row.
use super::cursor::BoundColumn;
use crate::core::datatype::{convert_result_row, fix_result_values, LogicalType, TypeSet};
use crate::core::options::{FetchMode, Options, Portability};
use crate::core::value::{Record, Row, RowMap};
use crate::core::Result;
use std::collections::{BTreeMap, HashMap};

/// Everything the pipeline reads besides the row itself.
pub(crate) struct NormalizeContext<'a> {
    pub options: &'a Options,
    pub types: &'a [LogicalType],
    pub types_assoc: &'a HashMap<String, LogicalType>,
    pub bound: &'a BTreeMap<usize, BoundColumn>,
}

/// Runs case folding, empty/rtrim fixing, type coercion and output binding
/// in that order, then shapes the row for `mode`.
///
/// `mode` must already be resolved; `FetchMode::Default` is treated as ordered.
pub(crate) fn normalize_row(raw: Row, mode: FetchMode, ctx: &NormalizeContext<'_>) -> Result<Row> {
    let portability = ctx.options.portability;

    let mut row = match raw {
        Row::Assoc(map) if portability.contains(Portability::FIX_CASE) => {
            Row::Assoc(fold_keys(map, ctx))
        }
        other => other,
    };

    // rtrim runs in the fix pass only when nothing will be coerced later
    let mut fix = portability & Portability::EMPTY_TO_NULL;
    let mut deferred_rtrim = false;
    if portability.contains(Portability::RTRIM) {
        if ctx.types.is_empty() {
            fix |= Portability::RTRIM;
        } else {
            deferred_rtrim = true;
        }
    }
    if !fix.is_empty() {
        fix_result_values(&mut row, fix);
    }

    let types = if mode.is_named() {
        TypeSet::Named(ctx.types_assoc)
    } else {
        TypeSet::Positional(ctx.types)
    };
    if !types.is_empty() {
        row = convert_result_row(types, row, deferred_rtrim)?;
    }

    for (ordinal, slot) in ctx.bound {
        if let Some(value) = row.get(*ordinal) {
            slot.set(value.clone());
        }
    }

    Ok(match (mode, row) {
        (FetchMode::Object, Row::Assoc(map)) => {
            Row::Object(Record::new(ctx.options.fetch_class.clone(), map))
        }
        (_, row) => row,
    })
}

fn fold_keys(map: RowMap, ctx: &NormalizeContext<'_>) -> RowMap {
    let case = ctx.options.field_case;
    let mut folded = RowMap::with_capacity(map.len());
    for (name, value) in map {
        folded.insert(case.fold(&name), value);
    }
    folded
}
