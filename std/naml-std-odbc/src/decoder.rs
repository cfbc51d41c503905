///
/// Row decoder.
///
/// Reads every column of the current row in ascending column order,
/// through the field reader, and assembles either a positional or a
/// keyed row. A failing field aborts the whole row: callers never see a
/// partially decoded row, and a caller-supplied container is left empty.
///

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{OdbcError, Result};
use crate::reader::FieldReader;
use crate::source::Statement;
use crate::types::ColumnTable;
use crate::value::{FieldValue, Row};

pub fn decode_row<S: Statement + ?Sized>(
    columns: &Arc<ColumnTable>,
    reader: &mut FieldReader,
    statement: &mut S,
) -> Result<Row> {
    let mut values = Vec::with_capacity(columns.len());
    decode_values_into(columns, reader, statement, &mut values)?;
    Ok(Row::new(Arc::clone(columns), values))
}

/// 1-based protocol position of the column at `index`.
fn column_position(index: usize, count: usize) -> Result<u16> {
    u16::try_from(index + 1).map_err(|_| OdbcError::MissingColumn {
        column: index + 1,
        count,
    })
}

/// Positional decode into `out`, reusing its allocation.
pub fn decode_values_into<S: Statement + ?Sized>(
    columns: &ColumnTable,
    reader: &mut FieldReader,
    statement: &mut S,
    out: &mut Vec<FieldValue>,
) -> Result<()> {
    out.clear();
    for (index, column) in columns.iter().enumerate() {
        let read = column_position(index, columns.len())
            .and_then(|position| reader.read_field(statement, position, column.semantic_type));
        match read {
            Ok(value) => out.push(value),
            Err(e) => {
                out.clear();
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Keyed decode into `out`, in column order. A repeated column name keeps
/// the value of its last occurrence.
pub fn decode_named_into<S: Statement + ?Sized>(
    columns: &ColumnTable,
    reader: &mut FieldReader,
    statement: &mut S,
    out: &mut IndexMap<String, FieldValue>,
) -> Result<()> {
    out.clear();
    for (index, column) in columns.iter().enumerate() {
        let read = column_position(index, columns.len())
            .and_then(|position| reader.read_field(statement, position, column.semantic_type));
        match read {
            Ok(value) => {
                out.insert(column.name.clone(), value);
            }
            Err(e) => {
                out.clear();
                return Err(e);
            }
        }
    }
    Ok(())
}
