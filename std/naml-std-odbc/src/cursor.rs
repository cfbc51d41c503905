///
/// Result cursor.
///
/// A cursor owns an executed statement handle and the statement's column
/// table, and walks the result one row at a time:
///
/// ```text
/// Open --fetch--> Open | Exhausted
/// Open | Exhausted --close--> Closed
/// ```
///
/// Running out of rows is not an error and does not close the cursor;
/// every later fetch keeps reporting the end until `close()`. Closing
/// returns the cursor's slot in the parent connection, releases the
/// statement handle and drops the column table. Once closed, every read
/// fails with `OdbcError::CursorClosed`.
///

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::connection::Lease;
use crate::decoder;
use crate::error::{HandleKind, OdbcError, Result};
use crate::reader::FieldReader;
use crate::source::Statement;
use crate::table::{FetchMode, RowTable};
use crate::types::ColumnTable;
use crate::value::{FieldValue, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Open,
    Exhausted,
    Closed,
}

struct OpenCursor<S> {
    statement: S,
    columns: Arc<ColumnTable>,
    reader: FieldReader,
    exhausted: bool,
    _lease: Lease,
}

pub struct Cursor<S: Statement> {
    inner: Option<OpenCursor<S>>,
}

impl<S: Statement> Cursor<S> {
    pub(crate) fn new(
        statement: S,
        columns: Arc<ColumnTable>,
        reader: FieldReader,
        lease: Lease,
    ) -> Self {
        debug!(columns = columns.len(), "cursor opened");
        Self {
            inner: Some(OpenCursor {
                statement,
                columns,
                reader,
                exhausted: false,
                _lease: lease,
            }),
        }
    }

    pub fn state(&self) -> CursorState {
        match &self.inner {
            None => CursorState::Closed,
            Some(open) if open.exhausted => CursorState::Exhausted,
            Some(_) => CursorState::Open,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Column descriptors of the result, in result order.
    pub fn columns(&self) -> Result<&Arc<ColumnTable>> {
        self.inner
            .as_ref()
            .map(|open| &open.columns)
            .ok_or(OdbcError::CursorClosed)
    }

    /// Moves to the next row; `None` once the result is exhausted.
    fn advance(&mut self) -> Result<Option<&mut OpenCursor<S>>> {
        let open = self.inner.as_mut().ok_or(OdbcError::CursorClosed)?;
        if open.exhausted {
            return Ok(None);
        }
        match open.statement.fetch() {
            Ok(true) => Ok(Some(open)),
            Ok(false) => {
                trace!("cursor exhausted");
                open.exhausted = true;
                Ok(None)
            }
            Err(_) => Err(OdbcError::source_failure(
                HandleKind::Statement,
                "fetch",
                open.statement.diagnostics(),
            )),
        }
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(open) = self.advance()? else {
            return Ok(None);
        };
        decoder::decode_row(&open.columns, &mut open.reader, &mut open.statement).map(Some)
    }

    /// Decodes the next row by position into `out`. Returns `false` at
    /// the end of the result, leaving `out` untouched.
    pub fn fetch_values_into(&mut self, out: &mut Vec<FieldValue>) -> Result<bool> {
        let Some(open) = self.advance()? else {
            return Ok(false);
        };
        decoder::decode_values_into(&open.columns, &mut open.reader, &mut open.statement, out)?;
        Ok(true)
    }

    /// Decodes the next row by column name into `out`.
    pub fn fetch_named_into(&mut self, out: &mut IndexMap<String, FieldValue>) -> Result<bool> {
        let Some(open) = self.advance()? else {
            return Ok(false);
        };
        decoder::decode_named_into(&open.columns, &mut open.reader, &mut open.statement, out)?;
        Ok(true)
    }

    /// Fills `table` according to `mode`; the half of the table the mode
    /// does not cover is left as it was. A failed row clears the table.
    pub fn fetch_into(&mut self, table: &mut RowTable, mode: FetchMode) -> Result<bool> {
        let Some(open) = self.advance()? else {
            return Ok(false);
        };
        let row = match decoder::decode_row(&open.columns, &mut open.reader, &mut open.statement) {
            Ok(row) => row,
            Err(e) => {
                table.clear();
                return Err(e);
            }
        };
        if mode.positional() {
            table.positional.clear();
            table.positional.extend_from_slice(row.values());
        }
        if mode.named() {
            table.named.clear();
            for (name, value) in row.iter() {
                table.named.insert(name.to_string(), value.clone());
            }
        }
        Ok(true)
    }

    /// Releases the statement. Closing an already closed cursor does
    /// nothing. The cursor ends up closed even when the release reports
    /// an error.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut open) = self.inner.take() else {
            return Ok(());
        };
        let released = open.statement.release();
        debug!("cursor closed");
        match released {
            Ok(()) => Ok(()),
            Err(_) => Err(OdbcError::source_failure(
                HandleKind::Statement,
                "release statement",
                open.statement.diagnostics(),
            )),
        }
    }
}

impl<S: Statement> Iterator for Cursor<S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl<S: Statement> Drop for Cursor<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to release cursor on drop");
        }
    }
}

impl<S: Statement> std::fmt::Debug for Cursor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state())
            .field("columns", &self.inner.as_ref().map(|open| open.columns.len()))
            .finish()
    }
}
