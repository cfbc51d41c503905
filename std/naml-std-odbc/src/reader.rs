///
/// Chunked field reader.
///
/// Retrieves one field of the current row, dispatching on the column's
/// semantic type:
/// - Number and Boolean are single fixed-size retrievals
/// - String and Binary are drained chunk by chunk through a staging
///   buffer, because the source may report the remaining length late,
///   partially, or as NO_TOTAL
///
/// While the source answers SuccessWithInfo, each chunk whose reported
/// length is at least the buffer size (or unknown) counts as a full
/// buffer, minus the in-buffer terminator for character data. The final
/// chunk arrives with plain Success; NoData ends the read with nothing
/// appended. A NULL indicator on the first call yields `FieldValue::Null`
/// without further calls.
///

use tracing::trace;

use crate::error::{HandleKind, OdbcError, Result};
use crate::source::{Indicator, ReturnCode, Statement, TargetType};
use crate::types::SemanticType;
use crate::value::FieldValue;

/// Smallest staging buffer that still holds one byte of character data
/// next to its terminator.
pub const MIN_CHUNK_SIZE: usize = 2;

pub const DEFAULT_CHUNK_SIZE: usize = 8192;

#[derive(Debug)]
pub struct FieldReader {
    buffer: Vec<u8>,
}

impl Default for FieldReader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl FieldReader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: vec![0; chunk_size.max(MIN_CHUNK_SIZE)],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn read_field<S: Statement + ?Sized>(
        &mut self,
        statement: &mut S,
        column: u16,
        semantic_type: SemanticType,
    ) -> Result<FieldValue> {
        match semantic_type {
            SemanticType::Number => {
                let mut raw = [0u8; 8];
                let got = statement.get_data(column, TargetType::Double, &mut raw);
                Ok(match fixed_outcome(statement, got.status, got.indicator)? {
                    None => FieldValue::Null,
                    Some(()) => FieldValue::Number(f64::from_ne_bytes(raw)),
                })
            }
            SemanticType::Boolean => {
                let mut raw = [0u8; 1];
                let got = statement.get_data(column, TargetType::Bit, &mut raw);
                Ok(match fixed_outcome(statement, got.status, got.indicator)? {
                    None => FieldValue::Null,
                    Some(()) => FieldValue::Boolean(raw[0] != 0),
                })
            }
            SemanticType::String => {
                let read = self.read_chunked(statement, column, TargetType::Char)?;
                Ok(read.map_or(FieldValue::Null, |bytes| FieldValue::String(into_text(bytes))))
            }
            SemanticType::Binary => {
                let read = self.read_chunked(statement, column, TargetType::Binary)?;
                Ok(read.map_or(FieldValue::Null, FieldValue::Binary))
            }
        }
    }

    fn read_chunked<S: Statement + ?Sized>(
        &mut self,
        statement: &mut S,
        column: u16,
        target: TargetType,
    ) -> Result<Option<Vec<u8>>> {
        let capacity = self.buffer.len();
        let terminator = target.terminator_len();
        let mut value = Vec::new();
        let mut chunks = 0usize;

        loop {
            let got = statement.get_data(column, target, &mut self.buffer);
            match got.status {
                ReturnCode::Error => return Err(get_data_failed(statement)),
                ReturnCode::NoData => break,
                ReturnCode::Success | ReturnCode::SuccessWithInfo => {
                    if got.indicator == Indicator::Null {
                        if chunks == 0 {
                            return Ok(None);
                        }
                        break;
                    }
                    let len = chunk_len(got.indicator, capacity, terminator);
                    value.extend_from_slice(&self.buffer[..len]);
                    chunks += 1;
                    if got.status == ReturnCode::Success {
                        break;
                    }
                }
            }
        }

        trace!(column, chunks, bytes = value.len(), "read chunked field");
        Ok(Some(value))
    }
}

/// Bytes of real data in the staging buffer after one retrieval.
fn chunk_len(indicator: Indicator, capacity: usize, terminator: usize) -> usize {
    match indicator {
        Indicator::Length(n) if n < capacity => n,
        Indicator::Length(_) | Indicator::NoTotal => capacity - terminator,
        Indicator::Null => 0,
    }
}

/// `Some(())` when a fixed-size retrieval produced a value.
fn fixed_outcome<S: Statement + ?Sized>(
    statement: &S,
    status: ReturnCode,
    indicator: Indicator,
) -> Result<Option<()>> {
    match status {
        ReturnCode::Error => Err(get_data_failed(statement)),
        ReturnCode::NoData => Ok(None),
        ReturnCode::Success | ReturnCode::SuccessWithInfo => match indicator {
            Indicator::Null => Ok(None),
            Indicator::NoTotal | Indicator::Length(_) => Ok(Some(())),
        },
    }
}

fn get_data_failed<S: Statement + ?Sized>(statement: &S) -> OdbcError {
    OdbcError::source_failure(HandleKind::Statement, "get data", statement.diagnostics())
}

fn into_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
