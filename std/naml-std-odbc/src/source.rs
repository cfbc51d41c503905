///
/// Call-level capability interface.
///
/// The driver never talks to a database directly. It drives three handle
/// kinds through these traits, the same way a call-level client library
/// is driven:
///
/// - `Driver`: the environment-level entry point, opens connections
/// - `Source`: a live connection, allocates statement handles
/// - `Statement`: an executed query, fetches rows and hands out field data
///
/// Fallible calls return `CallResult<T>`. A failure carries no payload;
/// the caller reads the diagnostic record chain back from the handle the
/// call was issued on, as with `SQLGetDiagRec`.
///
/// `get_data` follows chunked retrieval semantics: successive calls for
/// the same column of the same row continue where the previous call
/// stopped, character chunks are NUL-terminated inside the buffer, and
/// the reported length may be the NO_TOTAL sentinel when the source does
/// not know how much data remains.
///

/// Marker for a call that returned an error status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFailed;

pub type CallResult<T> = std::result::Result<T, CallFailed>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    /// The call succeeded but more data remains (or a warning was posted).
    SuccessWithInfo,
    NoData,
    Error,
}

/// Length/indicator value written alongside a field retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Null,
    /// The source cannot tell how many bytes remain.
    NoTotal,
    /// Bytes remaining before this call, excluding any terminator.
    Length(usize),
}

/// The C representation a field is converted to during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// NUL-terminated character data.
    Char,
    Binary,
    /// 8-byte native-endian `f64`.
    Double,
    /// 1-byte flag.
    Bit,
}

impl TargetType {
    /// Bytes of each chunk taken by the in-buffer terminator.
    pub fn terminator_len(self) -> usize {
        match self {
            TargetType::Char => 1,
            TargetType::Binary | TargetType::Double | TargetType::Bit => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetData {
    pub status: ReturnCode,
    pub indicator: Indicator,
}

impl GetData {
    pub fn new(status: ReturnCode, indicator: Indicator) -> Self {
        Self { status, indicator }
    }

    pub fn null() -> Self {
        Self::new(ReturnCode::Success, Indicator::Null)
    }

    pub fn no_data() -> Self {
        Self::new(ReturnCode::NoData, Indicator::Length(0))
    }

    pub fn error() -> Self {
        Self::new(ReturnCode::Error, Indicator::Length(0))
    }
}

pub trait Driver {
    type Source: Source;

    fn connect(
        &self,
        target: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> CallResult<Self::Source>;

    /// Records posted by the most recent failed `connect`.
    fn diagnostics(&self) -> Vec<String>;
}

pub trait Source {
    type Statement: Statement;

    fn allocate_statement(&self) -> CallResult<Self::Statement>;

    fn diagnostics(&self) -> Vec<String>;

    fn disconnect(&mut self) -> CallResult<()>;
}

pub trait Statement {
    /// Prepares and executes `sql`.
    fn execute(&mut self, sql: &str) -> CallResult<()>;

    fn num_result_columns(&mut self) -> CallResult<u16>;

    /// Name and native type code of a 1-based result column.
    fn describe_column(&mut self, column: u16) -> CallResult<(String, i16)>;

    /// Rows affected by a statement without a result set.
    fn row_count(&mut self) -> CallResult<i64>;

    /// Advances to the next row; `Ok(false)` when the result is exhausted.
    fn fetch(&mut self) -> CallResult<bool>;

    fn get_data(&mut self, column: u16, target: TargetType, buffer: &mut [u8]) -> GetData;

    fn diagnostics(&self) -> Vec<String>;

    /// Closes any open result and frees the handle.
    fn release(&mut self) -> CallResult<()>;
}

/// Diagnostic record chain kept on a handle, cleared at the start of
/// every call like a call-level handle's diagnostic area.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticChain {
    records: Vec<String>,
}

impl DiagnosticChain {
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn post(&mut self, sqlstate: &str, message: impl AsRef<str>) {
        self.records.push(format!("[{}] {}", sqlstate, message.as_ref()));
    }

    pub fn records(&self) -> Vec<String> {
        self.records.clone()
    }
}

/// How much of one field the caller has already retrieved in this row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldProgress {
    #[default]
    Unread,
    Partial(usize),
    Done,
}

/// Serves the next chunk of `data` into `buffer`.
///
/// This is the source half of chunked retrieval, shared by the built-in
/// sources. With `length_known` false, truncated chunks report NO_TOTAL
/// instead of the remaining length.
pub fn write_chunk(
    data: &[u8],
    progress: &mut FieldProgress,
    target: TargetType,
    buffer: &mut [u8],
    length_known: bool,
) -> GetData {
    let offset = match *progress {
        FieldProgress::Unread => 0,
        FieldProgress::Partial(offset) => offset,
        FieldProgress::Done => return GetData::no_data(),
    };
    let remaining = &data[offset.min(data.len())..];
    let terminator = target.terminator_len();
    let room = buffer.len().saturating_sub(terminator);
    let written = remaining.len().min(room);
    buffer[..written].copy_from_slice(&remaining[..written]);
    if terminator == 1 && written < buffer.len() {
        buffer[written] = 0;
    }

    if remaining.len() > room {
        *progress = FieldProgress::Partial(offset + written);
        let indicator = if length_known {
            Indicator::Length(remaining.len())
        } else {
            Indicator::NoTotal
        };
        GetData::new(ReturnCode::SuccessWithInfo, indicator)
    } else {
        *progress = FieldProgress::Done;
        GetData::new(ReturnCode::Success, Indicator::Length(remaining.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_chunks_are_terminated() {
        let mut progress = FieldProgress::Unread;
        let mut buffer = [0xFFu8; 4];

        let got = write_chunk(b"abcdefg", &mut progress, TargetType::Char, &mut buffer, true);
        assert_eq!(got, GetData::new(ReturnCode::SuccessWithInfo, Indicator::Length(7)));
        assert_eq!(&buffer, b"abc\0");

        let got = write_chunk(b"abcdefg", &mut progress, TargetType::Char, &mut buffer, true);
        assert_eq!(got, GetData::new(ReturnCode::SuccessWithInfo, Indicator::Length(4)));
        assert_eq!(&buffer, b"def\0");

        let got = write_chunk(b"abcdefg", &mut progress, TargetType::Char, &mut buffer, true);
        assert_eq!(got, GetData::new(ReturnCode::Success, Indicator::Length(1)));
        assert_eq!(&buffer[..2], b"g\0");

        let got = write_chunk(b"abcdefg", &mut progress, TargetType::Char, &mut buffer, true);
        assert_eq!(got.status, ReturnCode::NoData);
    }

    #[test]
    fn test_binary_chunks_fill_the_buffer() {
        let mut progress = FieldProgress::Unread;
        let mut buffer = [0u8; 4];
        let data = [1, 2, 3, 4, 5];

        let got = write_chunk(&data, &mut progress, TargetType::Binary, &mut buffer, false);
        assert_eq!(got, GetData::new(ReturnCode::SuccessWithInfo, Indicator::NoTotal));
        assert_eq!(buffer, [1, 2, 3, 4]);

        let got = write_chunk(&data, &mut progress, TargetType::Binary, &mut buffer, false);
        assert_eq!(got, GetData::new(ReturnCode::Success, Indicator::Length(1)));
        assert_eq!(buffer[0], 5);
    }

    #[test]
    fn test_exact_fit_is_a_single_chunk() {
        let mut progress = FieldProgress::Unread;
        let mut buffer = [0u8; 4];
        let got = write_chunk(b"abc", &mut progress, TargetType::Char, &mut buffer, true);
        assert_eq!(got, GetData::new(ReturnCode::Success, Indicator::Length(3)));
        assert_eq!(progress, FieldProgress::Done);
    }

    #[test]
    fn test_diagnostic_chain_formats_sqlstate() {
        let mut chain = DiagnosticChain::default();
        chain.post("HY000", "general error");
        chain.post("01004", "string data, right truncated");
        assert_eq!(
            chain.records(),
            vec!["[HY000] general error", "[01004] string data, right truncated"]
        );
        chain.clear();
        assert!(chain.records().is_empty());
    }
}
