///
/// In-memory scripted data source.
///
/// `MemorySource` answers statements from tables registered up front, and
/// serves field data with the same chunked retrieval rules as a real
/// call-level driver: NUL-terminated character chunks, NO_TOTAL length
/// reporting when asked to hide lengths, and NoData once a field has been
/// drained. Failures can be injected at execute, fetch, field and
/// release time, and every `get_data` call is logged by column so tests
/// can check read order.
///
/// Clones of a `MemorySource` share their script and counters.
///

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::source::{
    write_chunk, CallFailed, CallResult, DiagnosticChain, Driver, FieldProgress, GetData,
    Indicator, ReturnCode, Source, Statement, TargetType,
};

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryValue {
    Null,
    Text(String),
    Number(f64),
    Bytes(Vec<u8>),
    Bit(bool),
}

impl From<&str> for MemoryValue {
    fn from(s: &str) -> Self {
        MemoryValue::Text(s.to_string())
    }
}

impl From<f64> for MemoryValue {
    fn from(n: f64) -> Self {
        MemoryValue::Number(n)
    }
}

impl From<bool> for MemoryValue {
    fn from(b: bool) -> Self {
        MemoryValue::Bit(b)
    }
}

impl From<Vec<u8>> for MemoryValue {
    fn from(b: Vec<u8>) -> Self {
        MemoryValue::Bytes(b)
    }
}

/// A scripted result set: named columns with native type codes, and rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    columns: Vec<(String, i16)>,
    rows: Vec<Vec<MemoryValue>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, native_type: i16) -> Self {
        self.columns.push((name.to_string(), native_type));
        self
    }

    pub fn row(mut self, values: Vec<MemoryValue>) -> Self {
        self.rows.push(values);
        self
    }
}

#[derive(Debug, Clone)]
enum Script {
    Rows(MemoryTable),
    Affected(i64),
    Fails(Vec<String>),
}

#[derive(Debug)]
struct MemoryState {
    scripts: HashMap<String, Script>,
    length_known: bool,
    fail_fetch_at: Option<usize>,
    fail_field: Option<(usize, u16)>,
    fail_release: bool,
    reads: Vec<u16>,
    open_statements: usize,
    connected: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            scripts: HashMap::new(),
            length_known: true,
            fail_fetch_at: None,
            fail_field: None,
            fail_release: false,
            reads: Vec::new(),
            open_statements: 0,
            connected: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    state: Rc<RefCell<MemoryState>>,
    diagnostics: Rc<RefCell<DiagnosticChain>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_query(&self, sql: &str, table: MemoryTable) -> &Self {
        self.state
            .borrow_mut()
            .scripts
            .insert(sql.to_string(), Script::Rows(table));
        self
    }

    pub fn register_update(&self, sql: &str, affected: i64) -> &Self {
        self.state
            .borrow_mut()
            .scripts
            .insert(sql.to_string(), Script::Affected(affected));
        self
    }

    /// Makes executing `sql` fail with one diagnostic record per message.
    pub fn register_failure(&self, sql: &str, messages: &[&str]) -> &Self {
        let messages = messages.iter().map(|m| m.to_string()).collect();
        self.state
            .borrow_mut()
            .scripts
            .insert(sql.to_string(), Script::Fails(messages));
        self
    }

    /// With `false`, truncated chunks report NO_TOTAL instead of the
    /// remaining length.
    pub fn report_lengths(&self, known: bool) -> &Self {
        self.state.borrow_mut().length_known = known;
        self
    }

    /// Fails the fetch that would produce the zero-based row `row`.
    pub fn fail_fetch_at(&self, row: usize) -> &Self {
        self.state.borrow_mut().fail_fetch_at = Some(row);
        self
    }

    /// Fails every `get_data` for `column` (1-based) of row `row` (0-based).
    pub fn fail_field(&self, row: usize, column: u16) -> &Self {
        self.state.borrow_mut().fail_field = Some((row, column));
        self
    }

    pub fn fail_release(&self) -> &Self {
        self.state.borrow_mut().fail_release = true;
        self
    }

    /// Columns passed to `get_data`, in call order.
    pub fn reads(&self) -> Vec<u16> {
        self.state.borrow().reads.clone()
    }

    pub fn clear_reads(&self) {
        self.state.borrow_mut().reads.clear();
    }

    pub fn open_statements(&self) -> usize {
        self.state.borrow().open_statements
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }
}

impl Source for MemorySource {
    type Statement = MemoryStatement;

    fn allocate_statement(&self) -> CallResult<MemoryStatement> {
        let mut diagnostics = self.diagnostics.borrow_mut();
        diagnostics.clear();
        let mut state = self.state.borrow_mut();
        if !state.connected {
            diagnostics.post("08003", "connection not open");
            return Err(CallFailed);
        }
        state.open_statements += 1;
        Ok(MemoryStatement {
            state: Rc::clone(&self.state),
            result: None,
            next_row: 0,
            current: None,
            progress: Vec::new(),
            row_count: -1,
            diagnostics: DiagnosticChain::default(),
            released: false,
        })
    }

    fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.borrow().records()
    }

    fn disconnect(&mut self) -> CallResult<()> {
        self.diagnostics.borrow_mut().clear();
        self.state.borrow_mut().connected = false;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryStatement {
    state: Rc<RefCell<MemoryState>>,
    result: Option<MemoryTable>,
    next_row: usize,
    current: Option<usize>,
    progress: Vec<FieldProgress>,
    row_count: i64,
    diagnostics: DiagnosticChain,
    released: bool,
}

impl MemoryStatement {
    fn fail(&mut self, sqlstate: &str, message: &str) -> CallFailed {
        self.diagnostics.post(sqlstate, message);
        CallFailed
    }

    fn fail_get(&mut self, sqlstate: &str, message: &str) -> GetData {
        self.diagnostics.post(sqlstate, message);
        GetData::error()
    }

    fn fixed(
        &mut self,
        column: usize,
        target: TargetType,
        value: &MemoryValue,
        buffer: &mut [u8],
    ) -> GetData {
        let number = match value {
            MemoryValue::Number(n) => *n,
            MemoryValue::Bit(b) => f64::from(u8::from(*b)),
            MemoryValue::Text(t) => match t.trim().parse::<f64>() {
                Ok(n) => n,
                Err(_) => {
                    return self.fail_get("22018", "invalid character value for cast specification");
                }
            },
            MemoryValue::Bytes(_) => {
                return self.fail_get("07006", "restricted data type attribute violation");
            }
            MemoryValue::Null => return GetData::null(),
        };
        let width = if target == TargetType::Double { 8 } else { 1 };
        if buffer.len() < width {
            return self.fail_get("HY090", "invalid string or buffer length");
        }
        if target == TargetType::Double {
            buffer[..8].copy_from_slice(&number.to_ne_bytes());
        } else {
            buffer[0] = u8::from(number != 0.0);
        }
        self.progress[column] = FieldProgress::Done;
        GetData::new(ReturnCode::Success, Indicator::Length(width))
    }
}

impl Statement for MemoryStatement {
    fn execute(&mut self, sql: &str) -> CallResult<()> {
        self.diagnostics.clear();
        let script = self.state.borrow().scripts.get(sql).cloned();
        match script {
            None => Err(self.fail("42000", &format!("unrecognized statement: {}", sql))),
            Some(Script::Fails(messages)) => {
                for message in &messages {
                    self.diagnostics.post("HY000", message);
                }
                Err(CallFailed)
            }
            Some(Script::Rows(table)) => {
                self.result = Some(table);
                self.next_row = 0;
                self.current = None;
                self.row_count = -1;
                Ok(())
            }
            Some(Script::Affected(n)) => {
                self.result = None;
                self.row_count = n;
                Ok(())
            }
        }
    }

    fn num_result_columns(&mut self) -> CallResult<u16> {
        self.diagnostics.clear();
        Ok(self.result.as_ref().map_or(0, |t| t.columns.len() as u16))
    }

    fn describe_column(&mut self, column: u16) -> CallResult<(String, i16)> {
        self.diagnostics.clear();
        let described = self
            .result
            .as_ref()
            .and_then(|t| t.columns.get(usize::from(column).checked_sub(1)?))
            .cloned();
        described.ok_or_else(|| self.fail("07009", "invalid descriptor index"))
    }

    fn row_count(&mut self) -> CallResult<i64> {
        self.diagnostics.clear();
        Ok(self.row_count)
    }

    fn fetch(&mut self) -> CallResult<bool> {
        self.diagnostics.clear();
        let (row_total, column_total) = match self.result.as_ref() {
            Some(table) => (table.rows.len(), table.columns.len()),
            None => return Err(self.fail("24000", "invalid cursor state")),
        };
        if self.state.borrow().fail_fetch_at == Some(self.next_row) {
            self.diagnostics.post("HY000", "simulated fetch failure");
            self.diagnostics.post("01000", "fetch aborted by test source");
            return Err(CallFailed);
        }
        if self.next_row >= row_total {
            self.current = None;
            return Ok(false);
        }
        self.current = Some(self.next_row);
        self.next_row += 1;
        self.progress = vec![FieldProgress::Unread; column_total];
        Ok(true)
    }

    fn get_data(&mut self, column: u16, target: TargetType, buffer: &mut [u8]) -> GetData {
        self.diagnostics.clear();
        let (length_known, fail_field) = {
            let mut state = self.state.borrow_mut();
            state.reads.push(column);
            (state.length_known, state.fail_field)
        };
        let Some(row) = self.current else {
            return self.fail_get("24000", "invalid cursor state");
        };
        let index = usize::from(column);
        let value = self
            .result
            .as_ref()
            .and_then(|t| t.rows.get(row))
            .and_then(|values| values.get(index.checked_sub(1)?))
            .cloned();
        let Some(value) = value else {
            return self.fail_get("07009", "invalid descriptor index");
        };
        if fail_field == Some((row, column)) {
            return self.fail_get("HY000", "simulated read failure");
        }

        let progress = &mut self.progress[index - 1];
        if *progress == FieldProgress::Done {
            return GetData::no_data();
        }
        if value == MemoryValue::Null {
            *progress = FieldProgress::Done;
            buffer.fill(0xA5);
            return GetData::null();
        }

        match target {
            TargetType::Double | TargetType::Bit => self.fixed(index - 1, target, &value, buffer),
            TargetType::Char | TargetType::Binary => {
                let data = match (&value, target) {
                    (MemoryValue::Text(t), _) => t.as_bytes().to_vec(),
                    (MemoryValue::Number(n), _) => n.to_string().into_bytes(),
                    (MemoryValue::Bit(b), TargetType::Char) => {
                        if *b { b"1".to_vec() } else { b"0".to_vec() }
                    }
                    (MemoryValue::Bit(b), _) => vec![u8::from(*b)],
                    (MemoryValue::Bytes(bytes), TargetType::Char) => hex_upper(bytes).into_bytes(),
                    (MemoryValue::Bytes(bytes), _) => bytes.clone(),
                    (MemoryValue::Null, _) => Vec::new(),
                };
                let progress = &mut self.progress[index - 1];
                let got = write_chunk(&data, progress, target, buffer, length_known);
                if got.status == ReturnCode::SuccessWithInfo && target == TargetType::Char {
                    self.diagnostics.post("01004", "string data, right truncated");
                }
                got
            }
        }
    }

    fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.records()
    }

    fn release(&mut self) -> CallResult<()> {
        self.diagnostics.clear();
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.result = None;
        let mut state = self.state.borrow_mut();
        state.open_statements = state.open_statements.saturating_sub(1);
        if state.fail_release {
            drop(state);
            return Err(self.fail("HY000", "simulated release failure"));
        }
        Ok(())
    }
}

impl Drop for MemoryStatement {
    fn drop(&mut self) {
        if !self.released {
            let mut state = self.state.borrow_mut();
            state.open_statements = state.open_statements.saturating_sub(1);
        }
    }
}

/// Connects to `MemorySource`s registered under a data source name.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    sources: IndexMap<String, MemorySource>,
    diagnostics: RefCell<DiagnosticChain>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, dsn: &str, source: MemorySource) -> Self {
        self.sources.insert(dsn.to_string(), source);
        self
    }
}

impl Driver for MemoryDriver {
    type Source = MemorySource;

    fn connect(
        &self,
        target: &str,
        _user: Option<&str>,
        _password: Option<&str>,
    ) -> CallResult<MemorySource> {
        let mut diagnostics = self.diagnostics.borrow_mut();
        diagnostics.clear();
        match self.sources.get(target) {
            Some(source) => {
                source.state.borrow_mut().connected = true;
                Ok(source.clone())
            }
            None => {
                diagnostics.post(
                    "08001",
                    format!("unable to connect to data source '{}'", target),
                );
                Err(CallFailed)
            }
        }
    }

    fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.borrow().records()
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
