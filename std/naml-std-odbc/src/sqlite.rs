///
/// SQLite data source.
///
/// Implements the call-level traits on top of rusqlite with bundled
/// SQLite, so naml programs get a working source with no system driver
/// manager installed.
///
/// - `SqliteDriver::connect` opens a database file, or an in-memory
///   database for ":memory:"; user and password are ignored.
/// - A statement runs to completion in `execute` and its rows are
///   materialized, which keeps rusqlite's borrowed `Rows` out of the
///   handle (same approach as the sqlite3 module's query results).
/// - Declared column types are mapped to native SQL type codes; columns
///   without a declared type (expressions) take the type of their first
///   non-null value.
/// - `get_data` converts values to the requested target type and serves
///   character and binary data in chunks.
///

use std::cell::RefCell;
use std::rc::Rc;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use tracing::debug;

use crate::source::{
    write_chunk, CallFailed, CallResult, DiagnosticChain, Driver, FieldProgress, GetData,
    Indicator, ReturnCode, Source, Statement, TargetType,
};
use crate::types::native;

pub const MEMORY_TARGET: &str = ":memory:";

fn sqlite_error_code(e: &rusqlite::Error) -> i64 {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => err.extended_code as i64,
        rusqlite::Error::SqlInputError { error, .. } => error.extended_code as i64,
        _ => -1,
    }
}

fn post_sqlite_error(chain: &mut DiagnosticChain, sqlstate: &str, e: &rusqlite::Error) {
    chain.post(sqlstate, format!("{} (sqlite code {})", e, sqlite_error_code(e)));
}

#[derive(Debug, Default)]
pub struct SqliteDriver {
    diagnostics: RefCell<DiagnosticChain>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for SqliteDriver {
    type Source = SqliteSource;

    fn connect(
        &self,
        target: &str,
        _user: Option<&str>,
        _password: Option<&str>,
    ) -> CallResult<SqliteSource> {
        let mut diagnostics = self.diagnostics.borrow_mut();
        diagnostics.clear();
        let opened = if target == MEMORY_TARGET {
            Connection::open_in_memory()
        } else {
            Connection::open(target)
        };
        match opened {
            Ok(conn) => Ok(SqliteSource {
                conn: Some(Rc::new(conn)),
                diagnostics: RefCell::new(DiagnosticChain::default()),
            }),
            Err(e) => {
                post_sqlite_error(&mut diagnostics, "08001", &e);
                Err(CallFailed)
            }
        }
    }

    fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.borrow().records()
    }
}

#[derive(Debug)]
pub struct SqliteSource {
    conn: Option<Rc<Connection>>,
    diagnostics: RefCell<DiagnosticChain>,
}

impl Source for SqliteSource {
    type Statement = SqliteStatement;

    fn allocate_statement(&self) -> CallResult<SqliteStatement> {
        let mut diagnostics = self.diagnostics.borrow_mut();
        diagnostics.clear();
        match &self.conn {
            Some(conn) => Ok(SqliteStatement {
                conn: Some(Rc::clone(conn)),
                result: None,
                row_count: -1,
                diagnostics: DiagnosticChain::default(),
            }),
            None => {
                diagnostics.post("08003", "connection not open");
                Err(CallFailed)
            }
        }
    }

    fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.borrow().records()
    }

    fn disconnect(&mut self) -> CallResult<()> {
        let diagnostics = self.diagnostics.get_mut();
        diagnostics.clear();
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        match Rc::try_unwrap(conn) {
            Ok(conn) => match conn.close() {
                Ok(()) => Ok(()),
                Err((_, e)) => {
                    post_sqlite_error(diagnostics, "HY000", &e);
                    Err(CallFailed)
                }
            },
            Err(_) => {
                // Live statements still hold the connection; it closes
                // when the last of them is released.
                debug!("sqlite connection shared by live statements");
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
struct ResultSet {
    columns: Vec<(String, i16)>,
    rows: Vec<Vec<SqlValue>>,
    next: usize,
    current: Option<usize>,
    progress: Vec<FieldProgress>,
}

#[derive(Debug)]
pub struct SqliteStatement {
    conn: Option<Rc<Connection>>,
    result: Option<ResultSet>,
    row_count: i64,
    diagnostics: DiagnosticChain,
}

enum Outcome {
    Rows(ResultSet),
    Changed(usize),
}

fn run(conn: &Connection, sql: &str) -> rusqlite::Result<Outcome> {
    let mut stmt = conn.prepare(sql)?;
    let declared: Vec<(String, Option<String>)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
        .collect();
    if declared.is_empty() {
        return Ok(Outcome::Changed(stmt.execute([])?));
    }

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(declared.len());
        for i in 0..declared.len() {
            values.push(row.get::<_, SqlValue>(i)?);
        }
        rows.push(values);
    }

    let columns = declared
        .into_iter()
        .enumerate()
        .map(|(i, (name, decl))| {
            let code = match decl {
                Some(decl) => native_type_for_decl(&decl),
                None => native_type_for_values(rows.iter().map(|r| &r[i])),
            };
            (name, code)
        })
        .collect();

    Ok(Outcome::Rows(ResultSet {
        columns,
        rows,
        next: 0,
        current: None,
        progress: Vec::new(),
    }))
}

/// Native type code for a declared column type, following SQLite's
/// affinity rules with finer distinctions where the declaration names a
/// specific SQL type.
pub fn native_type_for_decl(decl: &str) -> i16 {
    let decl = decl.trim().to_ascii_uppercase();
    let base = decl.split('(').next().unwrap_or("").trim();
    match base {
        "BOOLEAN" | "BOOL" | "BIT" => return native::BIT,
        "TINYINT" => return native::TINYINT,
        "SMALLINT" => return native::SMALLINT,
        "BIGINT" => return native::BIGINT,
        "DATE" => return native::TYPE_DATE,
        "TIME" => return native::TYPE_TIME,
        "DATETIME" | "TIMESTAMP" => return native::TYPE_TIMESTAMP,
        "DECIMAL" => return native::DECIMAL,
        "FLOAT" => return native::FLOAT,
        "REAL" => return native::REAL,
        "BINARY" => return native::BINARY,
        "VARBINARY" => return native::VARBINARY,
        _ => {}
    }
    if base.contains("INT") {
        native::INTEGER
    } else if base.contains("CHAR") {
        native::VARCHAR
    } else if base.contains("CLOB") || base.contains("TEXT") {
        native::LONGVARCHAR
    } else if base.contains("BLOB") || base.is_empty() {
        native::LONGVARBINARY
    } else if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") {
        native::DOUBLE
    } else {
        native::NUMERIC
    }
}

fn native_type_for_values<'a>(mut values: impl Iterator<Item = &'a SqlValue>) -> i16 {
    match values.find(|v| !matches!(v, SqlValue::Null)) {
        Some(SqlValue::Integer(_)) => native::BIGINT,
        Some(SqlValue::Real(_)) => native::DOUBLE,
        Some(SqlValue::Blob(_)) => native::LONGVARBINARY,
        Some(SqlValue::Text(_)) | Some(SqlValue::Null) | None => native::VARCHAR,
    }
}

impl SqliteStatement {
    fn fail(&mut self, sqlstate: &str, message: &str) -> CallFailed {
        self.diagnostics.post(sqlstate, message);
        CallFailed
    }
}

impl Statement for SqliteStatement {
    fn execute(&mut self, sql: &str) -> CallResult<()> {
        self.diagnostics.clear();
        let Some(conn) = self.conn.clone() else {
            return Err(self.fail("HY010", "statement handle was released"));
        };
        match run(&conn, sql) {
            Ok(Outcome::Rows(result)) => {
                debug!(rows = result.rows.len(), "sqlite query materialized");
                self.result = Some(result);
                self.row_count = -1;
                Ok(())
            }
            Ok(Outcome::Changed(n)) => {
                self.result = None;
                self.row_count = n as i64;
                Ok(())
            }
            Err(e) => {
                post_sqlite_error(&mut self.diagnostics, "42000", &e);
                Err(CallFailed)
            }
        }
    }

    fn num_result_columns(&mut self) -> CallResult<u16> {
        self.diagnostics.clear();
        Ok(self.result.as_ref().map_or(0, |r| r.columns.len() as u16))
    }

    fn describe_column(&mut self, column: u16) -> CallResult<(String, i16)> {
        self.diagnostics.clear();
        let described = self
            .result
            .as_ref()
            .and_then(|r| r.columns.get(usize::from(column).checked_sub(1)?))
            .cloned();
        described.ok_or_else(|| self.fail("07009", "invalid descriptor index"))
    }

    fn row_count(&mut self) -> CallResult<i64> {
        self.diagnostics.clear();
        Ok(self.row_count)
    }

    fn fetch(&mut self) -> CallResult<bool> {
        self.diagnostics.clear();
        let Some(result) = self.result.as_mut() else {
            self.diagnostics.post("24000", "invalid cursor state");
            return Err(CallFailed);
        };
        if result.next >= result.rows.len() {
            result.current = None;
            return Ok(false);
        }
        result.current = Some(result.next);
        result.next += 1;
        result.progress = vec![FieldProgress::Unread; result.columns.len()];
        Ok(true)
    }

    fn get_data(&mut self, column: u16, target: TargetType, buffer: &mut [u8]) -> GetData {
        let chain = &mut self.diagnostics;
        chain.clear();
        let Some(result) = self.result.as_mut() else {
            return rejected(chain, "24000", "invalid cursor state");
        };
        let Some(row) = result.current else {
            return rejected(chain, "24000", "invalid cursor state");
        };
        let index = usize::from(column);
        if index == 0 || index > result.columns.len() {
            return rejected(chain, "07009", "invalid descriptor index");
        }
        let value = &result.rows[row][index - 1];
        let progress = &mut result.progress[index - 1];
        if *progress == FieldProgress::Done {
            return GetData::no_data();
        }
        if matches!(value, SqlValue::Null) {
            *progress = FieldProgress::Done;
            return GetData::null();
        }

        match target {
            TargetType::Double | TargetType::Bit => {
                let Some(number) = numeric(value, target) else {
                    return match value {
                        SqlValue::Text(_) => rejected(
                            chain,
                            "22018",
                            "invalid character value for cast specification",
                        ),
                        _ => rejected(chain, "07006", "restricted data type attribute violation"),
                    };
                };
                let width = if target == TargetType::Double { 8 } else { 1 };
                if buffer.len() < width {
                    return rejected(chain, "HY090", "invalid string or buffer length");
                }
                *progress = FieldProgress::Done;
                if target == TargetType::Double {
                    buffer[..8].copy_from_slice(&number.to_ne_bytes());
                } else {
                    buffer[0] = u8::from(number != 0.0);
                }
                GetData::new(ReturnCode::Success, Indicator::Length(width))
            }
            TargetType::Char | TargetType::Binary => {
                let data: Vec<u8> = match value {
                    SqlValue::Text(t) => t.as_bytes().to_vec(),
                    SqlValue::Integer(i) => i.to_string().into_bytes(),
                    SqlValue::Real(f) => f.to_string().into_bytes(),
                    SqlValue::Blob(b) if target == TargetType::Char => hex_upper(b).into_bytes(),
                    SqlValue::Blob(b) => b.clone(),
                    SqlValue::Null => Vec::new(),
                };
                let got = write_chunk(&data, progress, target, buffer, true);
                if got.status == ReturnCode::SuccessWithInfo && target == TargetType::Char {
                    chain.post("01004", "string data, right truncated");
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
        self.result = None;
        self.conn = None;
        Ok(())
    }
}

fn rejected(chain: &mut DiagnosticChain, sqlstate: &str, message: &str) -> GetData {
    chain.post(sqlstate, message);
    GetData::error()
}

fn numeric(value: &SqlValue, target: TargetType) -> Option<f64> {
    match value {
        SqlValue::Integer(i) => Some(*i as f64),
        SqlValue::Real(f) => Some(*f),
        SqlValue::Text(t) => {
            let t = t.trim();
            match t.parse::<f64>() {
                Ok(n) => Some(n),
                Err(_) if target == TargetType::Bit && t.eq_ignore_ascii_case("true") => Some(1.0),
                Err(_) if target == TargetType::Bit && t.eq_ignore_ascii_case("false") => Some(0.0),
                Err(_) => None,
            }
        }
        SqlValue::Blob(_) | SqlValue::Null => None,
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> SqliteSource {
        SqliteDriver::new()
            .connect(MEMORY_TARGET, None, None)
            .expect("Failed to open in-memory database")
    }

    #[test]
    fn test_declared_type_mapping() {
        assert_eq!(native_type_for_decl("INTEGER"), native::INTEGER);
        assert_eq!(native_type_for_decl("bigint"), native::BIGINT);
        assert_eq!(native_type_for_decl("VARCHAR(40)"), native::VARCHAR);
        assert_eq!(native_type_for_decl("TEXT"), native::LONGVARCHAR);
        assert_eq!(native_type_for_decl("BLOB"), native::LONGVARBINARY);
        assert_eq!(native_type_for_decl("DOUBLE PRECISION"), native::DOUBLE);
        assert_eq!(native_type_for_decl("BOOLEAN"), native::BIT);
        assert_eq!(native_type_for_decl("DATETIME"), native::TYPE_TIMESTAMP);
        assert_eq!(native_type_for_decl("DECIMAL(10,2)"), native::DECIMAL);
        assert_eq!(native_type_for_decl("MONEY"), native::NUMERIC);
        assert_eq!(native_type_for_decl(""), native::LONGVARBINARY);
    }

    #[test]
    fn test_expression_columns_take_value_type() {
        let source = open();
        let mut stmt = source.allocate_statement().unwrap();
        stmt.execute("SELECT 1 + 1 AS two, 'x' AS letter, NULL AS missing, 2.5 AS half")
            .unwrap();
        assert_eq!(stmt.describe_column(1), Ok(("two".to_string(), native::BIGINT)));
        assert_eq!(stmt.describe_column(2), Ok(("letter".to_string(), native::VARCHAR)));
        assert_eq!(stmt.describe_column(3), Ok(("missing".to_string(), native::VARCHAR)));
        assert_eq!(stmt.describe_column(4), Ok(("half".to_string(), native::DOUBLE)));
        assert_eq!(stmt.describe_column(5), Err(CallFailed));
    }

    #[test]
    fn test_statement_without_result_reports_changes() {
        let source = open();
        let mut stmt = source.allocate_statement().unwrap();
        stmt.execute("CREATE TABLE t (v INTEGER)").unwrap();
        stmt.execute("INSERT INTO t VALUES (1), (2), (3)").unwrap();
        assert_eq!(stmt.num_result_columns(), Ok(0));
        assert_eq!(stmt.row_count(), Ok(3));
    }

    #[test]
    fn test_get_data_serves_text_in_chunks() {
        let source = open();
        let mut stmt = source.allocate_statement().unwrap();
        stmt.execute("SELECT 'abcdef' AS s").unwrap();
        assert_eq!(stmt.fetch(), Ok(true));

        let mut buffer = [0u8; 4];
        let got = stmt.get_data(1, TargetType::Char, &mut buffer);
        assert_eq!(got, GetData::new(ReturnCode::SuccessWithInfo, Indicator::Length(6)));
        assert_eq!(&buffer, b"abc\0");
        assert_eq!(stmt.diagnostics(), vec!["[01004] string data, right truncated"]);

        let got = stmt.get_data(1, TargetType::Char, &mut buffer);
        assert_eq!(got, GetData::new(ReturnCode::Success, Indicator::Length(3)));
        assert_eq!(&buffer, b"def\0");

        assert_eq!(stmt.get_data(1, TargetType::Char, &mut buffer).status, ReturnCode::NoData);
        assert_eq!(stmt.fetch(), Ok(false));
    }

    #[test]
    fn test_syntax_error_posts_sqlite_message() {
        let source = open();
        let mut stmt = source.allocate_statement().unwrap();
        assert_eq!(stmt.execute("SELEKT 1"), Err(CallFailed));
        let diagnostics = stmt.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].starts_with("[42000]"));
        assert!(diagnostics[0].contains("syntax error"));
        assert!(diagnostics[0].ends_with("(sqlite code 1)"));
    }

    #[test]
    fn test_released_statement_cannot_execute() {
        let source = open();
        let mut stmt = source.allocate_statement().unwrap();
        stmt.release().unwrap();
        assert_eq!(stmt.execute("SELECT 1"), Err(CallFailed));
        assert_eq!(stmt.diagnostics(), vec!["[HY010] statement handle was released"]);
    }
}
