///
/// C ABI for the naml runtime.
///
/// Handles are owned boxed pointers passed to naml code as i64:
/// - environment: `Environment<SqliteDriver>`
/// - connection: the connection plus the row count of its last
///   statement without a result set
/// - cursor: the cursor plus the positional values of its current row
///
/// Each handle is freed by its close function. Cursors and connections
/// hold no borrows of their parents, but a parent refuses to close while
/// children are open.
///
/// Error handling:
/// - On success: return value normally
/// - On failure: store the message in the thread's last-error slot and
///   return a sentinel (0, -1, or null)
///
/// Strings and byte buffers returned to the caller are owned by it and
/// released with `naml_db_odbc_string_free` / `naml_db_odbc_bytes_free`.
/// Column positions are 1-based.
///

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::path::Path;

use crate::config::OdbcConfig;
use crate::connection::{Connection, Environment, Execution};
use crate::cursor::Cursor;
use crate::error::OdbcError;
use crate::sqlite::{SqliteDriver, SqliteSource, SqliteStatement};
use crate::value::FieldValue;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(message: impl Into<String>) {
    let message = message.into();
    tracing::debug!(error = %message, "odbc call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn fail<T>(e: OdbcError, sentinel: T) -> T {
    set_error(e.to_string());
    sentinel
}

pub struct HostConnection {
    connection: Connection<SqliteSource>,
    changes: i64,
}

pub struct HostCursor {
    cursor: Cursor<SqliteStatement>,
    current: Vec<FieldValue>,
}

fn into_handle<T>(value: T) -> i64 {
    Box::into_raw(Box::new(value)) as i64
}

/// Borrows the object behind `handle`.
///
/// # Safety
/// `handle` must be 0 or a live handle of type `T` produced by this
/// module.
unsafe fn handle_ref<'a, T>(handle: i64, what: &str) -> Option<&'a mut T> {
    if handle <= 0 {
        set_error(format!("Invalid {} handle", what));
        return None;
    }
    unsafe { (handle as *mut T).as_mut() }
}

/// # Safety
/// `handle` must be 0 or a live handle of type `T`; it is invalid after
/// this call.
unsafe fn take_handle<T>(handle: i64) -> Option<Box<T>> {
    if handle <= 0 {
        return None;
    }
    Some(unsafe { Box::from_raw(handle as *mut T) })
}

unsafe fn string_from_c(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    let s = unsafe { CStr::from_ptr(s) };
    Some(s.to_string_lossy().into_owned())
}

fn string_to_c(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(s) => s.into_raw(),
        Err(_) => {
            set_error("String contains an interior NUL byte");
            std::ptr::null_mut()
        }
    }
}

fn current_value(cursor: &HostCursor, column: i64) -> Option<&FieldValue> {
    let count = cursor.current.len();
    let value = usize::try_from(column)
        .ok()
        .and_then(|c| c.checked_sub(1))
        .and_then(|i| cursor.current.get(i));
    if value.is_none() {
        set_error(
            OdbcError::MissingColumn {
                column: column.max(0) as usize,
                count,
            }
            .to_string(),
        );
    }
    value
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_env_new() -> i64 {
    into_handle(Environment::new(SqliteDriver::new()))
}

/// Creates an environment configured from the `[odbc]` table of the
/// manifest at `path`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_env_from_config(path: *const c_char) -> i64 {
    let Some(path) = (unsafe { string_from_c(path) }) else {
        set_error("Missing configuration path");
        return -1;
    };
    match OdbcConfig::from_path(Path::new(&path)) {
        Ok(config) => into_handle(Environment::with_config(SqliteDriver::new(), config)),
        Err(e) => fail(e, -1),
    }
}

/// Returns 0 on success and -1 while connections are still open, in
/// which case the handle stays valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_env_close(env: i64) -> i64 {
    let Some(environment) = (unsafe { handle_ref::<Environment<SqliteDriver>>(env, "environment") })
    else {
        return -1;
    };
    if let Err(e) = environment.close() {
        return fail(e, -1);
    }
    drop(unsafe { take_handle::<Environment<SqliteDriver>>(env) });
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_connect(
    env: i64,
    target: *const c_char,
    user: *const c_char,
    password: *const c_char,
) -> i64 {
    let Some(environment) = (unsafe { handle_ref::<Environment<SqliteDriver>>(env, "environment") })
    else {
        return -1;
    };
    let Some(target) = (unsafe { string_from_c(target) }) else {
        set_error("Missing connection target");
        return -1;
    };
    let user = unsafe { string_from_c(user) };
    let password = unsafe { string_from_c(password) };
    match environment.connect(&target, user.as_deref(), password.as_deref()) {
        Ok(connection) => into_handle(HostConnection {
            connection,
            changes: 0,
        }),
        Err(e) => fail(e, -1),
    }
}

/// Returns 0 on success and -1 while cursors are still open, in which
/// case the handle stays valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_close(conn: i64) -> i64 {
    let Some(host) = (unsafe { handle_ref::<HostConnection>(conn, "connection") }) else {
        return -1;
    };
    let closed = host.connection.close();
    if let Err(OdbcError::OpenCursors { count }) = closed {
        return fail(OdbcError::OpenCursors { count }, -1);
    }
    drop(unsafe { take_handle::<HostConnection>(conn) });
    match closed {
        Ok(()) => 0,
        Err(e) => fail(e, -1),
    }
}

/// Executes `sql`. Returns a cursor handle for statements with a result
/// set, 0 for other statements (see `naml_db_odbc_changes`), and -1 on
/// failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_execute(conn: i64, sql: *const c_char) -> i64 {
    let Some(host) = (unsafe { handle_ref::<HostConnection>(conn, "connection") }) else {
        return -1;
    };
    let Some(sql) = (unsafe { string_from_c(sql) }) else {
        set_error("Missing SQL text");
        return -1;
    };
    match host.connection.execute(&sql) {
        Ok(Execution::Cursor(cursor)) => into_handle(HostCursor {
            cursor,
            current: Vec::new(),
        }),
        Ok(Execution::RowCount(n)) => {
            host.changes = n;
            0
        }
        Err(e) => fail(e, -1),
    }
}

/// Rows affected by the connection's last statement without a result set.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_changes(conn: i64) -> i64 {
    match unsafe { handle_ref::<HostConnection>(conn, "connection") } {
        Some(host) => host.changes,
        None => -1,
    }
}

/// Advances to the next row: 1 when a row was decoded, 0 at the end of
/// the result, -1 on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_fetch(cursor: i64) -> i64 {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return -1;
    };
    match host.cursor.fetch_values_into(&mut host.current) {
        Ok(true) => 1,
        Ok(false) => {
            host.current.clear();
            0
        }
        Err(e) => fail(e, -1),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_column_count(cursor: i64) -> i64 {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return -1;
    };
    match host.cursor.columns() {
        Ok(columns) => columns.len() as i64,
        Err(e) => fail(e, -1),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_column_name(cursor: i64, column: i64) -> *mut c_char {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return std::ptr::null_mut();
    };
    let described = host
        .cursor
        .columns()
        .and_then(|columns| columns.get(column.max(0) as usize).map(|c| c.name.clone()));
    match described {
        Ok(name) => string_to_c(&name),
        Err(e) => fail(e, std::ptr::null_mut()),
    }
}

/// Semantic type name of a column: "string", "number", "binary" or
/// "boolean".
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_column_type(cursor: i64, column: i64) -> *mut c_char {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return std::ptr::null_mut();
    };
    let described = host
        .cursor
        .columns()
        .and_then(|columns| columns.get(column.max(0) as usize).map(|c| c.semantic_type));
    match described {
        Ok(semantic_type) => string_to_c(semantic_type.name()),
        Err(e) => fail(e, std::ptr::null_mut()),
    }
}

/// 1 when the field is NULL, 0 when it is not, -1 on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_is_null(cursor: i64, column: i64) -> i64 {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return -1;
    };
    match current_value(host, column) {
        Some(value) => i64::from(value.is_null()),
        None => -1,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_get_float(cursor: i64, column: i64) -> f64 {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return 0.0;
    };
    match current_value(host, column) {
        Some(FieldValue::Number(n)) => *n,
        Some(FieldValue::Null) | None => 0.0,
        Some(other) => {
            set_error(format!("Column {} is not a number: {:?}", column, other));
            0.0
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_get_bool(cursor: i64, column: i64) -> i64 {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return -1;
    };
    match current_value(host, column) {
        Some(FieldValue::Boolean(b)) => i64::from(*b),
        Some(FieldValue::Null) => 0,
        Some(other) => {
            set_error(format!("Column {} is not a boolean: {:?}", column, other));
            -1
        }
        None => -1,
    }
}

/// Text of a string field. NULL fields and failures return null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_get_string(cursor: i64, column: i64) -> *mut c_char {
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return std::ptr::null_mut();
    };
    match current_value(host, column) {
        Some(FieldValue::String(s)) => string_to_c(s),
        Some(FieldValue::Number(n)) => string_to_c(&n.to_string()),
        Some(FieldValue::Boolean(b)) => string_to_c(if *b { "true" } else { "false" }),
        Some(FieldValue::Binary(_)) => {
            set_error(format!("Column {} is binary; use get_bytes", column));
            std::ptr::null_mut()
        }
        Some(FieldValue::Null) | None => std::ptr::null_mut(),
    }
}

/// Copies a binary or string field into a new buffer and writes its
/// length to `out_len`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_get_bytes(
    cursor: i64,
    column: i64,
    out_len: *mut usize,
) -> *mut u8 {
    if !out_len.is_null() {
        unsafe { *out_len = 0 };
    }
    let Some(host) = (unsafe { handle_ref::<HostCursor>(cursor, "cursor") }) else {
        return std::ptr::null_mut();
    };
    let Some(bytes) = current_value(host, column).and_then(FieldValue::as_bytes) else {
        return std::ptr::null_mut();
    };
    let buffer: Box<[u8]> = bytes.into();
    if !out_len.is_null() {
        unsafe { *out_len = buffer.len() };
    }
    Box::into_raw(buffer) as *mut u8
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_bytes_free(bytes: *mut u8, len: usize) {
    if bytes.is_null() {
        return;
    }
    let slice = std::ptr::slice_from_raw_parts_mut(bytes, len);
    drop(unsafe { Box::from_raw(slice) });
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(s) });
}

/// Releases the cursor and frees its handle. Returns -1 if the statement
/// release reported an error; the handle is freed either way.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_cursor_close(cursor: i64) -> i64 {
    let Some(mut host) = (unsafe { take_handle::<HostCursor>(cursor) }) else {
        set_error("Invalid cursor handle");
        return -1;
    };
    match host.cursor.close() {
        Ok(()) => 0,
        Err(e) => fail(e, -1),
    }
}

/// Takes the calling thread's last error message, or null if there is
/// none.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn naml_db_odbc_last_error() -> *mut c_char {
    match LAST_ERROR.with(|slot| slot.borrow_mut().take()) {
        Some(message) => CString::new(message.replace('\0', " "))
            .map(CString::into_raw)
            .unwrap_or(std::ptr::null_mut()),
        None => std::ptr::null_mut(),
    }
}
