///
/// naml ODBC-style Database Support
///
/// Call-level database access for naml: a handle hierarchy (environment,
/// connection, statement) over a pluggable source, with rows decoded one
/// field at a time into naml values.
///
/// Architecture:
/// - `source` defines the call-level traits a data source implements
///   (`Driver`, `Source`, `Statement`); `sqlite` and `memory` are the
///   built-in sources.
/// - `types` classifies native SQL type codes into four semantic types and
///   builds the per-statement column descriptor table.
/// - `reader` retrieves a single field, reassembling long string and
///   binary values from fixed-size chunks.
/// - `decoder` turns the current row into positional or keyed values;
///   `cursor` walks the result with an open/exhausted/closed lifecycle.
/// - `connection` owns the environment and connection handles and counts
///   their live children.
/// - `ffi` exposes the whole stack to naml code through a C ABI.
///
/// Functions:
/// - Environment: env_new, env_from_config, env_close
/// - Connection: connect, close, execute, changes
/// - Cursor: fetch, column_count, column_name, column_type, is_null,
///   get_float, get_bool, get_string, get_bytes, cursor_close
/// - Utility: bytes_free, string_free, last_error
///

pub mod config;
pub mod connection;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod ffi;
pub mod memory;
pub mod reader;
pub mod source;
pub mod sqlite;
pub mod table;
pub mod types;
pub mod value;

pub use config::OdbcConfig;
pub use connection::{Connection, Environment, Execution};
pub use cursor::{Cursor, CursorState};
pub use error::{Diagnostics, ErrorKind, HandleKind, OdbcError, Result};
pub use memory::{MemoryDriver, MemorySource, MemoryTable, MemoryValue};
pub use reader::{FieldReader, DEFAULT_CHUNK_SIZE};
pub use source::{
    CallFailed, CallResult, Driver, GetData, Indicator, ReturnCode, Source, Statement, TargetType,
};
pub use sqlite::{SqliteDriver, SqliteSource, SqliteStatement};
pub use table::{FetchMode, RowTable};
pub use types::{ColumnDescriptor, ColumnTable, SemanticType};
pub use value::{FieldValue, Row};
