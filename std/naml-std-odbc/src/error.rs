///
/// Driver error types.
///
/// Every failure surfaced by the driver falls into one of four kinds:
/// - SourceProtocol: a call-level operation failed; carries the handle's
///   diagnostic record chain, rendered one record per line
/// - InvalidColumnMetadata: the source described a column this driver
///   cannot classify, or a column index outside the table
/// - ResourceState: an operation on a closed handle, or closing a parent
///   handle while children are still live
/// - Config: an unreadable or invalid `[odbc]` configuration
///
/// "No more rows" and "field is NULL" are successful outcomes and never
/// appear here.
///

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = OdbcError> = std::result::Result<T, E>;

/// The kind of call-level handle an operation was issued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Environment,
    Connection,
    Statement,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Environment => "environment",
            HandleKind::Connection => "connection",
            HandleKind::Statement => "statement",
        };
        f.write_str(name)
    }
}

/// Ordered diagnostic records read back from a handle after a failed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<String>);

impl Diagnostics {
    pub fn new(records: Vec<String>) -> Self {
        Self(records)
    }

    pub fn records(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for Diagnostics {
    fn from(records: Vec<String>) -> Self {
        Self(records)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(no diagnostic records)");
        }
        for (i, record) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(record)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceProtocol,
    InvalidColumnMetadata,
    ResourceState,
    Config,
}

#[derive(Debug, Error)]
pub enum OdbcError {
    #[error("{operation} failed on {handle} handle:\n{diagnostics}")]
    SourceProtocol {
        operation: &'static str,
        handle: HandleKind,
        diagnostics: Diagnostics,
    },

    #[error("column {column} ('{name}') has unsupported native type code {code}")]
    UnknownNativeType { column: u16, name: String, code: i16 },

    #[error("column {column} is out of range for a result with {count} columns")]
    MissingColumn { column: usize, count: usize },

    #[error("cursor is closed")]
    CursorClosed,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("environment is closed")]
    EnvironmentClosed,

    #[error("connection still has {count} open cursor(s)")]
    OpenCursors { count: usize },

    #[error("environment still has {count} open connection(s)")]
    OpenConnections { count: usize },

    #[error("Invalid odbc configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid fetch mode '{0}': expected \"n\", \"a\" or \"na\"")]
    InvalidFetchMode(String),

    #[error("Failed to read configuration at {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl OdbcError {
    pub(crate) fn source_failure(
        handle: HandleKind,
        operation: &'static str,
        records: Vec<String>,
    ) -> Self {
        OdbcError::SourceProtocol {
            operation,
            handle,
            diagnostics: Diagnostics::new(records),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OdbcError::SourceProtocol { .. } => ErrorKind::SourceProtocol,
            OdbcError::UnknownNativeType { .. } | OdbcError::MissingColumn { .. } => {
                ErrorKind::InvalidColumnMetadata
            }
            OdbcError::CursorClosed
            | OdbcError::ConnectionClosed
            | OdbcError::EnvironmentClosed
            | OdbcError::OpenCursors { .. }
            | OdbcError::OpenConnections { .. } => ErrorKind::ResourceState,
            OdbcError::InvalidConfig(_)
            | OdbcError::InvalidFetchMode(_)
            | OdbcError::ConfigIo { .. }
            | OdbcError::ConfigParse(_) => ErrorKind::Config,
        }
    }

    /// Diagnostic records carried by a source failure, empty otherwise.
    pub fn diagnostics(&self) -> &[String] {
        match self {
            OdbcError::SourceProtocol { diagnostics, .. } => diagnostics.records(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_renders_one_record_per_line() {
        let err = OdbcError::source_failure(
            HandleKind::Statement,
            "fetch",
            vec![
                "[42S02] no such table: people".to_string(),
                "[01000] statement discarded".to_string(),
            ],
        );
        insta::assert_snapshot!(err.to_string(), @r"
        fetch failed on statement handle:
        [42S02] no such table: people
        [01000] statement discarded
        ");
        assert_eq!(err.kind(), ErrorKind::SourceProtocol);
        assert_eq!(err.diagnostics().len(), 2);
    }

    #[test]
    fn test_empty_diagnostics_placeholder() {
        let err =
            OdbcError::source_failure(HandleKind::Connection, "allocate statement", Vec::new());
        assert!(err.to_string().ends_with("(no diagnostic records)"));
    }

    #[test]
    fn test_error_display_messages() {
        let err = OdbcError::UnknownNativeType {
            column: 3,
            name: "shape".to_string(),
            code: -151,
        };
        assert!(err.to_string().contains("column 3"));
        assert!(err.to_string().contains("shape"));
        assert!(err.to_string().contains("-151"));
        assert_eq!(err.kind(), ErrorKind::InvalidColumnMetadata);

        let err = OdbcError::OpenCursors { count: 2 };
        assert!(err.to_string().contains("2 open cursor"));
        assert_eq!(err.kind(), ErrorKind::ResourceState);

        let err = OdbcError::InvalidFetchMode("x".to_string());
        assert!(err.to_string().contains("'x'"));
        assert_eq!(err.kind(), ErrorKind::Config);

        assert_eq!(OdbcError::CursorClosed.kind(), ErrorKind::ResourceState);
        assert!(OdbcError::CursorClosed.diagnostics().is_empty());
    }
}
