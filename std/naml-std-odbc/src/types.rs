///
/// Column metadata and native type classification.
///
/// Call-level sources report each result column with a native SQL type
/// code (ODBC numbering). The driver only distinguishes four semantic
/// types, which decide how a field is retrieved:
///
/// | Semantic | Native types |
/// |----------|--------------|
/// | String   | character, wide character, date, time, timestamp, interval, guid |
/// | Number   | exact and approximate numerics of every width |
/// | Binary   | binary, varbinary, long varbinary |
/// | Boolean  | bit |
///
/// The classification is total over the codes listed in `native`; any
/// other code is rejected while the column table is built.
///

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{HandleKind, OdbcError, Result};
use crate::source::Statement;

/// Native SQL type codes as reported by `describe_column`.
pub mod native {
    pub const UNKNOWN_TYPE: i16 = 0;
    pub const CHAR: i16 = 1;
    pub const NUMERIC: i16 = 2;
    pub const DECIMAL: i16 = 3;
    pub const INTEGER: i16 = 4;
    pub const SMALLINT: i16 = 5;
    pub const FLOAT: i16 = 6;
    pub const REAL: i16 = 7;
    pub const DOUBLE: i16 = 8;
    pub const DATE: i16 = 9;
    pub const INTERVAL: i16 = 10;
    pub const TIMESTAMP: i16 = 11;
    pub const VARCHAR: i16 = 12;
    pub const TYPE_DATE: i16 = 91;
    pub const TYPE_TIME: i16 = 92;
    pub const TYPE_TIMESTAMP: i16 = 93;
    pub const INTERVAL_YEAR: i16 = 101;
    pub const INTERVAL_MINUTE_TO_SECOND: i16 = 113;
    pub const LONGVARCHAR: i16 = -1;
    pub const BINARY: i16 = -2;
    pub const VARBINARY: i16 = -3;
    pub const LONGVARBINARY: i16 = -4;
    pub const BIGINT: i16 = -5;
    pub const TINYINT: i16 = -6;
    pub const BIT: i16 = -7;
    pub const WCHAR: i16 = -8;
    pub const WVARCHAR: i16 = -9;
    pub const WLONGVARCHAR: i16 = -10;
    pub const GUID: i16 = -11;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    String,
    Number,
    Binary,
    Boolean,
}

impl SemanticType {
    /// Classifies a native type code, `None` for codes outside the table.
    pub fn classify(code: i16) -> Option<SemanticType> {
        use native::*;
        let ty = match code {
            UNKNOWN_TYPE | CHAR | VARCHAR | LONGVARCHAR | WCHAR | WVARCHAR | WLONGVARCHAR
            | DATE | INTERVAL | TIMESTAMP | TYPE_DATE | TYPE_TIME | TYPE_TIMESTAMP | GUID
            | INTERVAL_YEAR..=INTERVAL_MINUTE_TO_SECOND => SemanticType::String,
            NUMERIC | DECIMAL | INTEGER | SMALLINT | FLOAT | REAL | DOUBLE | BIGINT
            | TINYINT => SemanticType::Number,
            BINARY | VARBINARY | LONGVARBINARY => SemanticType::Binary,
            BIT => SemanticType::Boolean,
            _ => return None,
        };
        Some(ty)
    }

    /// The type name handed to naml code in column info.
    pub fn name(self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Number => "number",
            SemanticType::Binary => "binary",
            SemanticType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    pub native_type: i16,
}

/// Ordered column descriptors for one executed statement.
///
/// Positions are 1-based, matching the source's column numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTable {
    columns: Vec<ColumnDescriptor>,
    by_name: IndexMap<String, usize>,
}

impl ColumnTable {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        let mut by_name = IndexMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            by_name.entry(column.name.clone()).or_insert(i);
        }
        Self { columns, by_name }
    }

    /// Describes columns `1..=count` of an executed statement.
    pub fn describe<S: Statement + ?Sized>(statement: &mut S, count: u16) -> Result<Arc<Self>> {
        let mut columns = Vec::with_capacity(count as usize);
        for index in 1..=count {
            let (name, code) = statement.describe_column(index).map_err(|_| {
                OdbcError::source_failure(
                    HandleKind::Statement,
                    "describe column",
                    statement.diagnostics(),
                )
            })?;
            let semantic_type = SemanticType::classify(code).ok_or_else(|| {
                OdbcError::UnknownNativeType {
                    column: index,
                    name: name.clone(),
                    code,
                }
            })?;
            columns.push(ColumnDescriptor {
                name,
                semantic_type,
                native_type: code,
            });
        }
        debug!(columns = count, "built column descriptor table");
        Ok(Arc::new(Self::new(columns)))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Descriptor at a 1-based position.
    pub fn get(&self, position: usize) -> Result<&ColumnDescriptor> {
        position
            .checked_sub(1)
            .and_then(|i| self.columns.get(i))
            .ok_or(OdbcError::MissingColumn {
                column: position,
                count: self.columns.len(),
            })
    }

    /// Zero-based index of the first column with this name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnDescriptor> {
        self.columns.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

impl<'a> IntoIterator for &'a ColumnTable {
    type Item = &'a ColumnDescriptor;
    type IntoIter = std::slice::Iter<'a, ColumnDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, code: i16) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            semantic_type: SemanticType::classify(code).expect("known code"),
            native_type: code,
        }
    }

    #[test]
    fn test_classification_table() {
        use native::*;
        let strings = [
            CHAR,
            VARCHAR,
            LONGVARCHAR,
            WVARCHAR,
            TYPE_DATE,
            TYPE_TIME,
            TYPE_TIMESTAMP,
            INTERVAL,
            107,
        ];
        for code in strings {
            assert_eq!(SemanticType::classify(code), Some(SemanticType::String), "code {}", code);
        }
        for code in [NUMERIC, DECIMAL, INTEGER, SMALLINT, FLOAT, REAL, DOUBLE, BIGINT, TINYINT] {
            assert_eq!(SemanticType::classify(code), Some(SemanticType::Number), "code {}", code);
        }
        for code in [BINARY, VARBINARY, LONGVARBINARY] {
            assert_eq!(SemanticType::classify(code), Some(SemanticType::Binary));
        }
        assert_eq!(SemanticType::classify(BIT), Some(SemanticType::Boolean));
    }

    #[test]
    fn test_unknown_codes_are_rejected() {
        for code in [-151, -12, 14, 100, 114, i16::MAX] {
            assert_eq!(SemanticType::classify(code), None, "code {}", code);
        }
    }

    #[test]
    fn test_positions_are_one_based() {
        let table = ColumnTable::new(vec![
            column("name", native::VARCHAR),
            column("age", native::INTEGER),
        ]);
        assert_eq!(table.get(1).unwrap().name, "name");
        assert_eq!(table.get(2).unwrap().semantic_type, SemanticType::Number);
        assert!(matches!(table.get(0), Err(OdbcError::MissingColumn { column: 0, count: 2 })));
        assert!(matches!(table.get(3), Err(OdbcError::MissingColumn { column: 3, count: 2 })));
    }

    #[test]
    fn test_duplicate_names_resolve_to_first_column() {
        let table = ColumnTable::new(vec![
            column("id", native::INTEGER),
            column("id", native::VARCHAR),
        ]);
        assert_eq!(table.index_of("id"), Some(0));
        assert_eq!(table.index_of("missing"), None);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["id", "id"]);
    }
}
