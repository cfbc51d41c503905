///
/// Decoded field values and rows.
///
/// A `Row` keeps its values in column order and shares the statement's
/// `ColumnTable`, so lookups by name are a view over the positional
/// values rather than a second copy.
///

use std::sync::Arc;

use indexmap::IndexMap;

use crate::types::{ColumnTable, SemanticType};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Number(f64),
    Binary(Vec<u8>),
    Boolean(bool),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Binary(b) => Some(b),
            FieldValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Semantic type of a non-null value.
    pub fn semantic_type(&self) -> Option<SemanticType> {
        match self {
            FieldValue::Null => None,
            FieldValue::String(_) => Some(SemanticType::String),
            FieldValue::Number(_) => Some(SemanticType::Number),
            FieldValue::Binary(_) => Some(SemanticType::Binary),
            FieldValue::Boolean(_) => Some(SemanticType::Boolean),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<ColumnTable>,
    values: Vec<FieldValue>,
}

impl Row {
    pub(crate) fn new(columns: Arc<ColumnTable>, values: Vec<FieldValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a zero-based position.
    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }

    /// Value of the first column with this name.
    pub fn by_name(&self, name: &str) -> Option<&FieldValue> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn columns(&self) -> &Arc<ColumnTable> {
        &self.columns
    }

    /// Pairs of column name and value, in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.columns.names().zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<FieldValue> {
        self.values
    }

    /// Keyed copy of the row; a repeated column name keeps its last value.
    pub fn to_map(&self) -> IndexMap<String, FieldValue> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{native, ColumnDescriptor};

    fn people() -> Arc<ColumnTable> {
        Arc::new(ColumnTable::new(vec![
            ColumnDescriptor {
                name: "name".to_string(),
                semantic_type: SemanticType::String,
                native_type: native::VARCHAR,
            },
            ColumnDescriptor {
                name: "age".to_string(),
                semantic_type: SemanticType::Number,
                native_type: native::INTEGER,
            },
        ]))
    }

    #[test]
    fn test_row_by_name_is_a_view() {
        let row = Row::new(
            people(),
            vec![FieldValue::String("Ada".to_string()), FieldValue::Null],
        );
        assert_eq!(row.by_name("name").and_then(FieldValue::as_str), Some("Ada"));
        assert!(row.by_name("age").is_some_and(FieldValue::is_null));
        assert_eq!(row.by_name("email"), None);
        assert_eq!(row.get(0), row.by_name("name"));
    }

    #[test]
    fn test_row_to_map_keeps_column_order() {
        let row = Row::new(
            people(),
            vec![FieldValue::String("Ada".to_string()), FieldValue::Number(36.0)],
        );
        let map = row.to_map();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["name", "age"]);
        assert_eq!(map["age"], FieldValue::Number(36.0));
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(FieldValue::Number(1.5).as_f64(), Some(1.5));
        assert_eq!(FieldValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(FieldValue::Binary(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert_eq!(FieldValue::Null.semantic_type(), None);
        assert_eq!(FieldValue::Number(0.0).as_str(), None);
    }
}
