///
/// Reusable row containers for host-side fetches.
///
/// naml code fetches into a table it owns and picks how the row is laid
/// out with a mode string: "n" fills positions, "a" fills column names,
/// "na" fills both. `RowTable` is that caller-owned table; its storage is
/// reused from one fetch to the next.
///

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::OdbcError;
use crate::value::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FetchMode {
    #[default]
    Positional,
    Named,
    Both,
}

impl FetchMode {
    pub fn positional(self) -> bool {
        matches!(self, FetchMode::Positional | FetchMode::Both)
    }

    pub fn named(self) -> bool {
        matches!(self, FetchMode::Named | FetchMode::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchMode::Positional => "n",
            FetchMode::Named => "a",
            FetchMode::Both => "na",
        }
    }
}

impl FromStr for FetchMode {
    type Err = OdbcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "n" => Ok(FetchMode::Positional),
            "a" => Ok(FetchMode::Named),
            "na" | "an" => Ok(FetchMode::Both),
            other => Err(OdbcError::InvalidFetchMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for FetchMode {
    type Error = OdbcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FetchMode> for String {
    fn from(mode: FetchMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowTable {
    pub positional: Vec<FieldValue>,
    pub named: IndexMap<String, FieldValue>,
}

impl RowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.positional.clear();
        self.named.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch_modes() {
        assert_eq!("n".parse::<FetchMode>().unwrap(), FetchMode::Positional);
        assert_eq!("a".parse::<FetchMode>().unwrap(), FetchMode::Named);
        assert_eq!("na".parse::<FetchMode>().unwrap(), FetchMode::Both);
        assert_eq!("an".parse::<FetchMode>().unwrap(), FetchMode::Both);
        assert!(matches!(
            "x".parse::<FetchMode>(),
            Err(OdbcError::InvalidFetchMode(m)) if m == "x"
        ));
        assert!("".parse::<FetchMode>().is_err());
    }

    #[test]
    fn test_mode_layout_flags() {
        assert!(FetchMode::Positional.positional() && !FetchMode::Positional.named());
        assert!(!FetchMode::Named.positional() && FetchMode::Named.named());
        assert!(FetchMode::Both.positional() && FetchMode::Both.named());
        assert_eq!(FetchMode::default(), FetchMode::Positional);
    }
}
