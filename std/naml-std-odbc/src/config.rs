///
/// # Driver Configuration
///
/// Settings come from the `[odbc]` table of a project's `naml.toml`. Every
/// key is optional:
///
/// ```toml
/// [odbc]
/// chunk_size = 8192   # staging buffer for string and binary fields
/// fetch_mode = "na"   # default row layout for host fetches: "n", "a" or "na"
/// ```
///
/// The rest of the manifest is ignored here.
///

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OdbcError, Result};
use crate::reader::{DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::table::FetchMode;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OdbcConfig {
    pub chunk_size: usize,
    pub fetch_mode: FetchMode,
}

impl Default for OdbcConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_mode: FetchMode::Positional,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManifestSection {
    #[serde(default)]
    odbc: OdbcConfig,
}

impl OdbcConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let section: ManifestSection = toml::from_str(content)?;
        section.odbc.validate()?;
        Ok(section.odbc)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| OdbcError::ConfigIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(OdbcError::InvalidConfig(format!(
                "chunk_size must be at least {} bytes, got {}",
                MIN_CHUNK_SIZE, self.chunk_size
            )));
        }
        Ok(())
    }
}
