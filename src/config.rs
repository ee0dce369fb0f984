use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Connection settings, read from `tinyorm.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// Database file; an in-memory database when absent
    pub database: Option<String>,
    pub foreign_keys: bool,
    pub busy_timeout_ms: u64,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            database: None,
            foreign_keys: true,
            busy_timeout_ms: 1000,
        }
    }
}

impl OrmConfig {
    pub fn with_database(path: impl Into<String>) -> Self {
        Self {
            database: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.as_ref().map(PathBuf::from)
    }

    /// Parse a config file, failing if it is missing or malformed
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("tinyorm.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".tinyorm").join("tinyorm.db")
}

/// Settings from `path`, or from `tinyorm.toml` in the working directory.
/// `Ok(None)` when that file does not exist.
pub fn load_config(path: Option<&Path>) -> Result<Option<OrmConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    match OrmConfig::from_file(&path) {
        Ok(config) => Ok(Some(config)),
        Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write `config` as TOML. An existing file is only replaced with `force`.
pub fn write_config(path: &Path, config: &OrmConfig, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::ConfigExists(path.to_path_buf()));
    }
    fs::write(path, toml::to_string_pretty(config)?)?;
    tracing::debug!("Wrote config {}", path.display());
    Ok(())
}

/// Create the directory a database file will live in
pub fn ensure_db_dir(db_path: &Path) -> Result<()> {
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}
