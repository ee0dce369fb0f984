//! Opening and configuring SQLite connections

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::config::OrmConfig;
use crate::Result;

/// Open a database file (creates if doesn't exist)
pub fn open(path: &Path, config: &OrmConfig) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, config)?;
    tracing::info!("Opened database {}", path.display());
    Ok(conn)
}

/// Open an in-memory database
pub fn open_in_memory(config: &OrmConfig) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn, config)?;
    tracing::debug!("Opened in-memory database");
    Ok(conn)
}

/// Open whatever `config` points at
pub fn open_configured(config: &OrmConfig) -> Result<Connection> {
    match config.database_path() {
        Some(path) => open(&path, config),
        None => open_in_memory(config),
    }
}

/// Apply connection pragmas. Foreign keys are off by default in SQLite,
/// and `ON DELETE CASCADE` only fires with them on.
pub fn configure(conn: &Connection, config: &OrmConfig) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign_keys_on(conn: &Connection) -> bool {
        conn.query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
            .unwrap()
            == 1
    }

    #[test]
    fn test_foreign_keys_enabled_by_default() {
        let conn = open_in_memory(&OrmConfig::default()).unwrap();
        assert!(foreign_keys_on(&conn));
    }

    #[test]
    fn test_foreign_keys_can_be_disabled() {
        let config = OrmConfig {
            foreign_keys: false,
            ..OrmConfig::default()
        };
        let conn = open_in_memory(&config).unwrap();
        assert!(!foreign_keys_on(&conn));
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.db");
        let config = OrmConfig::with_database(path.to_string_lossy());

        let conn = open_configured(&config).unwrap();
        conn.execute("CREATE TABLE probe (id INTEGER PRIMARY KEY)", []).unwrap();
        assert!(foreign_keys_on(&conn));
        assert!(path.exists());
    }
}
