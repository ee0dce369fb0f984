//! Persistence Engine - the session that ties the engine together
//!
//! A [`Session`] owns one SQLite connection plus the per-connection state:
//! the metadata arena, the identity cache and statement counters. Every
//! operation is a blocking call on the caller's thread.
//!
//! - `persistence`: save / merge / update / delete
//! - `query`: find_by_id / find_all / find_dependents
//! - `cursor`: the cursor handed out by `find_all_as_iterable`

mod cursor;
mod persistence;
mod query;

pub use cursor::EntityCursor;

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use rusqlite::{Connection, Params, Statement};

use crate::cache::IdentityCache;
use crate::config::OrmConfig;
use crate::entity::{Entity, EntityType};
use crate::linker::{RelationshipLinker, RelationshipLinkerStats};
use crate::metadata::{EntityDescriptor, Metadata};
use crate::storage::{connection, SchemaSynthesizer};
use crate::Result;

/// Statement counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// SELECTs, catalog lookups included
    pub queries: usize,
    /// INSERT, UPDATE and DELETE statements
    pub writes: usize,
    /// CREATE TABLE and ALTER TABLE statements
    pub ddl: usize,
}

impl SessionStats {
    pub fn total(&self) -> usize {
        self.queries + self.writes + self.ddl
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session Statistics:")?;
        writeln!(f, "  Queries: {}", self.queries)?;
        writeln!(f, "  Writes: {}", self.writes)?;
        writeln!(f, "  DDL: {}", self.ddl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatementKind {
    Query,
    Write,
    Ddl,
}

/// A connection plus the metadata, identity cache and counters that go with it.
pub struct Session {
    conn: Connection,
    metadata: RefCell<Metadata>,
    cache: RefCell<IdentityCache>,
    stats: Cell<SessionStats>,
    /// Whether the database enforces foreign keys, and so cascades deletes
    cascade: bool,
}

impl Session {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let config = OrmConfig::default();
        let conn = connection::open(path.as_ref(), &config)?;
        Ok(Self::new(conn, config.foreign_keys))
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_config(&OrmConfig::default())
    }

    pub fn from_config(config: &OrmConfig) -> Result<Self> {
        let conn = connection::open_configured(config)?;
        Ok(Self::new(conn, config.foreign_keys))
    }

    /// Open the database described by a TOML config file
    pub fn with_properties_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = OrmConfig::from_file(path.as_ref())?;
        Self::from_config(&config)
    }

    /// Wrap a connection opened elsewhere. Its pragmas are left as they are.
    pub fn with_connection(conn: Connection) -> Result<Self> {
        let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(Self::new(conn, foreign_keys == 1))
    }

    fn new(conn: Connection, cascade: bool) -> Self {
        Self {
            conn,
            metadata: RefCell::new(Metadata::new()),
            cache: RefCell::new(IdentityCache::new()),
            stats: Cell::new(SessionStats::default()),
            cascade,
        }
    }

    /// Close the connection, reporting any error SQLite raises doing so
    pub fn close(self) -> Result<()> {
        tracing::debug!("Closing session ({} cached instances)", self.cache.borrow().len());
        self.conn.close().map_err(|(_, e)| e.into())
    }

    // ========== Schema ==========

    /// Create the tables of `types` that do not exist yet. Returns how many were created.
    pub fn register(&self, types: &[EntityType]) -> Result<usize> {
        SchemaSynthesizer::new(self).ensure_tables(types)
    }

    /// Add the foreign keys of `types` that do not exist yet.
    ///
    /// Every referenced table must already exist, so call [`Session::register`]
    /// for all participating types first.
    pub fn create_relationships(&self, types: &[EntityType]) -> Result<RelationshipLinkerStats> {
        RelationshipLinker::new(self).ensure_all(types)
    }

    // ========== Accessors ==========

    pub fn descriptor_of<T: Entity>(&self) -> Result<Rc<EntityDescriptor>> {
        self.descriptor(EntityType::of::<T>())
    }

    pub fn descriptor(&self, ty: EntityType) -> Result<Rc<EntityDescriptor>> {
        self.metadata.borrow_mut().descriptor(ty)
    }

    /// Read-only view of the identity cache
    pub fn cache(&self) -> Ref<'_, IdentityCache> {
        self.cache.borrow()
    }

    /// Forget every cached instance. The database is not touched.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.get()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== Statement helpers ==========

    fn count(&self, kind: StatementKind) {
        let mut stats = self.stats.get();
        match kind {
            StatementKind::Query => stats.queries += 1,
            StatementKind::Write => stats.writes += 1,
            StatementKind::Ddl => stats.ddl += 1,
        }
        self.stats.set(stats);
    }

    /// Run a statement that returns no rows; returns the number of rows changed
    pub(crate) fn execute<P: Params>(&self, kind: StatementKind, sql: &str, params: P) -> Result<usize> {
        tracing::debug!("{}", sql);
        self.count(kind);
        Ok(self.conn.execute(sql, params)?)
    }

    /// Run a query returning a single integer, such as a `COUNT(*)`
    pub(crate) fn query_scalar<P: Params>(&self, sql: &str, params: P) -> Result<i64> {
        tracing::debug!("{}", sql);
        self.count(StatementKind::Query);
        Ok(self.conn.query_row(sql, params, |row| row.get(0))?)
    }

    pub(crate) fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        tracing::debug!("{}", sql);
        self.count(StatementKind::Query);
        Ok(self.conn.prepare(sql)?)
    }

    pub(crate) fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("entities", &self.metadata.borrow().len())
            .field("cache", &*self.cache.borrow())
            .field("stats", &self.stats.get())
            .finish()
    }
}

/// Log a failed read before handing it back to the caller
fn logged<T>(operation: &str, entity: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        tracing::error!("{} for {} failed: {}", operation, entity, e);
    }
    result
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::shared;
    use crate::testing::{library_session, library_types, sample_date, Book, Publisher};
    use crate::Link;

    #[test]
    fn test_register_is_idempotent() {
        let session = Session::open_in_memory().unwrap();
        let types = library_types();

        assert_eq!(session.register(&types).unwrap(), 2);
        let ddl = session.stats().ddl;

        assert_eq!(session.register(&types).unwrap(), 0);
        assert_eq!(session.stats().ddl, ddl);
    }

    #[test]
    fn test_create_relationships_is_idempotent() {
        let session = Session::open_in_memory().unwrap();
        let types = library_types();
        session.register(&types).unwrap();

        assert_eq!(session.create_relationships(&types).unwrap().linked, 1);
        let ddl = session.stats().ddl;

        assert_eq!(session.create_relationships(&types).unwrap().linked, 0);
        assert_eq!(session.stats().ddl, ddl);
    }

    #[test]
    fn test_scenario_publisher_and_book() {
        let session = library_session();

        let publisher = session.save(&shared(Publisher::new("Jakub"))).unwrap();
        let mut book = Book::new("whatever", sample_date());
        book.publisher = Link::to(&publisher);
        let book = session.save(&shared(book)).unwrap();
        let key = book.borrow().id.unwrap();

        session.clear_cache();
        let found = session.find_by_id::<Book>(key).unwrap().unwrap();
        let found = found.borrow();
        assert_eq!(found.title, "whatever");
        assert_eq!(found.date, Some(sample_date()));
        assert_eq!(found.publisher.key(), publisher.borrow().id);
    }

    #[test]
    fn test_unsaved_instance_check_issues_no_sql() {
        let session = library_session();
        let before = session.stats();

        let fresh = shared(Publisher::new("nobody"));
        assert!(!session.is_record_in_database(&fresh).unwrap());
        assert_eq!(session.stats(), before);
    }

    #[test]
    fn test_with_connection_keeps_pragmas() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", false).unwrap();
        let session = Session::with_connection(conn).unwrap();
        assert!(!session.cascade);

        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        let session = Session::with_connection(conn).unwrap();
        assert!(session.cascade);

        let session = Session::open_in_memory().unwrap();
        assert!(session.cascade);
    }

    #[test]
    fn test_with_properties_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("library.db");
        let config_path = dir.path().join("tinyorm.toml");
        crate::config::write_config(&config_path, &OrmConfig::with_database(db.to_string_lossy()), false)
            .unwrap();

        let session = Session::with_properties_from(&config_path).unwrap();
        session.register(&library_types()).unwrap();
        let key = session.save(&shared(Publisher::new("Jakub"))).unwrap().borrow().id.unwrap();
        session.close().unwrap();

        let reopened = Session::open(&db).unwrap();
        let found = reopened.find_by_id::<Publisher>(key).unwrap().unwrap();
        assert_eq!(found.borrow().name, "Jakub");
    }

    #[test]
    fn test_stats_display() {
        let stats = SessionStats {
            queries: 3,
            writes: 2,
            ddl: 1,
        };
        assert_eq!(stats.total(), 6);
        assert!(stats.to_string().contains("Writes: 2"));
    }
}
