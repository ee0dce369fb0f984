//! # tinyorm - a minimal object-relational mapper
//!
//! tinyorm maps application record types onto SQLite tables:
//! - Entity metadata declared once per type and kept in an immutable arena
//! - Schema synthesis (`CREATE TABLE`) and foreign-key linking, both idempotent
//! - A save/merge/update/delete write path with merge-before-insert
//! - A find path with eager, streamed and cursor-backed reads
//! - A first-level identity cache so each row has one live instance per session

pub mod entity;
pub mod metadata;
pub mod mapper;
pub mod cache;
pub mod storage;
pub mod linker;
pub mod session;
pub mod config;
pub mod library;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use entity::{shared, Entity, EntityType, Link, Shared};
pub use metadata::{EntityBuilder, EntityDescriptor, FieldDescriptor, FieldType, Metadata};
pub use cache::IdentityCache;
pub use storage::SchemaSynthesizer;
pub use linker::{RelationshipLinker, RelationshipLinkerStats};
pub use session::{EntityCursor, Session, SessionStats};
pub use config::OrmConfig;

/// Result type alias for tinyorm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tinyorm operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Entity {entity} has no primary key field")]
    MissingPrimaryKey { entity: String },

    #[error("Entity {entity} declares more than one primary key field")]
    DuplicatePrimaryKey { entity: String },

    #[error("Unsupported field type {field_type} for {entity}.{field}")]
    UnsupportedFieldType {
        entity: String,
        field: String,
        field_type: String,
    },

    #[error("Relationship between {entity} and {missing} cannot be made! Missing entity {missing}!")]
    MissingReferencedEntity { entity: String, missing: String },

    #[error("{entity} has no relationship to {target}")]
    MissingRelationship { entity: String, target: String },

    #[error("Table {table} is mapped by both {existing} and {entity}")]
    DuplicateTable {
        table: String,
        existing: String,
        entity: String,
    },

    #[error("Duplicate column {column} in {entity}")]
    DuplicateColumn { entity: String, column: String },

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Field {entity}.{field} does not hold a {expected} value")]
    FieldMismatch {
        entity: String,
        field: String,
        expected: String,
    },

    #[error("Mapping error: {0}")]
    Mapping(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Config encoding error: {0}")]
    ConfigEncoding(#[from] toml::ser::Error),

    #[error("Config already exists at {} (use --force to overwrite)", .0.display())]
    ConfigExists(std::path::PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the failure came from the database rather than from metadata or mapping
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
