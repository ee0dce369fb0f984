//! Relationship Linker - foreign keys for many-to-one relations
//!
//! Runs after every participating table exists. For each relation of a type it
//! checks the referenced table, then the catalog's foreign keys of the
//! dependent table, and adds the key column only when neither is in place.

use std::fmt;

use crate::entity::EntityType;
use crate::session::{Session, StatementKind};
use crate::storage::{schema, SchemaSynthesizer};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipLinkerStats {
    /// Foreign keys added by this run
    pub linked: usize,
    /// Foreign keys that were already in place
    pub existing: usize,
}

impl RelationshipLinkerStats {
    pub fn total(&self) -> usize {
        self.linked + self.existing
    }
}

impl fmt::Display for RelationshipLinkerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Relationship Linker Stats:")?;
        writeln!(f, "  Relations: {}", self.total())?;
        writeln!(f, "  Linked: {}", self.linked)?;
        writeln!(f, "  Existing: {}", self.existing)
    }
}

pub struct RelationshipLinker<'a> {
    session: &'a Session,
}

impl<'a> RelationshipLinker<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Whether `ty`'s table already has a foreign key into `target`'s table
    pub fn does_relationship_exist(&self, ty: EntityType, target: EntityType) -> Result<bool> {
        let desc = self.session.descriptor(ty)?;
        let target_desc = self.session.descriptor(target)?;

        let mut stmt = self.session.prepare(schema::REFERENCED_TABLES)?;
        let referenced = stmt
            .query_map([desc.table_name()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(referenced
            .iter()
            .any(|table| table.eq_ignore_ascii_case(target_desc.table_name())))
    }

    /// Add the foreign keys `ty` declares that are not in place yet
    pub fn ensure_relationships(&self, ty: EntityType) -> Result<RelationshipLinkerStats> {
        let desc = self.session.descriptor(ty)?;
        let synthesizer = SchemaSynthesizer::new(self.session);
        let mut stats = RelationshipLinkerStats::default();

        for relation in desc.relations() {
            let target = self.session.descriptor(relation.target)?;
            if !synthesizer.table_exists(target.table_name())? {
                return Err(Error::MissingReferencedEntity {
                    entity: ty.name().to_string(),
                    missing: relation.target.name().to_string(),
                });
            }

            if self.does_relationship_exist(ty, relation.target)? {
                tracing::info!("{} -> {} already linked", ty, relation.target);
                stats.existing += 1;
                continue;
            }

            let sql = schema::add_foreign_key(&desc, relation, &target);
            self.session.execute(StatementKind::Ddl, &sql, [])?;
            tracing::info!(
                "Linked {}.{} -> {}",
                desc.table_name(),
                relation.column,
                target.table_name()
            );
            stats.linked += 1;
        }

        Ok(stats)
    }

    /// Link every type in `types` that declares relations
    pub fn ensure_all(&self, types: &[EntityType]) -> Result<RelationshipLinkerStats> {
        let mut stats = RelationshipLinkerStats::default();
        for ty in types {
            if self.session.descriptor(*ty)?.relations().is_empty() {
                continue;
            }
            let run = self.ensure_relationships(*ty)?;
            stats.linked += run.linked;
            stats.existing += run.existing;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{library_types, Book, Publisher};

    fn book() -> EntityType {
        EntityType::of::<Book>()
    }

    fn publisher() -> EntityType {
        EntityType::of::<Publisher>()
    }

    #[test]
    fn test_link_once() {
        let session = Session::open_in_memory().unwrap();
        session.register(&library_types()).unwrap();
        let linker = RelationshipLinker::new(&session);

        assert!(!linker.does_relationship_exist(book(), publisher()).unwrap());
        let first = linker.ensure_relationships(book()).unwrap();
        assert_eq!(first.linked, 1);
        assert!(linker.does_relationship_exist(book(), publisher()).unwrap());

        let ddl = session.stats().ddl;
        let second = linker.ensure_relationships(book()).unwrap();
        assert_eq!(second, RelationshipLinkerStats { linked: 0, existing: 1 });
        assert_eq!(session.stats().ddl, ddl);
    }

    #[test]
    fn test_missing_referenced_table() {
        let session = Session::open_in_memory().unwrap();
        session.register(&[book()]).unwrap();

        let err = RelationshipLinker::new(&session)
            .ensure_relationships(book())
            .unwrap_err();
        assert!(matches!(err, Error::MissingReferencedEntity { .. }));

        let message = err.to_string();
        assert!(message.contains("Book"));
        assert!(message.contains("Missing entity Publisher"));
    }

    #[test]
    fn test_ensure_all_skips_types_without_relations() {
        let session = Session::open_in_memory().unwrap();
        session.register(&library_types()).unwrap();

        let stats = RelationshipLinker::new(&session).ensure_all(&library_types()).unwrap();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.linked, 1);
    }

    #[test]
    fn test_cascade_declared_on_column() {
        let session = Session::open_in_memory().unwrap();
        session.register(&library_types()).unwrap();
        session.create_relationships(&library_types()).unwrap();

        let (column, on_delete): (String, String) = session
            .connection()
            .query_row(
                r#"SELECT "from", on_delete FROM pragma_foreign_key_list('books')"#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(column, "publisher_id");
        assert_eq!(on_delete, "CASCADE");
    }
}
