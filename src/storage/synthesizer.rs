//! Schema Synthesizer - create-if-absent tables for entity types

use crate::entity::EntityType;
use crate::session::{Session, StatementKind};
use crate::Result;

use super::schema;

pub struct SchemaSynthesizer<'a> {
    session: &'a Session,
}

impl<'a> SchemaSynthesizer<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Whether the catalog has a table with this name (case-insensitive)
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.session.query_scalar(schema::TABLE_EXISTS, [table])? > 0)
    }

    /// Whether the table for `ty` exists
    pub fn does_entity_exist(&self, ty: EntityType) -> Result<bool> {
        let desc = self.session.descriptor(ty)?;
        self.table_exists(desc.table_name())
    }

    /// Create the table for `ty` unless it exists. Returns whether it was created.
    pub fn ensure_table(&self, ty: EntityType) -> Result<bool> {
        let desc = self.session.descriptor(ty)?;
        // Build first so an unsupported field fails before any catalog lookup
        let sql = schema::create_table(&desc)?;

        if self.table_exists(desc.table_name())? {
            tracing::info!("Table {} for {} already exists", desc.table_name(), ty);
            return Ok(false);
        }

        self.session.execute(StatementKind::Ddl, &sql, [])?;
        tracing::info!("Created table {} for {}", desc.table_name(), ty);
        Ok(true)
    }

    /// Ensure a table for each type, in order. Returns how many were created.
    pub fn ensure_tables(&self, types: &[EntityType]) -> Result<usize> {
        let mut created = 0;
        for ty in types {
            if self.ensure_table(*ty)? {
                created += 1;
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityBuilder, FieldType};
    use crate::testing::{Book, Publisher};
    use crate::{Entity, Error};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Gauge {
        id: Option<i64>,
        reading: f64,
    }

    impl Entity for Gauge {
        const NAME: &'static str = "Gauge";

        fn describe(b: &mut EntityBuilder) {
            b.id("id").column("reading", FieldType::Other("f64"));
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: Option<i64>) {
            self.id = id;
        }
    }

    #[test]
    fn test_ensure_table_creates_once() {
        let session = Session::open_in_memory().unwrap();
        let synthesizer = SchemaSynthesizer::new(&session);
        let publisher = EntityType::of::<Publisher>();

        assert!(!synthesizer.does_entity_exist(publisher).unwrap());
        assert!(synthesizer.ensure_table(publisher).unwrap());
        assert!(synthesizer.does_entity_exist(publisher).unwrap());

        assert!(!synthesizer.ensure_table(publisher).unwrap());
        assert_eq!(session.stats().ddl, 1);
    }

    #[test]
    fn test_existing_table_matched_case_insensitively() {
        let session = Session::open_in_memory().unwrap();
        session
            .connection()
            .execute("CREATE TABLE BOOKS (id INTEGER PRIMARY KEY)", [])
            .unwrap();

        let synthesizer = SchemaSynthesizer::new(&session);
        assert!(synthesizer.does_entity_exist(EntityType::of::<Book>()).unwrap());
        assert!(!synthesizer.ensure_table(EntityType::of::<Book>()).unwrap());
    }

    #[test]
    fn test_unsupported_field_creates_nothing() {
        let session = Session::open_in_memory().unwrap();
        let synthesizer = SchemaSynthesizer::new(&session);

        let err = synthesizer.ensure_table(EntityType::of::<Gauge>()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFieldType { .. }));
        assert_eq!(session.stats().total(), 0);
    }

    #[test]
    fn test_created_columns() {
        let session = Session::open_in_memory().unwrap();
        SchemaSynthesizer::new(&session)
            .ensure_tables(&[EntityType::of::<Book>()])
            .unwrap();

        let mut stmt = session.connection().prepare("SELECT name, type FROM pragma_table_info('books')").unwrap();
        let columns: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(
            columns,
            vec![
                ("id".to_string(), "INTEGER".to_string()),
                ("title".to_string(), "VARCHAR(255)".to_string()),
                ("published_at".to_string(), "DATE".to_string()),
            ]
        );
    }
}
