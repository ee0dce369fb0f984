//! Database schema definitions derived from entity descriptors

use crate::metadata::{EntityDescriptor, RelationDescriptor};
use crate::Result;

/// Catalog lookup: does a table with this name exist
pub const TABLE_EXISTS: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE";

/// Catalog lookup: tables referenced by foreign keys of the given table
pub const REFERENCED_TABLES: &str = r#"SELECT "table" FROM pragma_foreign_key_list(?1)"#;

/// SQL to create an entity's table.
///
/// The key column must be declared exactly `INTEGER PRIMARY KEY` for SQLite to
/// alias it to the 64-bit rowid and generate values for it.
pub fn create_table(desc: &EntityDescriptor) -> Result<String> {
    let mut columns = vec![format!(
        "{} INTEGER PRIMARY KEY AUTOINCREMENT",
        desc.primary_key().column
    )];
    for field in desc.fields() {
        columns.push(format!("{} {}", field.column, desc.sql_type(field)?));
    }

    Ok(format!("CREATE TABLE {} ({})", desc.table_name(), columns.join(", ")))
}

/// SQL adding the foreign-key column for `relation` to the dependent's table.
///
/// SQLite has no `ADD FOREIGN KEY`; a column constraint carries the reference.
pub fn add_foreign_key(
    dependent: &EntityDescriptor,
    relation: &RelationDescriptor,
    target: &EntityDescriptor,
) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} BIGINT REFERENCES {}({}) ON DELETE CASCADE",
        dependent.table_name(),
        relation.column,
        target.table_name(),
        target.primary_key().column
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Book, Publisher};

    #[test]
    fn test_create_table_sql() {
        let desc = EntityDescriptor::build::<Book>().unwrap();
        assert_eq!(
            create_table(&desc).unwrap(),
            "CREATE TABLE books (id INTEGER PRIMARY KEY AUTOINCREMENT, title VARCHAR(255), published_at DATE)"
        );
    }

    #[test]
    fn test_add_foreign_key_sql() {
        let book = EntityDescriptor::build::<Book>().unwrap();
        let publisher = EntityDescriptor::build::<Publisher>().unwrap();

        assert_eq!(
            add_foreign_key(&book, &book.relations()[0], &publisher),
            "ALTER TABLE books ADD COLUMN publisher_id BIGINT REFERENCES publishers(id) ON DELETE CASCADE"
        );
    }
}
