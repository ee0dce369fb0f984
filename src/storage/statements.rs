//! Parameterized DML built from entity descriptors.
//!
//! Values are always bound as `?N` parameters; only table and column names,
//! which descriptors validate as plain identifiers, are spliced into the text.

use crate::metadata::EntityDescriptor;

fn placeholders(count: usize) -> String {
    (1..=count).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

/// `INSERT` of the given columns, in order
pub fn insert(desc: &EntityDescriptor, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", desc.table_name());
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        desc.table_name(),
        columns.join(", "),
        placeholders(columns.len())
    )
}

/// `UPDATE` of the given columns; the key binds as the last parameter
pub fn update(desc: &EntityDescriptor, columns: &[&str]) -> String {
    let pk = &desc.primary_key().column;
    let assignments = if columns.is_empty() {
        format!("{pk} = {pk}")
    } else {
        columns
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        desc.table_name(),
        assignments,
        pk,
        columns.len() + 1
    )
}

pub fn delete_by_id(desc: &EntityDescriptor) -> String {
    format!("DELETE FROM {} WHERE {} = ?1", desc.table_name(), desc.primary_key().column)
}

pub fn count_by_id(desc: &EntityDescriptor) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?1",
        desc.table_name(),
        desc.primary_key().column
    )
}

pub fn select_by_id(desc: &EntityDescriptor) -> String {
    format!("SELECT * FROM {} WHERE {} = ?1", desc.table_name(), desc.primary_key().column)
}

pub fn select_all(desc: &EntityDescriptor) -> String {
    format!("SELECT * FROM {} ORDER BY {}", desc.table_name(), desc.primary_key().column)
}

/// Rows whose `column` equals the bound value
pub fn select_where(desc: &EntityDescriptor, column: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = ?1 ORDER BY {}",
        desc.table_name(),
        column,
        desc.primary_key().column
    )
}

/// Keys of the rows whose `column` equals `?1`
pub fn select_keys_where(desc: &EntityDescriptor, column: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        desc.primary_key().column,
        desc.table_name(),
        column
    )
}
