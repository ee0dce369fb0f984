//! Row Mapper - rows to instances and instances to column values
//!
//! Instances cross the boundary as JSON objects: serde turns an entity into a
//! map keyed by field name, the descriptor says which column each key maps to
//! and how to convert it. Reads are lenient (a bad column leaves the field at
//! its current value and logs), writes are strict.

use chrono::NaiveDate;
use rusqlite::types::Value;
use serde_json::{Map, Value as Json};

use crate::entity::{with_link_scope, Entity};
use crate::metadata::{EntityDescriptor, FieldType};
use crate::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A result row addressable by column name.
pub trait RowSource {
    /// Value of `column`, or `None` when the row has no such column
    fn column_value(&self, column: &str) -> Option<Value>;
}

impl RowSource for rusqlite::Row<'_> {
    fn column_value(&self, column: &str) -> Option<Value> {
        self.get::<_, Value>(column).ok()
    }
}

/// An owned copy of one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnedRow {
    columns: Vec<(String, Value)>,
}

impl OwnedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.push((column.to_string(), value.into()));
        self
    }

    /// Copy the current row of a query, given the statement's column names
    pub fn from_row(row: &rusqlite::Row, columns: &[String]) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            values.push((name.clone(), row.get::<_, Value>(idx)?));
        }
        Ok(Self { columns: values })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<Vec<(String, Value)>> for OwnedRow {
    fn from(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }
}

impl RowSource for OwnedRow {
    fn column_value(&self, column: &str) -> Option<Value> {
        // SQLite column names are case-insensitive
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value.clone())
    }
}

/// Build a new instance from a row.
///
/// Starts from `T::default()` and assigns the primary key, every persistable
/// field and every foreign key present in the row. Links come back unloaded.
pub fn to_instance<T: Entity, R: RowSource + ?Sized>(row: &R, desc: &EntityDescriptor) -> Result<T> {
    let mut instance = T::default();
    refresh_instance(row, desc, &mut instance)?;
    Ok(instance)
}

/// Overwrite an instance's mapped fields with the values in `row`.
///
/// Fields the row does not cover keep their current value, and links whose
/// key did not change keep pointing at the same live target.
pub fn refresh_instance<T: Entity, R: RowSource + ?Sized>(
    row: &R,
    desc: &EntityDescriptor,
    instance: &mut T,
) -> Result<()> {
    with_link_scope(|| -> Result<()> {
        let base = object_of(serde_json::to_value(&*instance)?, desc)?;
        let mut overlay = base.clone();
        let mut nulls = Vec::new();

        for field in desc.mapped_fields() {
            let Some(value) = row.column_value(&field.column) else {
                tracing::warn!("{}: row has no column {}", desc.entity_name(), field.column);
                continue;
            };
            if value == Value::Null {
                nulls.push(field.name.as_str());
            }
            match column_to_json(value, field.field_type) {
                Ok(json) => {
                    overlay.insert(field.name.clone(), json);
                }
                Err(reason) => tracing::warn!(
                    "{}.{} left unset: {}",
                    desc.entity_name(),
                    field.name,
                    reason
                ),
            }
        }

        for relation in desc.relations() {
            match row.column_value(&relation.column) {
                Some(Value::Integer(key)) => {
                    overlay.insert(relation.field.clone(), Json::from(key));
                }
                Some(Value::Null) => {
                    overlay.insert(relation.field.clone(), Json::Null);
                }
                Some(other) => tracing::warn!(
                    "{}.{} left unset: foreign key {} holds {:?}",
                    desc.entity_name(),
                    relation.field,
                    relation.column,
                    other.data_type()
                ),
                None => {}
            }
        }

        let stored: T = match serde_json::from_value(Json::Object(overlay.clone())) {
            Ok(value) => value,
            Err(e) if !nulls.is_empty() => {
                // A NULL landed in a field that cannot hold one; keep those at their current value
                tracing::warn!("{}: {}; keeping current values for NULL columns", desc.entity_name(), e);
                for name in nulls {
                    if let Some(current) = base.get(name) {
                        overlay.insert(name.to_string(), current.clone());
                    }
                }
                serde_json::from_value(Json::Object(overlay))?
            }
            Err(e) => return Err(e.into()),
        };
        instance.refresh_from(stored);
        Ok(())
    })
}

/// Column/value pairs for an INSERT or UPDATE of `instance`.
///
/// Persistable fields in declaration order, then one foreign-key column per
/// relation. The primary key is not included.
pub fn to_column_values<T: Entity>(instance: &T, desc: &EntityDescriptor) -> Result<Vec<(String, Value)>> {
    let object = object_of(serde_json::to_value(instance)?, desc)?;
    let mut values = Vec::with_capacity(desc.fields().len() + desc.relations().len());

    for field in desc.fields() {
        desc.sql_type(field)?;
        let json = object.get(&field.name).unwrap_or(&Json::Null);
        let value = json_to_column(json, field.field_type).ok_or_else(|| Error::FieldMismatch {
            entity: desc.entity_name().to_string(),
            field: field.name.clone(),
            expected: field.field_type.to_string(),
        })?;
        values.push((field.column.clone(), value));
    }

    for relation in desc.relations() {
        let value = match object.get(&relation.field) {
            None | Some(Json::Null) => Value::Null,
            Some(json) => json.as_i64().map(Value::Integer).ok_or_else(|| Error::FieldMismatch {
                entity: desc.entity_name().to_string(),
                field: relation.field.clone(),
                expected: format!("link to {}", relation.target),
            })?,
        };
        values.push((relation.column.clone(), value));
    }

    Ok(values)
}

fn object_of(json: Json, desc: &EntityDescriptor) -> Result<Map<String, Json>> {
    match json {
        Json::Object(map) => Ok(map),
        other => Err(Error::Mapping(<serde_json::Error as serde::de::Error>::custom(format!(
            "{} must serialize to an object, got {}",
            desc.entity_name(),
            other
        )))),
    }
}

/// Convert one stored value into the JSON serde expects for `field_type`
fn column_to_json(value: Value, field_type: FieldType) -> std::result::Result<Json, String> {
    match (field_type, value) {
        (_, Value::Null) => Ok(Json::Null),
        (FieldType::Integer, Value::Integer(i)) => i32::try_from(i)
            .map(Json::from)
            .map_err(|_| format!("{} does not fit in a 32-bit integer", i)),
        (FieldType::Long, Value::Integer(i)) => Ok(Json::from(i)),
        (FieldType::Text, Value::Text(s)) => Ok(Json::String(s)),
        (FieldType::Date, Value::Text(s)) => NaiveDate::parse_from_str(&s, DATE_FORMAT)
            .map(|d| Json::String(d.format(DATE_FORMAT).to_string()))
            .map_err(|e| format!("{:?} is not a date: {}", s, e)),
        (FieldType::Other(name), _) => Err(format!("unsupported field type {}", name)),
        (expected, other) => Err(format!("expected {}, column holds {:?}", expected, other.data_type())),
    }
}

/// Convert a serialized field into a bindable value; `None` on type mismatch
fn json_to_column(json: &Json, field_type: FieldType) -> Option<Value> {
    match (field_type, json) {
        (_, Json::Null) => Some(Value::Null),
        (FieldType::Integer, Json::Number(n)) => n
            .as_i64()
            .filter(|i| i32::try_from(*i).is_ok())
            .map(Value::Integer),
        (FieldType::Long, Json::Number(n)) => n.as_i64().map(Value::Integer),
        (FieldType::Text, Json::String(s)) => Some(Value::Text(s.clone())),
        (FieldType::Date, Json::String(s)) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .ok()
            .map(|d| Value::Text(d.format(DATE_FORMAT).to_string())),
        _ => None,
    }
}
