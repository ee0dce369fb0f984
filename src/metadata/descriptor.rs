//! Entity descriptors and the builder entities use to declare them

use std::any::TypeId;
use std::collections::HashSet;

use crate::entity::{Entity, EntityType};
use crate::{Error, Result};

/// Declared type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    Long,
    /// UTF-8 text
    Text,
    /// Calendar date, stored as `YYYY-MM-DD`
    Date,
    /// Any other Rust type; declarable, but it has no column type
    Other(&'static str),
}

impl FieldType {
    /// SQL column type for this field type, if it has one
    pub fn sql_type(&self) -> Option<&'static str> {
        match self {
            FieldType::Integer | FieldType::Long => Some("BIGINT"),
            FieldType::Text => Some("VARCHAR(255)"),
            FieldType::Date => Some("DATE"),
            FieldType::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Long => "long",
            FieldType::Text => "text",
            FieldType::Date => "date",
            FieldType::Other(name) => name,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar field and the column it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name as serde sees it
    pub name: String,
    /// Column name in the table
    pub column: String,
    pub field_type: FieldType,
}

/// A many-to-one link stored as a foreign-key column on the owning table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Field holding the `Link<Target>`
    pub field: String,
    /// Foreign-key column, `<target-name-lowercased>_id`
    pub column: String,
    pub target: EntityType,
}

/// A one-to-many collection. Metadata only: nothing is stored for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDescriptor {
    pub field: String,
    pub target: EntityType,
}

/// Everything the engine knows about one entity type.
///
/// Built once from [`Entity::describe`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    entity_type: EntityType,
    table: String,
    primary_key: FieldDescriptor,
    fields: Vec<FieldDescriptor>,
    relations: Vec<RelationDescriptor>,
    collections: Vec<CollectionDescriptor>,
}

impl EntityDescriptor {
    /// Describe `T` and validate the declaration
    pub fn build<T: Entity>() -> Result<Self> {
        let mut builder = EntityBuilder::new(EntityType::of::<T>());
        T::describe(&mut builder);
        builder.build()
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity_type.name()
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &FieldDescriptor {
        &self.primary_key
    }

    /// Persistable scalar fields in declaration order, without the primary key
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    pub fn collections(&self) -> &[CollectionDescriptor] {
        &self.collections
    }

    /// Primary key followed by the persistable fields: everything a row maps back into
    pub fn mapped_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        std::iter::once(&self.primary_key).chain(self.fields.iter())
    }

    /// The many-to-one relation pointing at `target`, if any
    pub fn relation_to(&self, target: TypeId) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.target.type_id() == target)
    }

    /// The one-to-many collection of `target`, if any
    pub fn collection_of(&self, target: TypeId) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|c| c.target.type_id() == target)
    }

    /// SQL column type of one of this entity's fields
    pub fn sql_type(&self, field: &FieldDescriptor) -> Result<&'static str> {
        field
            .field_type
            .sql_type()
            .ok_or_else(|| Error::UnsupportedFieldType {
                entity: self.entity_name().to_string(),
                field: field.name.clone(),
                field_type: field.field_type.to_string(),
            })
    }
}

/// Collects an entity's declaration. Validation happens in [`EntityBuilder::build`].
pub struct EntityBuilder {
    entity_type: EntityType,
    table: Option<String>,
    primary_keys: Vec<FieldDescriptor>,
    fields: Vec<FieldDescriptor>,
    relations: Vec<RelationDescriptor>,
    collections: Vec<CollectionDescriptor>,
}

impl EntityBuilder {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            table: None,
            primary_keys: vec![],
            fields: vec![],
            relations: vec![],
            collections: vec![],
        }
    }

    /// Table name; defaults to the lowercased entity name
    pub fn table(&mut self, name: &str) -> &mut Self {
        self.table = Some(name.to_string());
        self
    }

    /// Mark `field` as the generated primary key
    pub fn id(&mut self, field: &str) -> &mut Self {
        self.id_column(field, field)
    }

    pub fn id_column(&mut self, field: &str, column: &str) -> &mut Self {
        self.primary_keys.push(FieldDescriptor {
            name: field.to_string(),
            column: column.to_string(),
            field_type: FieldType::Long,
        });
        self
    }

    /// A scalar column named after the field
    pub fn column(&mut self, field: &str, field_type: FieldType) -> &mut Self {
        self.column_named(field, field, field_type)
    }

    /// A scalar column with an explicit column name
    pub fn column_named(&mut self, field: &str, column: &str, field_type: FieldType) -> &mut Self {
        self.fields.push(FieldDescriptor {
            name: field.to_string(),
            column: column.to_string(),
            field_type,
        });
        self
    }

    /// A many-to-one reference to another entity
    pub fn many_to_one<R: Entity>(&mut self, field: &str) -> &mut Self {
        self.relations.push(RelationDescriptor {
            field: field.to_string(),
            column: format!("{}_id", R::NAME.to_lowercase()),
            target: EntityType::of::<R>(),
        });
        self
    }

    /// A one-to-many collection of dependents
    pub fn one_to_many<D: Entity>(&mut self, field: &str) -> &mut Self {
        self.collections.push(CollectionDescriptor {
            field: field.to_string(),
            target: EntityType::of::<D>(),
        });
        self
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        let entity = self.entity_type.name().to_string();

        let mut primary_keys = self.primary_keys.into_iter();
        let primary_key = primary_keys
            .next()
            .ok_or_else(|| Error::MissingPrimaryKey { entity: entity.clone() })?;
        if primary_keys.next().is_some() {
            return Err(Error::DuplicatePrimaryKey { entity });
        }

        let table = self
            .table
            .unwrap_or_else(|| self.entity_type.name().to_lowercase());
        check_identifier(&table)?;

        let mut columns = HashSet::new();
        let all_columns = std::iter::once(&primary_key.column)
            .chain(self.fields.iter().map(|f| &f.column))
            .chain(self.relations.iter().map(|r| &r.column));
        for column in all_columns {
            check_identifier(column)?;
            if !columns.insert(column.to_lowercase()) {
                return Err(Error::DuplicateColumn {
                    entity: entity.clone(),
                    column: column.clone(),
                });
            }
        }

        Ok(EntityDescriptor {
            entity_type: self.entity_type,
            table,
            primary_key,
            fields: self.fields,
            relations: self.relations,
            collections: self.collections,
        })
    }
}

/// Table and column names are spliced into SQL text, so only plain identifiers are accepted
fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}
