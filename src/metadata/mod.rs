//! Metadata Accessor - structural questions about entity types
//!
//! Descriptors are built on first use and kept in an arena keyed by type
//! identity. Nothing here touches the database.

pub mod descriptor;

pub use descriptor::{
    CollectionDescriptor, EntityBuilder, EntityDescriptor, FieldDescriptor, FieldType,
    RelationDescriptor,
};

use std::any::TypeId;
use std::collections::HashMap;
use std::rc::Rc;

use crate::entity::{Entity, EntityType};
use crate::{Error, Result};

/// Arena of entity descriptors, one per type.
#[derive(Debug, Default)]
pub struct Metadata {
    descriptors: HashMap<TypeId, Rc<EntityDescriptor>>,
    /// Lowercased table name -> entity name, to keep table names unique
    tables: HashMap<String, &'static str>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for `ty`, building and validating it on first request
    pub fn descriptor(&mut self, ty: EntityType) -> Result<Rc<EntityDescriptor>> {
        if let Some(desc) = self.descriptors.get(&ty.type_id()) {
            return Ok(Rc::clone(desc));
        }

        let desc = ty.build_descriptor()?;
        let table_key = desc.table_name().to_lowercase();
        if let Some(existing) = self.tables.get(&table_key) {
            return Err(Error::DuplicateTable {
                table: desc.table_name().to_string(),
                existing: existing.to_string(),
                entity: ty.name().to_string(),
            });
        }

        tracing::debug!("Built descriptor for {} (table {})", ty, desc.table_name());
        let desc = Rc::new(desc);
        self.tables.insert(table_key, ty.name());
        self.descriptors.insert(ty.type_id(), Rc::clone(&desc));
        Ok(desc)
    }

    pub fn descriptor_of<T: Entity>(&mut self) -> Result<Rc<EntityDescriptor>> {
        self.descriptor(EntityType::of::<T>())
    }

    /// Descriptor of an already-built type, without building
    pub fn get(&self, type_id: TypeId) -> Option<Rc<EntityDescriptor>> {
        self.descriptors.get(&type_id).cloned()
    }

    pub fn table_name(&mut self, ty: EntityType) -> Result<String> {
        Ok(self.descriptor(ty)?.table_name().to_string())
    }

    pub fn primary_key_field(&mut self, ty: EntityType) -> Result<FieldDescriptor> {
        Ok(self.descriptor(ty)?.primary_key().clone())
    }

    /// Scalar fields in declaration order, excluding the primary key and relations
    pub fn persistable_fields(&mut self, ty: EntityType) -> Result<Vec<FieldDescriptor>> {
        Ok(self.descriptor(ty)?.fields().to_vec())
    }

    /// Many-to-one fields, each naming the entity type it references
    pub fn relation_fields(&mut self, ty: EntityType) -> Result<Vec<RelationDescriptor>> {
        Ok(self.descriptor(ty)?.relations().to_vec())
    }

    pub fn collection_fields(&mut self, ty: EntityType) -> Result<Vec<CollectionDescriptor>> {
        Ok(self.descriptor(ty)?.collections().to_vec())
    }

    pub fn sql_type(&mut self, ty: EntityType, field: &FieldDescriptor) -> Result<&'static str> {
        self.descriptor(ty)?.sql_type(field)
    }

    /// Built descriptors holding a many-to-one relation to `target`
    pub fn dependents_of(&self, target: TypeId) -> Vec<(Rc<EntityDescriptor>, RelationDescriptor)> {
        self.descriptors
            .values()
            .filter_map(|desc| {
                desc.relation_to(target)
                    .map(|rel| (Rc::clone(desc), rel.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Book, Publisher};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Imprint {
        id: Option<i64>,
        ratio: f64,
    }

    impl Entity for Imprint {
        const NAME: &'static str = "Imprint";

        fn describe(b: &mut EntityBuilder) {
            b.table("PUBLISHERS").id("id").column("ratio", FieldType::Other("f64"));
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: Option<i64>) {
            self.id = id;
        }
    }

    #[test]
    fn test_descriptor_is_built_once() {
        let mut metadata = Metadata::new();
        let a = metadata.descriptor_of::<Publisher>().unwrap();
        let b = metadata.descriptor_of::<Publisher>().unwrap();

        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn test_accessors() {
        let mut metadata = Metadata::new();
        let book = EntityType::of::<Book>();

        assert_eq!(metadata.table_name(book).unwrap(), "books");
        assert_eq!(metadata.primary_key_field(book).unwrap().name, "id");
        assert_eq!(metadata.persistable_fields(book).unwrap().len(), 2);
        assert_eq!(metadata.relation_fields(book).unwrap().len(), 1);
        assert!(metadata.collection_fields(book).unwrap().is_empty());

        let publisher = EntityType::of::<Publisher>();
        let collections = metadata.collection_fields(publisher).unwrap();
        assert_eq!(collections[0].target, book);
    }

    #[test]
    fn test_table_names_are_unique() {
        let mut metadata = Metadata::new();
        metadata.descriptor_of::<Publisher>().unwrap();

        let err = metadata.descriptor_of::<Imprint>().unwrap_err();
        assert!(matches!(err, Error::DuplicateTable { .. }));
    }

    #[test]
    fn test_unsupported_field_type() {
        let desc = EntityDescriptor::build::<Imprint>().unwrap();
        let err = desc.sql_type(&desc.fields()[0]).unwrap_err();

        assert!(matches!(err, Error::UnsupportedFieldType { .. }));
        assert!(err.to_string().contains("Imprint.ratio"));
    }

    #[test]
    fn test_dependents_of() {
        let mut metadata = Metadata::new();
        metadata.descriptor_of::<Publisher>().unwrap();
        metadata.descriptor_of::<Book>().unwrap();

        let deps = metadata.dependents_of(TypeId::of::<Publisher>());
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0.table_name(), "books");
        assert_eq!(deps[0].1.field, "publisher");

        assert!(metadata.dependents_of(TypeId::of::<Book>()).is_empty());
    }
}
