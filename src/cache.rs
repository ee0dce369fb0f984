//! Identity Cache - one live instance per (type, primary key)
//!
//! The cache short-circuits reads and existence checks; it never stands in for
//! a write. Entries also carry a type-erased handle so the session can detach
//! cached instances whose concrete type it only knows by `TypeId`.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::entity::{Entity, Shared};

/// Type-erased view of a cached instance.
pub(crate) trait CachedEntity {
    /// Clear the primary key. Returns false if the instance is borrowed elsewhere.
    fn detach(&self) -> bool;
}

impl<T: Entity> CachedEntity for RefCell<T> {
    fn detach(&self) -> bool {
        match self.try_borrow_mut() {
            Ok(mut instance) => {
                instance.set_id(None);
                true
            }
            Err(_) => false,
        }
    }
}

struct CacheEntry {
    instance: Rc<dyn Any>,
    handle: Rc<dyn CachedEntity>,
}

/// First-level cache from (entity type, primary key) to the live instance.
#[derive(Default)]
pub struct IdentityCache {
    entries: HashMap<(TypeId, i64), CacheEntry>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached instance of `T` with this key
    pub fn get<T: Entity>(&self, key: i64) -> Option<Shared<T>> {
        let entry = self.entries.get(&(TypeId::of::<T>(), key))?;
        Rc::clone(&entry.instance).downcast::<RefCell<T>>().ok()
    }

    /// Cache `instance` under its current key.
    ///
    /// Returns false, and caches nothing, when the key is unset.
    pub fn put<T: Entity>(&mut self, instance: &Shared<T>) -> bool {
        let Some(key) = instance.borrow().id() else {
            tracing::warn!("Refusing to cache a {} without a primary key", T::NAME);
            return false;
        };

        let entry = CacheEntry {
            instance: Rc::clone(instance) as Rc<dyn Any>,
            handle: Rc::clone(instance) as Rc<dyn CachedEntity>,
        };
        if let Some(previous) = self.entries.insert((TypeId::of::<T>(), key), entry) {
            if !Rc::ptr_eq(&previous.instance, &(Rc::clone(instance) as Rc<dyn Any>)) {
                tracing::debug!("Replaced cached {} #{} with another instance", T::NAME, key);
            }
        }
        true
    }

    /// Drop the entry for `instance`'s current key
    pub fn remove<T: Entity>(&mut self, instance: &Shared<T>) -> bool {
        match instance.borrow().id() {
            Some(key) => self.evict::<T>(key),
            None => false,
        }
    }

    /// Drop the entry for `key`
    pub fn evict<T: Entity>(&mut self, key: i64) -> bool {
        self.entries.remove(&(TypeId::of::<T>(), key)).is_some()
    }

    pub(crate) fn evict_by_type(&mut self, type_id: TypeId, key: i64) -> Option<Rc<dyn CachedEntity>> {
        self.entries.remove(&(type_id, key)).map(|entry| entry.handle)
    }

    pub fn contains<T: Entity>(&self, key: i64) -> bool {
        self.entries.contains_key(&(TypeId::of::<T>(), key))
    }

    /// Number of cached instances of `T`
    pub fn count<T: Entity>(&self) -> usize {
        let ty = TypeId::of::<T>();
        self.entries.keys().filter(|(t, _)| *t == ty).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::shared;
    use crate::testing::{sample_date, Book, Publisher};

    fn saved_publisher(id: i64, name: &str) -> Shared<Publisher> {
        let publisher = shared(Publisher::new(name));
        publisher.borrow_mut().id = Some(id);
        publisher
    }

    #[test]
    fn test_put_and_get_return_same_instance() {
        let mut cache = IdentityCache::new();
        let publisher = saved_publisher(1, "Jakub");

        assert!(cache.put(&publisher));
        let cached = cache.get::<Publisher>(1).unwrap();
        assert!(Rc::ptr_eq(&cached, &publisher));
    }

    #[test]
    fn test_unset_key_is_not_cached() {
        let mut cache = IdentityCache::new();
        let publisher = shared(Publisher::new("pending"));

        assert!(!cache.put(&publisher));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_are_scoped_by_type() {
        let mut cache = IdentityCache::new();
        let publisher = saved_publisher(1, "Jakub");
        let book = shared(Book::new("whatever", sample_date()));
        book.borrow_mut().id = Some(1);

        cache.put(&publisher);
        cache.put(&book);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.count::<Publisher>(), 1);
        assert_eq!(cache.count::<Book>(), 1);
        assert!(cache.get::<Book>(1).is_some());
        assert!(cache.get::<Publisher>(2).is_none());
    }

    #[test]
    fn test_one_entry_per_key() {
        let mut cache = IdentityCache::new();
        cache.put(&saved_publisher(1, "first"));
        let second = saved_publisher(1, "second");
        cache.put(&second);

        assert_eq!(cache.count::<Publisher>(), 1);
        assert_eq!(cache.get::<Publisher>(1).unwrap().borrow().name, "second");
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = IdentityCache::new();
        let a = saved_publisher(1, "a");
        let b = saved_publisher(2, "b");
        cache.put(&a);
        cache.put(&b);

        assert!(cache.remove(&a));
        assert!(!cache.contains::<Publisher>(1));
        assert!(cache.contains::<Publisher>(2));

        cache.clear();
        assert_eq!(cache.count::<Publisher>(), 0);
    }

    #[test]
    fn test_detach_through_handle() {
        let mut cache = IdentityCache::new();
        let publisher = saved_publisher(5, "Jakub");
        cache.put(&publisher);

        assert!(cache.evict_by_type(TypeId::of::<Publisher>(), 6).is_none());
        let handle = cache.evict_by_type(TypeId::of::<Publisher>(), 5).unwrap();
        assert!(handle.detach());
        assert_eq!(publisher.borrow().id, None);
        assert!(cache.is_empty());
    }
}
