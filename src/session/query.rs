//! Read path: lookups by key, whole-table reads and dependent loads
//!
//! Every read resolves rows through the identity cache, so a row already
//! known to the session comes back as its cached instance. Failures are
//! logged and returned; `Ok(None)` and empty vectors always mean "not found".

use std::any::TypeId;

use rusqlite::types::Value;

use super::{column_names, logged, EntityCursor, Session};
use crate::entity::{shared, Entity, Shared};
use crate::mapper::{self, OwnedRow, RowSource};
use crate::metadata::EntityDescriptor;
use crate::storage::statements;
use crate::{Error, Result};

impl Session {
    /// The instance of `T` stored under `key`, from the cache when possible
    pub fn find_by_id<T: Entity>(&self, key: i64) -> Result<Option<Shared<T>>> {
        if let Some(cached) = self.cache.borrow().get::<T>(key) {
            return Ok(Some(cached));
        }
        logged("find_by_id", T::NAME, self.load_by_id::<T>(key))
    }

    /// Every stored instance of `T`, in key order
    pub fn find_all<T: Entity>(&self) -> Result<Vec<Shared<T>>> {
        logged("find_all", T::NAME, self.load_all::<T>())
    }

    /// Lazy view over a [`Session::find_all`] result. Call again to restart.
    pub fn find_all_as_stream<T: Entity>(&self) -> Result<std::vec::IntoIter<Shared<T>>> {
        Ok(self.find_all::<T>()?.into_iter())
    }

    /// Walk every stored instance of `T` through a database cursor.
    ///
    /// Rows are mapped one at a time as `consume` advances the cursor. The
    /// cursor is closed when `consume` returns, whether or not it was drained.
    ///
    /// ```ignore
    /// let first_two = session.find_all_as_iterable::<Publisher, _>(|cursor| {
    ///     cursor.take(2).collect::<Result<Vec<_>>>()
    /// })??;
    /// ```
    pub fn find_all_as_iterable<T, R>(&self, consume: impl FnOnce(&mut EntityCursor<'_, T>) -> R) -> Result<R>
    where
        T: Entity,
    {
        let desc = logged("find_all_as_iterable", T::NAME, self.descriptor_of::<T>())?;
        let mut stmt = logged(
            "find_all_as_iterable",
            T::NAME,
            self.prepare(&statements::select_all(&desc)),
        )?;
        let columns = column_names(&stmt);
        let rows = logged(
            "find_all_as_iterable",
            T::NAME,
            stmt.query([]).map_err(Error::from),
        )?;

        let mut cursor = EntityCursor::new(self, desc, columns, rows);
        let out = consume(&mut cursor);
        cursor.close();
        Ok(out)
    }

    /// Load the `D` rows whose foreign key points at `parent`.
    ///
    /// `P` must declare a one-to-many collection of `D` and `D` a many-to-one
    /// link to `P`. Nothing is assigned onto `parent`; callers store the
    /// result in the collection field themselves.
    pub fn find_dependents<P: Entity, D: Entity>(&self, parent: &Shared<P>) -> Result<Vec<Shared<D>>> {
        let parent_desc = self.descriptor_of::<P>()?;
        if parent_desc.collection_of(TypeId::of::<D>()).is_none() {
            return Err(Error::MissingRelationship {
                entity: P::NAME.to_string(),
                target: D::NAME.to_string(),
            });
        }
        let desc = self.descriptor_of::<D>()?;
        let Some(relation) = desc.relation_to(TypeId::of::<P>()).cloned() else {
            return Err(Error::MissingRelationship {
                entity: D::NAME.to_string(),
                target: P::NAME.to_string(),
            });
        };

        let Some(key) = parent.borrow().id() else {
            return Ok(Vec::new());
        };
        let sql = statements::select_where(&desc, &relation.column);
        logged("find_dependents", D::NAME, self.load_many::<D>(&sql, &desc, Some(key)))
    }

    // ========== Loading ==========

    /// Fetch the row stored under `key`, bypassing the cache
    pub(super) fn load_row(&self, desc: &EntityDescriptor, key: i64) -> Result<Option<OwnedRow>> {
        let mut stmt = self.prepare(&statements::select_by_id(desc))?;
        let columns = column_names(&stmt);
        let mut rows = stmt.query([key])?;
        let row = match rows.next()? {
            Some(row) => Some(OwnedRow::from_row(row, &columns)?),
            None => None,
        };
        Ok(row)
    }

    fn load_by_id<T: Entity>(&self, key: i64) -> Result<Option<Shared<T>>> {
        let desc = self.descriptor_of::<T>()?;
        match self.load_row(&desc, key)? {
            Some(row) => Ok(Some(self.adopt::<T>(&row, &desc)?)),
            None => Ok(None),
        }
    }

    fn load_all<T: Entity>(&self) -> Result<Vec<Shared<T>>> {
        let desc = self.descriptor_of::<T>()?;
        self.load_many::<T>(&statements::select_all(&desc), &desc, None)
    }

    fn load_many<T: Entity>(&self, sql: &str, desc: &EntityDescriptor, param: Option<i64>) -> Result<Vec<Shared<T>>> {
        let mut stmt = self.prepare(sql)?;
        let columns = column_names(&stmt);
        let mut rows = match param {
            Some(value) => stmt.query([value])?,
            None => stmt.query([])?,
        };

        let mut instances = Vec::new();
        while let Some(row) = rows.next()? {
            let row = OwnedRow::from_row(row, &columns)?;
            instances.push(self.adopt::<T>(&row, desc)?);
        }
        Ok(instances)
    }

    /// Resolve a fetched row to its live instance.
    ///
    /// A row whose key is already cached yields the cached instance as is;
    /// otherwise the row is mapped and the new instance cached.
    pub(super) fn adopt<T: Entity>(&self, row: &OwnedRow, desc: &EntityDescriptor) -> Result<Shared<T>> {
        if let Some(Value::Integer(key)) = row.column_value(&desc.primary_key().column) {
            if let Some(cached) = self.cache.borrow().get::<T>(key) {
                return Ok(cached);
            }
        }

        let instance = shared(mapper::to_instance::<T, _>(row, desc)?);
        self.cache.borrow_mut().put(&instance);
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Link;
    use crate::testing::{library_session, sample_date, Book, Publisher};
    use std::rc::Rc;

    fn save_publishers(session: &Session, names: &[&str]) -> Vec<Shared<Publisher>> {
        names
            .iter()
            .map(|name| session.save(&shared(Publisher::new(name))).unwrap())
            .collect()
    }

    #[test]
    fn test_find_by_id_missing_row() {
        let session = library_session();
        assert!(session.find_by_id::<Publisher>(99).unwrap().is_none());
    }

    #[test]
    fn test_find_by_id_caches_loaded_row() {
        let session = library_session();
        let key = save_publishers(&session, &["Jakub"])[0].borrow().id.unwrap();
        session.clear_cache();

        let first = session.find_by_id::<Publisher>(key).unwrap().unwrap();
        let queries = session.stats().queries;
        let second = session.find_by_id::<Publisher>(key).unwrap().unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(session.stats().queries, queries);
    }

    #[test]
    fn test_find_all_returns_cached_instances() {
        let session = library_session();
        let saved = save_publishers(&session, &["a", "b", "c"]);

        let all = session.find_all::<Publisher>().unwrap();
        assert_eq!(all.len(), 3);
        for (found, original) in all.iter().zip(&saved) {
            assert!(Rc::ptr_eq(found, original));
        }
    }

    #[test]
    fn test_find_all_maps_uncached_rows() {
        let session = library_session();
        save_publishers(&session, &["a", "b"]);
        session.clear_cache();

        let names: Vec<String> = session
            .find_all::<Publisher>()
            .unwrap()
            .iter()
            .map(|p| p.borrow().name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(session.cache().count::<Publisher>(), 2);
    }

    #[test]
    fn test_find_all_as_stream_restarts() {
        let session = library_session();
        save_publishers(&session, &["a", "b"]);

        assert_eq!(session.find_all_as_stream::<Publisher>().unwrap().count(), 2);
        let first = session.find_all_as_stream::<Publisher>().unwrap().next().unwrap();
        assert_eq!(first.borrow().name, "a");
    }

    #[test]
    fn test_read_failure_is_an_error_not_empty() {
        let session = library_session();
        session.connection().execute("DROP TABLE books", []).unwrap();

        let err = session.find_all::<Book>().unwrap_err();
        assert!(err.is_storage());
        assert!(session.find_by_id::<Book>(1).unwrap_err().is_storage());
    }

    #[test]
    fn test_find_dependents() {
        let session = library_session();
        let publishers = save_publishers(&session, &["Jakub", "Other"]);
        for (title, publisher) in [("first", &publishers[0]), ("second", &publishers[0]), ("third", &publishers[1])] {
            let mut book = Book::new(title, sample_date());
            book.publisher = Link::to(publisher);
            session.save(&shared(book)).unwrap();
        }

        let books = session.find_dependents::<Publisher, Book>(&publishers[0]).unwrap();
        let titles: Vec<String> = books.iter().map(|b| b.borrow().title.clone()).collect();
        assert_eq!(titles, vec!["first", "second"]);

        publishers[0].borrow_mut().books = books;
        assert_eq!(publishers[0].borrow().books.len(), 2);
    }

    #[test]
    fn test_find_dependents_requires_both_sides() {
        let session = library_session();
        let book = shared(Book::new("whatever", sample_date()));

        let err = session.find_dependents::<Book, Publisher>(&book).unwrap_err();
        assert!(matches!(err, Error::MissingRelationship { .. }));
    }

    #[test]
    fn test_find_dependents_of_unsaved_parent_is_empty() {
        let session = library_session();
        let parent = shared(Publisher::new("pending"));
        let before = session.stats();

        assert!(session.find_dependents::<Publisher, Book>(&parent).unwrap().is_empty());
        assert_eq!(session.stats(), before);
    }
}
