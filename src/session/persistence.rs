//! Write path: save, merge, update, delete and the existence check

use std::rc::Rc;

use rusqlite::params_from_iter;
use rusqlite::types::Value;

use super::{Session, StatementKind};
use crate::entity::{Entity, EntityType, Shared};
use crate::linker::RelationshipLinker;
use crate::mapper;
use crate::storage::statements;
use crate::Result;

impl Session {
    /// Persist `instance`: UPDATE it if its row exists, INSERT it otherwise.
    ///
    /// An insert assigns the generated key onto the instance and caches it,
    /// so a later `find_by_id` returns this same `Rc`.
    pub fn save<T: Entity>(&self, instance: &Shared<T>) -> Result<Shared<T>> {
        if self.merge(instance)? {
            return Ok(Rc::clone(instance));
        }

        let desc = self.descriptor_of::<T>()?;
        let values = mapper::to_column_values(&*instance.borrow(), &desc)?;
        let columns: Vec<&str> = values.iter().map(|(column, _)| column.as_str()).collect();
        let sql = statements::insert(&desc, &columns);
        self.execute(
            StatementKind::Write,
            &sql,
            params_from_iter(values.iter().map(|(_, value)| value)),
        )?;

        let key = self.last_insert_id();
        instance.borrow_mut().set_id(Some(key));
        self.cache.borrow_mut().put(instance);
        tracing::debug!("Inserted {} #{}", T::NAME, key);
        Ok(Rc::clone(instance))
    }

    /// UPDATE the instance's row from its current field values.
    ///
    /// Returns false, without writing, when the key is unset or the row does
    /// not exist. On success the instance becomes the cached one for its key.
    pub fn merge<T: Entity>(&self, instance: &Shared<T>) -> Result<bool> {
        let Some(key) = instance.borrow().id() else {
            return Ok(false);
        };
        if !self.is_record_in_database(instance)? {
            return Ok(false);
        }

        let desc = self.descriptor_of::<T>()?;
        let values = mapper::to_column_values(&*instance.borrow(), &desc)?;
        let columns: Vec<&str> = values.iter().map(|(column, _)| column.as_str()).collect();
        let sql = statements::update(&desc, &columns);
        let mut params: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();
        params.push(Value::Integer(key));

        if self.execute(StatementKind::Write, &sql, params_from_iter(params))? == 0 {
            // Cached, but the row is gone
            self.cache.borrow_mut().evict::<T>(key);
            tracing::debug!("{} #{} vanished; evicted from cache", T::NAME, key);
            return Ok(false);
        }

        self.cache.borrow_mut().put(instance);
        tracing::debug!("Updated {} #{}", T::NAME, key);
        Ok(true)
    }

    /// Reload the instance's row and overwrite its mapped fields.
    ///
    /// This is a refresh, not a flush: unsaved edits are discarded, and the
    /// stored values win. The reload bypasses the cache and lands on the
    /// cached instance for the key (the passed one when nothing is cached), so
    /// every holder of that instance sees the stored state. Links whose key
    /// did not change keep their live target. When the key is unset the
    /// instance comes back untouched; when the row no longer exists the stale
    /// cache entry is dropped and the instance comes back untouched.
    pub fn update<T: Entity>(&self, instance: &Shared<T>) -> Result<Shared<T>> {
        let Some(key) = instance.borrow().id() else {
            return Ok(Rc::clone(instance));
        };

        let desc = self.descriptor_of::<T>()?;
        let Some(row) = self.load_row(&desc, key)? else {
            if self.cache.borrow_mut().evict::<T>(key) {
                tracing::debug!("{} #{} no longer stored; evicted from cache", T::NAME, key);
            }
            return Ok(Rc::clone(instance));
        };

        let cached = self.cache.borrow().get::<T>(key);
        let canonical = match cached {
            Some(cached) => cached,
            None => {
                self.cache.borrow_mut().put(instance);
                Rc::clone(instance)
            }
        };

        mapper::refresh_instance(&row, &desc, &mut *canonical.borrow_mut())?;
        if !Rc::ptr_eq(&canonical, instance) {
            mapper::refresh_instance(&row, &desc, &mut *instance.borrow_mut())?;
        }
        tracing::debug!("Refreshed {} #{} from storage", T::NAME, key);
        Ok(canonical)
    }

    /// DELETE the instance's row and clear its key.
    ///
    /// The database cascades the delete to dependent rows. Those rows are
    /// looked up in storage before the DELETE runs, and their cached
    /// instances are evicted and get their keys cleared. Returns whether a
    /// row was removed.
    pub fn delete<T: Entity>(&self, instance: &Shared<T>) -> Result<bool> {
        let Some(key) = instance.borrow().id() else {
            return Ok(false);
        };
        if !self.is_record_in_database(instance)? {
            return Ok(false);
        }

        let mut cascaded = Vec::new();
        if self.cascade {
            self.cascaded_rows(EntityType::of::<T>(), key, &mut cascaded)?;
        }

        let desc = self.descriptor_of::<T>()?;
        let removed = self.execute(StatementKind::Write, &statements::delete_by_id(&desc), [key])?;
        self.cache.borrow_mut().evict::<T>(key);
        if removed == 0 {
            return Ok(false);
        }

        self.detach_cascaded(&cascaded);
        instance.borrow_mut().set_id(None);
        tracing::debug!("Deleted {} #{} ({} cascaded rows)", T::NAME, key, cascaded.len());
        Ok(true)
    }

    /// Whether the instance's row exists: the cache answers first, storage second.
    /// An unset key is never in the database and costs no query.
    pub fn is_record_in_database<T: Entity>(&self, instance: &Shared<T>) -> Result<bool> {
        let Some(key) = instance.borrow().id() else {
            return Ok(false);
        };
        if self.cache.borrow().contains::<T>(key) {
            return Ok(true);
        }

        let desc = self.descriptor_of::<T>()?;
        Ok(self.query_scalar(&statements::count_by_id(&desc), [key])? > 0)
    }

    /// Stored rows the database removes along with `target` #`key`: dependents
    /// whose foreign key column holds the key, then their own dependents.
    /// Relations without a foreign key in storage do not cascade and are skipped.
    fn cascaded_rows(&self, target: EntityType, key: i64, out: &mut Vec<CascadedRow>) -> Result<()> {
        let dependents = self.metadata.borrow().dependents_of(target.type_id());
        for (desc, relation) in dependents {
            let dependent_type = desc.entity_type();
            if !RelationshipLinker::new(self).does_relationship_exist(dependent_type, target)? {
                continue;
            }

            let mut stmt = self.prepare(&statements::select_keys_where(&desc, &relation.column))?;
            let keys = stmt
                .query_map([key], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            for dependent_key in keys {
                let row = CascadedRow {
                    entity: dependent_type,
                    key: dependent_key,
                };
                if out.contains(&row) {
                    continue;
                }
                out.push(row);
                self.cascaded_rows(dependent_type, dependent_key, out)?;
            }
        }
        Ok(())
    }

    fn detach_cascaded(&self, rows: &[CascadedRow]) {
        for row in rows {
            let evicted = self.cache.borrow_mut().evict_by_type(row.entity.type_id(), row.key);
            let Some(handle) = evicted else {
                continue;
            };
            if handle.detach() {
                tracing::debug!("Detached cascaded {} #{}", row.entity.name(), row.key);
            } else {
                tracing::warn!(
                    "Cascaded {} #{} is borrowed; its key was left set",
                    row.entity.name(),
                    row.key
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CascadedRow {
    entity: EntityType,
    key: i64,
}
