use std::marker::PhantomData;
use std::rc::Rc;

use rusqlite::Rows;

use super::Session;
use crate::entity::{Entity, Shared};
use crate::mapper::OwnedRow;
use crate::metadata::EntityDescriptor;
use crate::Result;

/// Cursor over a table, handed out by [`Session::find_all_as_iterable`].
///
/// [`EntityCursor::has_next`] fetches at most one row ahead and keeps it
/// unmapped until [`Iterator::next`] asks for it, so probing never consumes
/// a row. Once closed or exhausted the cursor yields nothing more.
pub struct EntityCursor<'s, T: Entity> {
    session: &'s Session,
    desc: Rc<EntityDescriptor>,
    columns: Vec<String>,
    rows: Option<Rows<'s>>,
    /// Row (or fetch error) read ahead by `has_next`
    pending: Option<Result<OwnedRow>>,
    yielded: usize,
    _entity: PhantomData<fn() -> T>,
}

impl<'s, T: Entity> EntityCursor<'s, T> {
    pub(super) fn new(session: &'s Session, desc: Rc<EntityDescriptor>, columns: Vec<String>, rows: Rows<'s>) -> Self {
        Self {
            session,
            desc,
            columns,
            rows: Some(rows),
            pending: None,
            yielded: 0,
            _entity: PhantomData,
        }
    }

    /// Whether another element is available. Repeated calls read at most one row.
    pub fn has_next(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        let Some(rows) = self.rows.as_mut() else {
            return false;
        };

        let fetched: Option<Result<OwnedRow>> = match rows.next() {
            Ok(Some(row)) => Some(OwnedRow::from_row(row, &self.columns).map_err(Into::into)),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        };
        match fetched {
            Some(row) => {
                self.pending = Some(row);
                true
            }
            None => {
                self.close();
                false
            }
        }
    }

    /// Release the underlying statement cursor. Idempotent.
    pub fn close(&mut self) {
        if self.rows.take().is_some() {
            tracing::debug!(
                "Closed {} cursor after {} rows",
                self.desc.entity_name(),
                self.yielded
            );
        }
        self.pending = None;
    }

    pub fn is_closed(&self) -> bool {
        self.rows.is_none() && self.pending.is_none()
    }

    /// Number of elements handed out so far
    pub fn yielded(&self) -> usize {
        self.yielded
    }
}

impl<T: Entity> Iterator for EntityCursor<'_, T> {
    type Item = Result<Shared<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }

        match self.pending.take()? {
            Ok(row) => {
                self.yielded += 1;
                Some(self.session.adopt::<T>(&row, &self.desc))
            }
            Err(e) => {
                tracing::error!("Reading {} rows failed: {}", self.desc.entity_name(), e);
                self.close();
                Some(Err(e))
            }
        }
    }
}
