//! Entity types - the application-facing side of the mapping
//!
//! An entity is a plain struct that serde can turn into a JSON object whose
//! keys are its field names. The struct declares its table layout once in
//! [`Entity::describe`]; everything else (DDL, statements, row mapping) is
//! derived from that declaration.
//!
//! Many-to-one fields are [`Link`]s. A link serializes as the referenced key,
//! so the row mapper sees a plain foreign-key value.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::metadata::{EntityBuilder, EntityDescriptor};
use crate::Result;

/// A live, shared instance. The identity cache hands out clones of the same
/// `Rc`, so two handles to one row compare equal with [`Rc::ptr_eq`].
pub type Shared<T> = Rc<RefCell<T>>;

/// Wrap an instance so it can be saved and cached
pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// A record type mapped to a table.
///
/// Relation fields hold a [`Link<Target>`]. One-to-many collections must
/// be `#[serde(skip)]`: they are declared for metadata only and are filled
/// explicitly through `Session::find_dependents`.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Publisher {
///     id: Option<i64>,
///     name: String,
/// }
///
/// impl Entity for Publisher {
///     const NAME: &'static str = "Publisher";
///
///     fn describe(b: &mut EntityBuilder) {
///         b.table("publishers").id("id").column("name", FieldType::Text);
///     }
///
///     fn id(&self) -> Option<i64> { self.id }
///     fn set_id(&mut self, id: Option<i64>) { self.id = id; }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Default + 'static {
    /// Simple type name, used for foreign-key columns (`publisher_id`) and messages
    const NAME: &'static str;

    /// Declare table name, columns, primary key and relations
    fn describe(builder: &mut EntityBuilder);

    /// Current primary-key value; `None` means the instance was never persisted
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: Option<i64>);

    /// Take over the state of a freshly mapped copy of this row.
    ///
    /// Override to keep fields the row does not hold, such as a loaded
    /// one-to-many collection.
    fn refresh_from(&mut self, stored: Self) {
        *self = stored;
    }
}

/// A handle naming an entity type without its generic parameter.
///
/// This is what a type scanner produces and what schema registration consumes.
#[derive(Clone, Copy)]
pub struct EntityType {
    type_id: TypeId,
    name: &'static str,
    build: fn() -> Result<EntityDescriptor>,
}

impl EntityType {
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::NAME,
            build: EntityDescriptor::build::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the type's `describe` and validate the result
    pub fn build_descriptor(&self) -> Result<EntityDescriptor> {
        (self.build)()
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityType").field(&self.name).finish()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

/// A many-to-one reference to another entity.
///
/// A link is either empty, unloaded (only the foreign key is known, as after a
/// load from storage) or loaded (it holds the live target instance).
pub struct Link<T: Entity> {
    fk: Option<i64>,
    target: Option<Shared<T>>,
}

impl<T: Entity> Link<T> {
    pub fn empty() -> Self {
        Self {
            fk: None,
            target: None,
        }
    }

    /// A loaded link to `target`
    pub fn to(target: &Shared<T>) -> Self {
        Self {
            fk: None,
            target: Some(Rc::clone(target)),
        }
    }

    /// An unloaded link that only knows the referenced key
    pub fn from_fk(fk: i64) -> Self {
        Self {
            fk: Some(fk),
            target: None,
        }
    }

    pub fn set(&mut self, target: &Shared<T>) {
        self.fk = None;
        self.target = Some(Rc::clone(target));
    }

    pub fn clear(&mut self) {
        self.fk = None;
        self.target = None;
    }

    /// The target instance, when loaded
    pub fn get(&self) -> Option<Shared<T>> {
        self.target.clone()
    }

    /// Referenced key: the live target's key when loaded, else the stored foreign key
    pub fn key(&self) -> Option<i64> {
        match &self.target {
            Some(target) => target.try_borrow().ok().and_then(|t| t.id()),
            None => self.fk,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.fk.is_none()
    }
}

impl<T: Entity> Default for Link<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Entity> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            fk: self.fk,
            target: self.target.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_loaded() {
            "loaded"
        } else if self.is_empty() {
            "empty"
        } else {
            "unloaded"
        };

        f.debug_struct("Link")
            .field("target", &T::NAME)
            .field("state", &state)
            .field("key", &self.key())
            .finish()
    }
}

thread_local! {
    /// Live link targets seen while serializing inside [`with_link_scope`]
    static LINK_SCOPE: RefCell<Option<LinkTargets>> = const { RefCell::new(None) };
}

/// Run `f` with a link scope active: links serialized inside `f` remember their
/// targets, and links deserialized inside `f` get those same targets back.
///
/// This lets an instance go through a serde round trip without its links being
/// replaced by copies.
pub(crate) fn with_link_scope<R>(f: impl FnOnce() -> R) -> R {
    let _restore = ScopeGuard {
        previous: LINK_SCOPE.with(|scope| scope.replace(Some(HashMap::new()))),
    };
    f()
}

type LinkTargets = HashMap<(TypeId, i64), Rc<dyn Any>>;

/// Puts the enclosing link scope back when `with_link_scope` returns or unwinds
struct ScopeGuard {
    previous: Option<LinkTargets>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        LINK_SCOPE.with(|scope| *scope.borrow_mut() = previous);
    }
}

impl<T: Entity> Serialize for Link<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let key = match &self.target {
            Some(target) => {
                let key = target
                    .try_borrow()
                    .map_err(|_| {
                        <S::Error as serde::ser::Error>::custom(format!("{} is mutably borrowed", T::NAME))
                    })?
                    .id();
                if let Some(key) = key {
                    let live: Rc<dyn Any> = target.clone();
                    LINK_SCOPE.with(|scope| {
                        if let Some(map) = scope.borrow_mut().as_mut() {
                            map.insert((TypeId::of::<T>(), key), live);
                        }
                    });
                }
                key
            }
            None => self.fk,
        };
        key.serialize(serializer)
    }
}

impl<'de, T: Entity> Deserialize<'de> for Link<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let Some(key) = Option::<i64>::deserialize(deserializer)? else {
            return Ok(Self::empty());
        };

        let live = LINK_SCOPE.with(|scope| {
            scope
                .borrow()
                .as_ref()
                .and_then(|map| map.get(&(TypeId::of::<T>(), key)).cloned())
        });

        Ok(match live.and_then(|any| any.downcast::<RefCell<T>>().ok()) {
            Some(target) => Self {
                fk: None,
                target: Some(target),
            },
            None => Self::from_fk(key),
        })
    }
}
