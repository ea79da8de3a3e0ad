//! Per-type and per-object mapping metadata.
//!
//! [`ClassInfo`] describes a mapped type once: its table, its ordered columns
//! and the primary key. [`ObjectInfo`] holds one [`Variable`] per column for a
//! single live object, all wired to one shared [`EventSystem`]. The object
//! owns its `ObjectInfo` through an [`ObjectInfoCell`], while the `ObjectInfo`
//! only observes the object through a weak reference.

use std::any::{Any, TypeId, type_name};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::OtherHasher;
use crate::compile::Expr;
use crate::error::{Result, SquallError};
use crate::event::EventSystem;
use crate::expr::{Column, Suffix, Table};
use crate::variable::{ContextAccessor, Variable};

/// A type whose instances are mapped to rows of a table.
///
/// `columns()` is called once per type; the returned declarations are kept by
/// the type's [`ClassInfo`] and identify the variables of every instance.
pub trait Mapped: Any {
    fn table() -> Table
    where
        Self: Sized;

    fn columns() -> Vec<Column>
    where
        Self: Sized;

    /// Explicit primary key column names. When absent the key is made of the
    /// columns declared with a non-zero primary position.
    fn primary() -> Option<Vec<&'static str>>
    where
        Self: Sized,
    {
        None
    }

    /// Default ordering as column names, `-name` meaning descending.
    fn order() -> Vec<&'static str>
    where
        Self: Sized,
    {
        Vec::new()
    }

    fn obj_info_cell(&self) -> &ObjectInfoCell;
}

// ------------- ClassInfo -------------
pub struct ClassInfo {
    type_name: &'static str,
    table: Table,
    columns: Vec<Column>,
    primary_key: Vec<Column>,
    primary_key_pos: Vec<usize>,
    default_order: Vec<Expr>,
}

impl ClassInfo {
    pub fn new(
        type_name: &'static str,
        table: Table,
        columns: Vec<Column>,
        primary: Option<Vec<&str>>,
        order: &[&str],
    ) -> Result<Self> {
        if table.name().is_empty() {
            return Err(SquallError::ClassInfo(format!("{} has no table name", type_name)));
        }
        let by_name = |name: &str| columns.iter().find(|c| c.name() == name).cloned();
        let primary_key = match primary {
            Some(names) => names
                .into_iter()
                .map(|name| {
                    by_name(name).ok_or_else(|| {
                        SquallError::ClassInfo(format!("{} has no column named {}", type_name, name))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => {
                let mut positions: HashMap<u32, &Column, OtherHasher> = HashMap::default();
                for column in columns.iter().filter(|c| c.primary() != 0) {
                    if let Some(other) = positions.insert(column.primary(), column) {
                        return Err(SquallError::ClassInfo(format!(
                            "{} has two columns with the same primary id: {} and {}",
                            type_name,
                            column.name(),
                            other.name()
                        )));
                    }
                }
                let mut primary: Vec<&Column> = positions.into_values().collect();
                primary.sort_by_key(|c| c.primary());
                primary.into_iter().cloned().collect()
            }
        };
        if primary_key.is_empty() {
            return Err(SquallError::ClassInfo(format!(
                "{} has no primary key information",
                type_name
            )));
        }
        let primary_key_pos = primary_key
            .iter()
            .map(|key| columns.iter().position(|c| c == key).unwrap_or_default())
            .collect();
        let mut default_order = Vec::with_capacity(order.len());
        for item in order {
            let (name, descending) = match item.strip_prefix('-') {
                Some(name) => (name, true),
                None => (*item, false),
            };
            let column = by_name(name).ok_or_else(|| {
                SquallError::ClassInfo(format!("{} can't be ordered by unknown column {}", type_name, name))
            })?;
            default_order.push(if descending {
                Expr::from(Suffix::desc(column))
            } else {
                Expr::from(column)
            });
        }
        Ok(Self { type_name, table, columns, primary_key, primary_key_pos, default_order })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    pub fn table(&self) -> &Table {
        &self.table
    }
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }
    pub fn primary_key(&self) -> &[Column] {
        &self.primary_key
    }
    /// Position of every primary key column within [`Self::columns`].
    pub fn primary_key_pos(&self) -> &[usize] {
        &self.primary_key_pos
    }
    pub fn default_order(&self) -> &[Expr] {
        &self.default_order
    }
}

impl PartialEq for ClassInfo {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("type", &self.type_name)
            .field("table", &self.table.name())
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}

thread_local! {
    static CLASS_INFOS: RefCell<HashMap<TypeId, Rc<ClassInfo>, OtherHasher>> =
        RefCell::new(HashMap::default());
}

/// The memoized [`ClassInfo`] of `T`.
pub fn get_cls_info<T: Mapped>() -> Result<Rc<ClassInfo>> {
    let id = TypeId::of::<T>();
    if let Some(info) = CLASS_INFOS.with(|infos| infos.borrow().get(&id).cloned()) {
        return Ok(info);
    }
    let order = T::order();
    let info = Rc::new(ClassInfo::new(
        type_name::<T>(),
        T::table(),
        T::columns(),
        T::primary(),
        &order,
    )?);
    debug!(type_name = info.type_name, columns = info.columns.len(), "class info created");
    Ok(CLASS_INFOS.with(|infos| Rc::clone(infos.borrow_mut().entry(id).or_insert(info))))
}

// ------------- ObjectInfo -------------
struct ObjectInfoInner {
    cls_info: Rc<ClassInfo>,
    variables: Vec<(Column, Variable)>,
    positions: HashMap<Column, usize, OtherHasher>,
    primary_vars: Vec<Variable>,
    obj: RefCell<Weak<dyn Any>>,
    deleted: Cell<bool>,
    event: Rc<EventSystem>,
}

impl ObjectInfoInner {
    fn obj(&self) -> Option<Rc<dyn Any>> {
        self.obj.borrow().upgrade()
    }
}

/// Variables and identity of one mapped object. Clones are handles to the
/// same info; equality and hashing are by identity.
#[derive(Clone)]
pub struct ObjectInfo(Rc<ObjectInfoInner>);

impl ObjectInfo {
    pub fn new<T: Mapped>(obj: &Rc<T>) -> Result<Self> {
        let cls_info = get_cls_info::<T>()?;
        let obj: Weak<dyn Any> = Rc::downgrade(obj) as Weak<dyn Any>;
        let mut failure = None;
        let inner = Rc::new_cyclic(|me: &Weak<ObjectInfoInner>| {
            let owner: Weak<dyn Any> = me.clone();
            let event = Rc::new(EventSystem::new(owner));
            let me = me.clone();
            let context: ContextAccessor = Rc::new(move || me.upgrade().and_then(|info| info.obj()));
            let mut variables = Vec::with_capacity(cls_info.columns().len());
            for column in cls_info.columns() {
                match column.factory().build(column, Some(Rc::clone(&event)), Some(Rc::clone(&context))) {
                    Ok(variable) => variables.push((column.clone(), variable)),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            let positions = variables.iter().enumerate().map(|(i, (c, _))| (c.clone(), i)).collect();
            let primary_vars = cls_info
                .primary_key_pos()
                .iter()
                .filter_map(|pos| variables.get(*pos).map(|(_, v)| v.clone()))
                .collect();
            ObjectInfoInner {
                cls_info: Rc::clone(&cls_info),
                variables,
                positions,
                primary_vars,
                obj: RefCell::new(obj),
                deleted: Cell::new(false),
                event,
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        debug!(type_name = inner.cls_info.type_name(), "object info created");
        Ok(Self(inner))
    }

    /// The info owning an event system, as handed to hook callbacks.
    pub fn from_owner(owner: &Rc<dyn Any>) -> Option<Self> {
        Rc::clone(owner).downcast::<ObjectInfoInner>().ok().map(Self)
    }

    pub fn cls_info(&self) -> &Rc<ClassInfo> {
        &self.0.cls_info
    }
    pub fn event(&self) -> &Rc<EventSystem> {
        &self.0.event
    }
    /// `(column, variable)` pairs in column declaration order.
    pub fn variables(&self) -> &[(Column, Variable)] {
        &self.0.variables
    }
    pub fn variable(&self, column: &Column) -> Option<&Variable> {
        self.0.positions.get(column).map(|i| &self.0.variables[*i].1)
    }
    /// Variables of the primary key columns, in key order.
    pub fn primary_vars(&self) -> &[Variable] {
        &self.0.primary_vars
    }

    pub fn get_obj(&self) -> Option<Rc<dyn Any>> {
        self.0.obj()
    }
    pub fn get_obj_as<T: Any>(&self) -> Option<Rc<T>> {
        self.get_obj().and_then(|obj| obj.downcast::<T>().ok())
    }
    pub fn set_obj<T: Mapped>(&self, obj: &Rc<T>) {
        *self.0.obj.borrow_mut() = Rc::downgrade(obj) as Weak<dyn Any>;
        self.0.deleted.set(false);
    }

    pub fn checkpoint(&self) {
        for (_, variable) in &self.0.variables {
            variable.checkpoint();
        }
    }

    pub fn has_changed(&self) -> bool {
        self.0.variables.iter().any(|(_, v)| v.has_changed())
    }

    pub fn emit_object_deleted(&self) -> Result<()> {
        self.0.event.emit("object-deleted", &[])
    }

    /// Emits `"object-deleted"` once the observed object is gone, at most
    /// once per observed object.
    fn notify_if_dropped(&self) -> Result<()> {
        if self.0.obj.borrow().strong_count() > 0 || self.0.deleted.replace(true) {
            return Ok(());
        }
        self.emit_object_deleted()
    }

    pub fn ptr_eq(&self, other: &ObjectInfo) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectInfo {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl Eq for ObjectInfo {}

impl Hash for ObjectInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.0), state)
    }
}

impl fmt::Debug for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectInfo")
            .field("type", &self.0.cls_info.type_name())
            .field("alive", &(self.0.obj.borrow().strong_count() > 0))
            .field("variables", &self.0.variables.iter().map(|(_, v)| v).collect::<Vec<_>>())
            .finish()
    }
}

/// Attachment slot of a mapped object. Dropping it, which happens when the
/// object itself is dropped, emits `"object-deleted"` on every info it holds
/// whose observed object is gone. Infos replaced by [`set_obj_info`] while
/// still observing this object are kept until then.
#[derive(Default)]
pub struct ObjectInfoCell {
    current: RefCell<Option<ObjectInfo>>,
    replaced: RefCell<Vec<ObjectInfo>>,
}

impl ObjectInfoCell {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self) -> Option<ObjectInfo> {
        self.current.borrow().clone()
    }
}

impl Drop for ObjectInfoCell {
    fn drop(&mut self) {
        let held = self.current.get_mut().take().into_iter().chain(self.replaced.get_mut().drain(..));
        for info in held.collect::<Vec<_>>() {
            if let Err(e) = info.notify_if_dropped() {
                warn!(type_name = info.cls_info().type_name(), error = %e, "object-deleted hook failed");
            }
        }
    }
}

impl fmt::Debug for ObjectInfoCell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectInfoCell({})", if self.current.borrow().is_some() { "attached" } else { "empty" })
    }
}

/// The info attached to `obj`, creating and attaching it on first use.
pub fn get_obj_info<T: Mapped>(obj: &Rc<T>) -> Result<ObjectInfo> {
    if let Some(info) = obj.obj_info_cell().get() {
        return Ok(info);
    }
    let info = ObjectInfo::new(obj)?;
    let mut slot = obj.obj_info_cell().current.borrow_mut();
    Ok(slot.get_or_insert(info).clone())
}

/// Replaces the info attached to `obj`.
pub fn set_obj_info<T: Mapped>(obj: &Rc<T>, info: ObjectInfo) {
    let cell = obj.obj_info_cell();
    let previous = cell.current.borrow_mut().replace(info.clone());
    if let Some(previous) = previous {
        let observed = previous.get_obj().is_some_and(|o| std::ptr::addr_eq(Rc::as_ptr(&o), Rc::as_ptr(obj)));
        if observed && !previous.ptr_eq(&info) {
            cell.replaced.borrow_mut().push(previous);
        }
    }
}
