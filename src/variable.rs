//! Typed mutable value cells.
//!
//! A [`Variable`] bridges one mapped attribute and its storage representation.
//! It keeps an internal value (undefined, null or a [`Value`]), an optional
//! pending [`LazyValue`], and a checkpoint snapshot used for dirty tracking.
//! Conversions between the external and internal forms are delegated to its
//! [`VariableKind`].
//!
//! When attached to an [`EventSystem`] a variable emits:
//! * `"changed"` with `(variable, old, new, from_db)` whenever its value
//!   changes, or a lazy value is assigned or replaced;
//! * `"resolve-lazy-value"` with `(variable, lazy)` when read while a lazy
//!   value is pending. Listeners are expected to call [`Variable::set`] on
//!   the same variable before the read continues.
//!
//! Variables are shared handles: cloning one yields another handle to the
//! same cell, and equality is identity.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::compile::Expr;
use crate::datatype::{AnyKind, Value, VariableKind};
use crate::error::{Result, SquallError};
use crate::event::{EventArg, EventSystem};
use crate::expr::Column;

/// Internal value of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Undefined,
    Null,
    Value(Value),
}

impl Slot {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Slot::Undefined)
    }
    pub fn value(&self) -> Option<&Value> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Placeholder meaning "compute this value via an external resolver on next read".
#[derive(Debug, Clone)]
pub enum LazyValue {
    /// Reload the value from storage.
    AutoReload,
    /// Evaluate the expression in storage.
    Expr(Expr),
}

impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LazyValue::AutoReload, LazyValue::AutoReload) => true,
            (LazyValue::Expr(a), LazyValue::Expr(b)) => a.same(b),
            _ => false,
        }
    }
}

/// Anything that can be handed to [`Variable::set`].
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Lazy(LazyValue),
    Null,
    Value(Value),
}

impl From<Value> for Assignment {
    fn from(v: Value) -> Self { Assignment::Value(v) }
}
impl From<LazyValue> for Assignment {
    fn from(v: LazyValue) -> Self { Assignment::Lazy(v) }
}
impl From<Option<Value>> for Assignment {
    fn from(v: Option<Value>) -> Self {
        v.map_or(Assignment::Null, Assignment::Value)
    }
}
macro_rules! assignment_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Assignment {
            fn from(v: $t) -> Self { Assignment::Value(Value::from(v)) }
        })*
    };
}
assignment_from!(bool, i32, i64, f64, &str, String);

/// The `(lazy_value, value)` pair compared by dirty tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableState {
    pub lazy_value: Option<LazyValue>,
    pub value: Slot,
}

impl Default for VariableState {
    fn default() -> Self {
        Self { lazy_value: None, value: Slot::Undefined }
    }
}

pub type ValidatorFn = Rc<dyn Fn(Option<Rc<dyn Any>>, &str, Option<Value>) -> Result<Option<Value>>>;
pub type ContextAccessor = Rc<dyn Fn() -> Option<Rc<dyn Any>>>;

/// Validation hook called as `func(context, attribute, value)` for every
/// assignment that doesn't come from the database. The returned value
/// replaces the assigned one; an error aborts the assignment.
#[derive(Clone)]
pub struct Validator {
    func: ValidatorFn,
    attribute: String,
    context: Option<ContextAccessor>,
}

impl Validator {
    pub fn new(func: ValidatorFn, attribute: &str) -> Self {
        Self { func, attribute: attribute.to_owned(), context: None }
    }
    pub fn with_context(mut self, context: ContextAccessor) -> Self {
        self.context = Some(context);
        self
    }
    pub fn attribute(&self) -> &str {
        &self.attribute
    }
    fn validate(&self, value: Option<Value>) -> Result<Option<Value>> {
        let context = self.context.as_ref().and_then(|accessor| accessor());
        (self.func)(context, &self.attribute, value)
    }
}

struct VariableInner {
    kind: Rc<dyn VariableKind>,
    allow_none: bool,
    column: Option<Column>,
    event: Option<Rc<EventSystem>>,
    validator: Option<Validator>,
    state: RefCell<VariableState>,
    checkpoint: RefCell<Option<VariableState>>,
}

#[derive(Clone)]
pub struct Variable(Rc<VariableInner>);

impl Variable {
    pub fn new(kind: Rc<dyn VariableKind>) -> Self {
        VariableBuilder::new(kind).into_variable(VariableState::default())
    }
    pub fn with_value(kind: Rc<dyn VariableKind>, value: impl Into<Assignment>) -> Result<Self> {
        VariableBuilder::new(kind).value(value, false).build()
    }
    pub fn builder(kind: Rc<dyn VariableKind>) -> VariableBuilder {
        VariableBuilder::new(kind)
    }
    pub fn any() -> Self {
        Self::new(Rc::new(AnyKind))
    }

    pub fn kind(&self) -> &Rc<dyn VariableKind> {
        &self.0.kind
    }
    pub fn column(&self) -> Option<&Column> {
        self.0.column.as_ref()
    }
    pub fn event(&self) -> Option<&Rc<EventSystem>> {
        self.0.event.as_ref()
    }
    pub fn allow_none(&self) -> bool {
        self.0.allow_none
    }

    /// The pending lazy value, without resolving it.
    pub fn get_lazy(&self) -> Option<LazyValue> {
        self.0.state.borrow().lazy_value.clone()
    }

    /// Reads the external value, resolving a pending lazy value first.
    ///
    /// Returns `default` when no value has been set and `None` for null.
    pub fn get(&self, default: Option<Value>, to_db: bool) -> Result<Option<Value>> {
        let lazy = self.0.state.borrow().lazy_value.clone();
        if let (Some(lazy), Some(event)) = (lazy, &self.0.event) {
            // a listener may call set() on this very variable
            event.emit(
                "resolve-lazy-value",
                &[EventArg::Variable(self.clone()), EventArg::Lazy(lazy)],
            )?;
        }
        let state = self.0.state.borrow();
        match &state.value {
            Slot::Undefined => Ok(default),
            Slot::Null => Ok(None),
            Slot::Value(v) => self.0.kind.parse_get(v, to_db).map(Some),
        }
    }

    /// Shorthand for `get(None, false)`.
    pub fn value(&self) -> Result<Option<Value>> {
        self.get(None, false)
    }

    pub fn set(&self, value: impl Into<Assignment>, from_db: bool) -> Result<()> {
        let inner = &*self.0;
        let (new_value, payload, lazy_cleared) = match value.into() {
            Assignment::Lazy(lazy) => {
                *inner.checkpoint.borrow_mut() = None;
                inner.state.borrow_mut().lazy_value = Some(lazy.clone());
                (Slot::Undefined, EventArg::Lazy(lazy), false)
            }
            assigned => {
                let mut value = match assigned {
                    Assignment::Value(v) => Some(v),
                    _ => None,
                };
                if !from_db {
                    if let Some(validator) = &inner.validator {
                        value = validator.validate(value)?;
                    }
                }
                let lazy_cleared = inner.state.borrow_mut().lazy_value.take().is_some();
                match value {
                    None => {
                        if !inner.allow_none {
                            return Err(SquallError::NullNotAllowed {
                                column: inner.column.as_ref().map(Column::qualified_name),
                            });
                        }
                        (Slot::Null, EventArg::Slot(Slot::Null), lazy_cleared)
                    }
                    Some(v) if from_db => {
                        let internal = inner.kind.parse_set(v, true)?;
                        // the payload must match what a later get() returns
                        let external = inner.kind.parse_get(&internal, false)?;
                        (Slot::Value(internal), EventArg::Slot(Slot::Value(external)), lazy_cleared)
                    }
                    Some(v) => {
                        let internal = inner.kind.parse_set(v.clone(), false)?;
                        (Slot::Value(internal), EventArg::Slot(Slot::Value(v)), lazy_cleared)
                    }
                }
            }
        };
        let (old_value, notify) = {
            let mut state = inner.state.borrow_mut();
            let notify = state.lazy_value.is_some() || lazy_cleared || state.value != new_value;
            (std::mem::replace(&mut state.value, new_value), notify)
        };
        if let Some(event) = &inner.event {
            if notify {
                let old_value = self.external(old_value)?;
                event.emit(
                    "changed",
                    &[
                        EventArg::Variable(self.clone()),
                        EventArg::Slot(old_value),
                        payload,
                        EventArg::Flag(from_db),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Resets the value to undefined, emitting `"changed"` if one was set.
    pub fn delete(&self) -> Result<()> {
        let old_value = std::mem::replace(&mut self.0.state.borrow_mut().value, Slot::Undefined);
        if !old_value.is_defined() {
            return Ok(());
        }
        if let Some(event) = &self.0.event {
            let old_value = self.external(old_value)?;
            event.emit(
                "changed",
                &[
                    EventArg::Variable(self.clone()),
                    EventArg::Slot(old_value),
                    EventArg::Slot(Slot::Undefined),
                    EventArg::Flag(false),
                ],
            )?;
        }
        Ok(())
    }

    fn external(&self, internal: Slot) -> Result<Slot> {
        match internal {
            Slot::Value(v) => Ok(Slot::Value(self.0.kind.parse_get(&v, false)?)),
            other => Ok(other),
        }
    }

    /// True only when a real value is set; a pending lazy value doesn't count.
    pub fn is_defined(&self) -> bool {
        self.0.state.borrow().value.is_defined()
    }

    pub fn has_changed(&self) -> bool {
        let state = self.0.state.borrow();
        state.lazy_value.is_some() || self.0.checkpoint.borrow().as_ref() != Some(&*state)
    }

    pub fn get_state(&self) -> VariableState {
        self.0.state.borrow().clone()
    }

    pub fn set_state(&self, state: VariableState) {
        *self.0.state.borrow_mut() = state;
    }

    pub fn checkpoint(&self) {
        *self.0.checkpoint.borrow_mut() = Some(self.get_state());
    }

    /// A detached variable of the same kind holding the same state. The copy
    /// has no event bus, no validator and no checkpoint.
    pub fn copy(&self) -> Variable {
        let builder = VariableBuilder {
            kind: Rc::clone(&self.0.kind),
            allow_none: self.0.allow_none,
            column: self.0.column.clone(),
            event: None,
            validator: None,
            initial: None,
        };
        builder.into_variable(self.get_state())
    }

    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("Variable")
            .field("kind", &self.0.kind.name())
            .field("column", &self.0.column.as_ref().map(Column::qualified_name))
            .field("value", &state.value)
            .field("lazy_value", &state.lazy_value)
            .finish()
    }
}

type InitialValue = (Rc<dyn Fn() -> Assignment>, bool);

/// Construction options for a [`Variable`].
#[derive(Clone)]
pub struct VariableBuilder {
    kind: Rc<dyn VariableKind>,
    allow_none: bool,
    column: Option<Column>,
    event: Option<Rc<EventSystem>>,
    validator: Option<Validator>,
    initial: Option<InitialValue>,
}

impl VariableBuilder {
    pub fn new(kind: Rc<dyn VariableKind>) -> Self {
        Self {
            kind,
            allow_none: true,
            column: None,
            event: None,
            validator: None,
            initial: None,
        }
    }
    pub fn allow_none(mut self, allow_none: bool) -> Self {
        self.allow_none = allow_none;
        self
    }
    pub fn column(mut self, column: Column) -> Self {
        self.column = Some(column);
        self
    }
    pub fn event(mut self, event: Rc<EventSystem>) -> Self {
        self.event = Some(event);
        self
    }
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }
    pub fn value(self, value: impl Into<Assignment>, from_db: bool) -> Self {
        let value = value.into();
        self.value_factory(Rc::new(move || value.clone()), from_db)
    }
    pub fn value_factory(mut self, factory: Rc<dyn Fn() -> Assignment>, from_db: bool) -> Self {
        self.initial = Some((factory, from_db));
        self
    }

    /// The initial value is applied without validation and without events.
    pub fn build(self) -> Result<Variable> {
        let state = match &self.initial {
            Some((factory, from_db)) => {
                let bare = VariableBuilder {
                    kind: Rc::clone(&self.kind),
                    allow_none: self.allow_none,
                    column: self.column.clone(),
                    event: None,
                    validator: None,
                    initial: None,
                }
                .into_variable(VariableState::default());
                bare.set(factory(), *from_db)?;
                bare.get_state()
            }
            None => VariableState::default(),
        };
        Ok(self.into_variable(state))
    }

    fn into_variable(self, state: VariableState) -> Variable {
        Variable(Rc::new(VariableInner {
            kind: self.kind,
            allow_none: self.allow_none,
            column: self.column,
            event: self.event,
            validator: self.validator,
            state: RefCell::new(state),
            checkpoint: RefCell::new(None),
        }))
    }
}

/// Per-column recipe used by [`crate::info::ObjectInfo`] to create the
/// variable of each mapped column.
#[derive(Clone)]
pub struct VariableFactory {
    kind: Rc<dyn VariableKind>,
    allow_none: bool,
    validator: Option<(ValidatorFn, String)>,
    default: Option<InitialValue>,
}

impl VariableFactory {
    pub fn new(kind: impl VariableKind + 'static) -> Self {
        Self::from_kind(Rc::new(kind))
    }
    pub fn from_kind(kind: Rc<dyn VariableKind>) -> Self {
        Self { kind, allow_none: true, validator: None, default: None }
    }
    pub fn allow_none(mut self, allow_none: bool) -> Self {
        self.allow_none = allow_none;
        self
    }
    pub fn validator(mut self, attribute: &str, func: ValidatorFn) -> Self {
        self.validator = Some((func, attribute.to_owned()));
        self
    }
    pub fn default_value(mut self, factory: Rc<dyn Fn() -> Assignment>) -> Self {
        self.default = Some((factory, false));
        self
    }
    pub fn kind(&self) -> &Rc<dyn VariableKind> {
        &self.kind
    }

    pub fn build(
        &self,
        column: &Column,
        event: Option<Rc<EventSystem>>,
        context: Option<ContextAccessor>,
    ) -> Result<Variable> {
        let mut builder = VariableBuilder::new(Rc::clone(&self.kind))
            .allow_none(self.allow_none)
            .column(column.clone());
        if let Some(event) = event {
            builder = builder.event(event);
        }
        if let Some((func, attribute)) = &self.validator {
            let mut validator = Validator::new(Rc::clone(func), attribute);
            if let Some(context) = context {
                validator = validator.with_context(context);
            }
            builder = builder.validator(validator);
        }
        if let Some((factory, from_db)) = &self.default {
            builder = builder.value_factory(Rc::clone(factory), *from_db);
        }
        builder.build()
    }
}

impl Default for VariableFactory {
    fn default() -> Self {
        Self::new(AnyKind)
    }
}

impl fmt::Debug for VariableFactory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VariableFactory")
            .field("kind", &self.kind.name())
            .field("allow_none", &self.allow_none)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}
