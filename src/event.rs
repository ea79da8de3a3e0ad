//! Minimal per-owner publish/subscribe bus.
//!
//! An [`EventSystem`] belongs to one owner (typically an
//! [`crate::info::ObjectInfo`]) which it only observes through a weak
//! reference. Hooks are `(callback, extra)` pairs registered under an event
//! name; emitting an event calls every hook with the owner, the emitted
//! arguments and the hook's own extra arguments appended.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::OtherHasher;
use crate::error::Result;
use crate::variable::{LazyValue, Slot, Variable};

/// What a hook wants to happen to itself after being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFlow {
    Continue,
    Unsubscribe,
}

/// Hook callbacks are identified by pointer, so keep the `Rc` around
/// if the hook must be removed later.
pub type Callback = Rc<dyn Fn(&Rc<dyn Any>, &[EventArg]) -> Result<HookFlow>>;

pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Rc<dyn Any>, &[EventArg]) -> Result<HookFlow> + 'static,
{
    Rc::new(f)
}

/// A single argument carried by an emitted event or stored as hook extra data.
#[derive(Debug, Clone, PartialEq)]
pub enum EventArg {
    Variable(Variable),
    Slot(Slot),
    Lazy(LazyValue),
    Flag(bool),
    Text(String),
    Int(i64),
}

impl EventArg {
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            EventArg::Variable(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_slot(&self) -> Option<&Slot> {
        match self {
            EventArg::Slot(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_lazy(&self) -> Option<&LazyValue> {
        match self {
            EventArg::Lazy(l) => Some(l),
            _ => None,
        }
    }
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            EventArg::Flag(f) => Some(*f),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct Hook {
    callback: Callback,
    extra: Vec<EventArg>,
}
impl Hook {
    fn matches(&self, callback: &Callback, extra: &[EventArg]) -> bool {
        Rc::ptr_eq(&self.callback, callback) && self.extra == extra
    }
}

pub struct EventSystem {
    owner: Weak<dyn Any>,
    hooks: RefCell<HashMap<String, Vec<Hook>, OtherHasher>>,
}

impl EventSystem {
    pub fn new(owner: Weak<dyn Any>) -> Self {
        Self {
            owner,
            hooks: RefCell::new(HashMap::default()),
        }
    }
    pub fn for_owner<T: Any>(owner: &Rc<T>) -> Self {
        Self::new(Rc::downgrade(owner) as Weak<dyn Any>)
    }
    /// Registers the pair unless an equal pair is already registered.
    pub fn hook(&self, name: &str, callback: Callback, extra: Vec<EventArg>) {
        let mut hooks = self.hooks.borrow_mut();
        let registered = hooks.entry(name.to_owned()).or_default();
        if !registered.iter().any(|h| h.matches(&callback, &extra)) {
            registered.push(Hook { callback, extra });
        }
    }
    pub fn unhook(&self, name: &str, callback: &Callback, extra: &[EventArg]) {
        let mut hooks = self.hooks.borrow_mut();
        if let Some(registered) = hooks.get_mut(name) {
            registered.retain(|h| !h.matches(callback, extra));
            if registered.is_empty() {
                hooks.remove(name);
            }
        }
    }
    pub fn hook_count(&self, name: &str) -> usize {
        self.hooks.borrow().get(name).map_or(0, Vec::len)
    }
    pub fn emit(&self, name: &str, args: &[EventArg]) -> Result<()> {
        let Some(owner) = self.owner.upgrade() else {
            return Ok(());
        };
        // hooks added or removed by a callback only affect later emissions
        let snapshot = match self.hooks.borrow().get(name) {
            Some(registered) => registered.clone(),
            None => return Ok(()),
        };
        trace!(event = name, hooks = snapshot.len(), "emit");
        for hook in snapshot {
            let flow = if hook.extra.is_empty() {
                (hook.callback)(&owner, args)?
            } else {
                let mut call_args = args.to_vec();
                call_args.extend(hook.extra.iter().cloned());
                (hook.callback)(&owner, &call_args)?
            };
            if flow == HookFlow::Unsubscribe {
                trace!(event = name, "hook unsubscribed itself");
                self.unhook(name, &hook.callback, &hook.extra);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EventSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hooks = self.hooks.borrow();
        let mut names: Vec<(&String, usize)> = hooks.iter().map(|(k, v)| (k, v.len())).collect();
        names.sort();
        f.debug_struct("EventSystem")
            .field("owner_alive", &(self.owner.strong_count() > 0))
            .field("hooks", &names)
            .finish()
    }
}
