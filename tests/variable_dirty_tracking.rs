use std::cell::RefCell;
use std::rc::Rc;

use squall::SquallError;
use squall::datatype::{AnyKind, IntKind, Value};
use squall::event::{callback, EventArg, EventSystem, HookFlow};
use squall::expr::{Column, Table};
use squall::variable::{LazyValue, Slot, Validator, Variable};

type Seen = Rc<RefCell<Vec<Vec<EventArg>>>>;

fn observed(builder: squall::variable::VariableBuilder) -> (Variable, Seen, Rc<EventSystem>, Rc<()>) {
    let owner = Rc::new(());
    let event = Rc::new(EventSystem::for_owner(&owner));
    let seen: Seen = Rc::default();
    let sink = Rc::clone(&seen);
    event.hook(
        "changed",
        callback(move |_, args| {
            sink.borrow_mut().push(args.to_vec());
            Ok(HookFlow::Continue)
        }),
        Vec::new(),
    );
    let variable = builder.event(Rc::clone(&event)).build().expect("variable");
    (variable, seen, event, owner)
}

#[test]
fn set_then_get_round_trips() {
    let variable = Variable::builder(Rc::new(AnyKind)).build().expect("variable");
    for value in [Value::Int(42), Value::from("text"), Value::Float(1.5), Value::Bool(false)] {
        variable.set(value.clone(), false).expect("set");
        assert_eq!(variable.value().expect("get"), Some(value));
    }
    variable.set(None::<Value>, false).expect("set null");
    assert_eq!(variable.value().expect("get"), None);
    assert!(variable.is_defined());
}

#[test]
fn undefined_variable_returns_default() {
    let variable = Variable::any();
    assert!(!variable.is_defined());
    assert_eq!(variable.get(Some(Value::Int(7)), false).expect("get"), Some(Value::Int(7)));
}

#[test]
fn lazy_value_is_resolved_on_read() {
    let owner = Rc::new(());
    let event = Rc::new(EventSystem::for_owner(&owner));
    let resolved = Rc::new(RefCell::new(0));
    let count = Rc::clone(&resolved);
    event.hook(
        "resolve-lazy-value",
        callback(move |_, args| {
            *count.borrow_mut() += 1;
            assert_eq!(args[1].as_lazy(), Some(&LazyValue::AutoReload));
            // resolve by assigning through the very variable being read
            let variable = args[0].as_variable().expect("variable argument");
            variable.set(Value::Int(10), true)?;
            Ok(HookFlow::Continue)
        }),
        Vec::new(),
    );
    let variable = Variable::builder(Rc::new(IntKind)).event(Rc::clone(&event)).build().expect("variable");
    variable.set(1, false).expect("set");
    variable.set(LazyValue::AutoReload, false).expect("set lazy");
    assert_eq!(variable.get_lazy(), Some(LazyValue::AutoReload));
    assert!(!variable.is_defined());
    assert_eq!(variable.value().expect("get"), Some(Value::Int(10)));
    assert_eq!(*resolved.borrow(), 1);
    assert_eq!(variable.get_lazy(), None);
    // nothing pending anymore
    variable.value().expect("get");
    assert_eq!(*resolved.borrow(), 1);
}

#[test]
fn lazy_value_without_event_reads_default() {
    let variable = Variable::with_value(Rc::new(IntKind), 3).expect("variable");
    variable.set(LazyValue::AutoReload, false).expect("set lazy");
    assert_eq!(variable.get(Some(Value::Int(-1)), false).expect("get"), Some(Value::Int(-1)));
}

#[test]
fn checkpoint_clears_dirty_state() {
    let variable = Variable::new(Rc::new(IntKind));
    variable.set(1, false).expect("set");
    assert!(variable.has_changed());
    variable.checkpoint();
    assert!(!variable.has_changed());
    variable.set(Value::Int(1), true).expect("set same from db");
    assert!(!variable.has_changed());
    variable.set(2, false).expect("set different");
    assert!(variable.has_changed());
}

#[test]
fn pending_lazy_value_is_always_dirty() {
    let variable = Variable::with_value(Rc::new(IntKind), 1).expect("variable");
    variable.checkpoint();
    variable.set(LazyValue::AutoReload, false).expect("set lazy");
    assert!(variable.has_changed());
    variable.set(1, false).expect("set");
    // the lazy assignment dropped the baseline
    assert!(variable.has_changed());
}

#[test]
fn equal_values_from_db_notify_once() {
    let (variable, seen, _event, _owner) = observed(Variable::builder(Rc::new(IntKind)));
    variable.set(Value::Int(5), true).expect("first");
    variable.set(Value::Int(5), true).expect("second");
    assert_eq!(seen.borrow().len(), 1);

    let seen = seen.borrow();
    let first = &seen[0];
    assert!(first[0].as_variable().expect("variable").ptr_eq(&variable));
    assert_eq!(first[1].as_slot(), Some(&Slot::Undefined));
    assert_eq!(first[2].as_slot(), Some(&Slot::Value(Value::Int(5))));
    assert_eq!(first[3].as_flag(), Some(true));
}

#[test]
fn cleared_lazy_value_forces_notification() {
    let (variable, seen, _event, _owner) = observed(Variable::builder(Rc::new(IntKind)));
    variable.set(Value::Int(5), true).expect("set");
    variable.set(LazyValue::AutoReload, false).expect("lazy");
    variable.set(Value::Int(5), true).expect("same value again");
    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[1][2].as_lazy(), Some(&LazyValue::AutoReload));
    assert_eq!(seen[2][2].as_slot(), Some(&Slot::Value(Value::Int(5))));
}

#[test]
fn null_is_rejected_unless_allowed() {
    let table = Table::new("person");
    let column = Column::new("name", Some(&table));
    let variable = Variable::builder(Rc::new(AnyKind))
        .allow_none(false)
        .column(column)
        .build()
        .expect("variable");
    let err = variable.set(None::<Value>, false).unwrap_err();
    assert!(matches!(err, SquallError::NullNotAllowed { .. }));
    assert_eq!(err.to_string(), "None isn't acceptable as a value for person.name");
    assert!(!variable.is_defined());
}

#[test]
fn validator_replaces_value_and_can_reject() {
    let validator = Validator::new(
        Rc::new(|_, attribute, value| match value {
            Some(Value::Int(n)) if n < 0 => {
                Err(SquallError::Validation(format!("{} must be positive", attribute)))
            }
            Some(Value::Int(n)) => Ok(Some(Value::Int(n * 2))),
            other => Ok(other),
        }),
        "age",
    );
    let variable = Variable::builder(Rc::new(IntKind)).validator(validator).build().expect("variable");
    variable.set(21, false).expect("valid");
    assert_eq!(variable.value().expect("get"), Some(Value::Int(42)));
    let err = variable.set(-1, false).unwrap_err();
    assert_eq!(err.to_string(), "Validation error: age must be positive");
    assert_eq!(variable.value().expect("get"), Some(Value::Int(42)));
    // values coming from the database bypass validation
    variable.set(Value::Int(-1), true).expect("from db");
    assert_eq!(variable.value().expect("get"), Some(Value::Int(-1)));
}

#[test]
fn delete_notifies_only_when_defined() {
    let (variable, seen, _event, _owner) = observed(Variable::builder(Rc::new(IntKind)));
    variable.delete().expect("delete undefined");
    assert!(seen.borrow().is_empty());
    variable.set(3, false).expect("set");
    variable.delete().expect("delete");
    assert!(!variable.is_defined());
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1][1].as_slot(), Some(&Slot::Value(Value::Int(3))));
    assert_eq!(seen[1][2].as_slot(), Some(&Slot::Undefined));
}

#[test]
fn dead_owner_silences_events() {
    let (variable, seen, _event, owner) = observed(Variable::builder(Rc::new(IntKind)));
    drop(owner);
    variable.set(1, false).expect("set");
    assert!(seen.borrow().is_empty());
}

#[test]
fn copy_is_detached() {
    let (variable, seen, _event, _owner) = observed(Variable::builder(Rc::new(IntKind)).allow_none(false));
    variable.set(8, false).expect("set");
    let copy = variable.copy();
    assert_ne!(copy, variable);
    assert_eq!(copy.get_state(), variable.get_state());
    assert!(!copy.allow_none());
    copy.set(9, false).expect("set copy");
    assert_eq!(variable.value().expect("get"), Some(Value::Int(8)));
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn builder_applies_initial_value_silently() {
    let (variable, seen, _event, _owner) = observed(Variable::builder(Rc::new(IntKind)).value(4, false));
    assert_eq!(variable.value().expect("get"), Some(Value::Int(4)));
    assert!(seen.borrow().is_empty());
    assert!(variable.has_changed());
}
