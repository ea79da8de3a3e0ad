use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use squall::SquallError;
use squall::datatype::{IntKind, TextKind, Value};
use squall::event::{callback, HookFlow};
use squall::expr::{Column, Table};
use squall::info::{get_cls_info, get_obj_info, set_obj_info, Mapped, ObjectInfo, ObjectInfoCell};
use squall::variable::{Assignment, VariableFactory};

#[derive(Default)]
struct Person {
    info: ObjectInfoCell,
}

impl Mapped for Person {
    fn table() -> Table {
        Table::new("person")
    }
    fn columns() -> Vec<Column> {
        let table = Self::table();
        vec![
            Column::declare("name", Some(&table), 0, VariableFactory::new(TextKind)),
            Column::declare("id", Some(&table), 1, VariableFactory::new(IntKind).allow_none(false)),
            Column::declare(
                "age",
                Some(&table),
                0,
                VariableFactory::new(IntKind).default_value(Rc::new(|| Assignment::from(18))),
            ),
        ]
    }
    fn order() -> Vec<&'static str> {
        vec!["-age", "name"]
    }
    fn obj_info_cell(&self) -> &ObjectInfoCell {
        &self.info
    }
}

#[derive(Default)]
struct Membership {
    info: ObjectInfoCell,
}

impl Mapped for Membership {
    fn table() -> Table {
        Table::new("membership")
    }
    fn columns() -> Vec<Column> {
        let table = Self::table();
        vec![
            Column::declare("club", Some(&table), 2, VariableFactory::default()),
            Column::declare("member", Some(&table), 1, VariableFactory::default()),
            Column::declare("since", Some(&table), 0, VariableFactory::default()),
        ]
    }
    fn obj_info_cell(&self) -> &ObjectInfoCell {
        &self.info
    }
}

struct Keyless {
    info: ObjectInfoCell,
}

impl Mapped for Keyless {
    fn table() -> Table {
        Table::new("keyless")
    }
    fn columns() -> Vec<Column> {
        vec![Column::new("value", Some(&Self::table()))]
    }
    fn obj_info_cell(&self) -> &ObjectInfoCell {
        &self.info
    }
}

struct Clashing {
    info: ObjectInfoCell,
}

impl Mapped for Clashing {
    fn table() -> Table {
        Table::new("clashing")
    }
    fn columns() -> Vec<Column> {
        let table = Self::table();
        vec![
            Column::declare("a", Some(&table), 1, VariableFactory::default()),
            Column::declare("b", Some(&table), 1, VariableFactory::default()),
        ]
    }
    fn obj_info_cell(&self) -> &ObjectInfoCell {
        &self.info
    }
}

#[test]
fn class_info_is_memoized_per_type() {
    let first = get_cls_info::<Person>().expect("class info");
    let second = get_cls_info::<Person>().expect("class info");
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(first.table().name(), "person");
    let names: Vec<&str> = first.columns().iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["name", "id", "age"]);
    assert_eq!(first.primary_key_pos(), &[1]);
    assert_eq!(first.default_order().len(), 2);
}

#[test]
fn primary_key_follows_declared_positions() {
    let cls_info = get_cls_info::<Membership>().expect("class info");
    let key: Vec<&str> = cls_info.primary_key().iter().map(|c| c.name()).collect();
    assert_eq!(key, vec!["member", "club"]);
    assert_eq!(cls_info.primary_key_pos(), &[1, 0]);
}

#[test]
fn invalid_primary_keys_are_rejected() {
    let err = get_cls_info::<Keyless>().unwrap_err();
    assert!(matches!(err, SquallError::ClassInfo(_)));
    assert!(err.to_string().contains("no primary key"));
    let err = get_cls_info::<Clashing>().unwrap_err();
    assert!(err.to_string().contains("same primary id"));
}

#[test]
fn obj_info_is_memoized_on_the_object() {
    let person = Rc::new(Person::default());
    let first = get_obj_info(&person).expect("obj info");
    let second = get_obj_info(&person).expect("obj info");
    assert_eq!(first, second);
    assert!(first.ptr_eq(&second));
}

#[test]
fn equal_values_do_not_make_equal_infos() {
    let a = Rc::new(Person::default());
    let b = Rc::new(Person::default());
    let (info_a, info_b) = (get_obj_info(&a).expect("a"), get_obj_info(&b).expect("b"));
    let id = get_cls_info::<Person>().expect("class info").columns()[1].clone();
    for info in [&info_a, &info_b] {
        info.variable(&id).expect("id variable").set(1, false).expect("set");
    }
    assert_ne!(info_a, info_b);
    let set: HashSet<ObjectInfo> = [info_a.clone(), info_b.clone(), info_a.clone()].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn variables_follow_column_declarations() {
    let person = Rc::new(Person::default());
    let info = get_obj_info(&person).expect("obj info");
    let cls_info = Rc::clone(info.cls_info());
    assert_eq!(info.variables().len(), 3);
    for ((column, variable), declared) in info.variables().iter().zip(cls_info.columns()) {
        assert_eq!(column, declared);
        assert_eq!(variable.column(), Some(declared));
    }
    let age = &cls_info.columns()[2];
    assert_eq!(info.variable(age).expect("age").value().expect("get"), Some(Value::Int(18)));
    assert_eq!(info.primary_vars().len(), 1);
    assert!(info.primary_vars()[0].ptr_eq(info.variable(&cls_info.columns()[1]).expect("id")));
    // columns are identified by declaration, not by name
    assert!(info.variable(&Column::new("age", Some(cls_info.table()))).is_none());
}

#[test]
fn checkpoint_reaches_every_variable() {
    let person = Rc::new(Person::default());
    let info = get_obj_info(&person).expect("obj info");
    assert!(info.has_changed());
    info.checkpoint();
    assert!(!info.has_changed());
    let name = info.variables()[0].1.clone();
    name.set("Ann", false).expect("set");
    assert!(info.has_changed());
}

#[test]
fn variables_share_the_info_event_system() {
    let person = Rc::new(Person::default());
    let info = get_obj_info(&person).expect("obj info");
    let owners = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&owners);
    info.event().hook(
        "changed",
        callback(move |owner, _| {
            sink.borrow_mut().push(ObjectInfo::from_owner(owner));
            Ok(HookFlow::Continue)
        }),
        Vec::new(),
    );
    info.variables()[0].1.set("Ann", false).expect("set");
    info.variables()[2].1.set(40, false).expect("set");
    let owners = owners.borrow();
    assert_eq!(owners.len(), 2);
    assert!(owners.iter().all(|o| o.as_ref() == Some(&info)));
}

#[test]
fn validation_context_is_the_live_object() {
    struct Validated {
        info: ObjectInfoCell,
        limit: i64,
    }
    impl Mapped for Validated {
        fn table() -> Table {
            Table::new("validated")
        }
        fn columns() -> Vec<Column> {
            let factory = VariableFactory::new(IntKind).validator(
                "amount",
                Rc::new(|context, attribute, value| {
                    let limit = context
                        .and_then(|obj| obj.downcast::<Validated>().ok())
                        .map(|obj| obj.limit)
                        .ok_or_else(|| SquallError::Validation("object is gone".into()))?;
                    match value {
                        Some(Value::Int(n)) if n > limit => {
                            Err(SquallError::Validation(format!("{} over {}", attribute, limit)))
                        }
                        other => Ok(other),
                    }
                }),
            );
            vec![Column::declare("amount", Some(&Self::table()), 1, factory)]
        }
        fn obj_info_cell(&self) -> &ObjectInfoCell {
            &self.info
        }
    }

    let obj = Rc::new(Validated { info: ObjectInfoCell::new(), limit: 10 });
    let info = get_obj_info(&obj).expect("obj info");
    let amount = info.variables()[0].1.clone();
    amount.set(5, false).expect("within limit");
    let err = amount.set(11, false).unwrap_err();
    assert_eq!(err.to_string(), "Validation error: amount over 10");
    assert!(info.get_obj_as::<Validated>().is_some());
    drop(obj);
    assert!(info.get_obj().is_none());
    assert!(amount.set(1, false).is_err());
}

#[test]
fn dropping_the_object_emits_object_deleted() {
    let person = Rc::new(Person::default());
    let info = get_obj_info(&person).expect("obj info");
    let deleted = Rc::new(RefCell::new(0));
    let count = Rc::clone(&deleted);
    info.event().hook(
        "object-deleted",
        callback(move |_, _| {
            *count.borrow_mut() += 1;
            Ok(HookFlow::Continue)
        }),
        Vec::new(),
    );
    drop(person);
    assert_eq!(*deleted.borrow(), 1);
    assert!(info.get_obj().is_none());
}

#[test]
fn set_obj_info_replaces_the_attachment() {
    let a = Rc::new(Person::default());
    let b = Rc::new(Person::default());
    let info_b = get_obj_info(&b).expect("b");
    set_obj_info(&a, info_b.clone());
    assert_eq!(get_obj_info(&a).expect("a"), info_b);
}

fn count_deletions(info: &ObjectInfo) -> Rc<RefCell<u32>> {
    let deleted = Rc::new(RefCell::new(0));
    let count = Rc::clone(&deleted);
    info.event().hook(
        "object-deleted",
        callback(move |_, _| {
            *count.borrow_mut() += 1;
            Ok(HookFlow::Continue)
        }),
        Vec::new(),
    );
    deleted
}

#[test]
fn shared_info_reports_only_the_observed_object() {
    let a = Rc::new(Person::default());
    let b = Rc::new(Person::default());
    let info_b = get_obj_info(&b).expect("b");
    let deleted = count_deletions(&info_b);
    set_obj_info(&a, info_b.clone());

    drop(a);
    assert_eq!(*deleted.borrow(), 0);
    assert!(info_b.get_obj().is_some());

    drop(b);
    assert_eq!(*deleted.borrow(), 1);
}

#[test]
fn replaced_info_still_reports_its_object() {
    let a = Rc::new(Person::default());
    let b = Rc::new(Person::default());
    let info_a = get_obj_info(&a).expect("a");
    let info_b = get_obj_info(&b).expect("b");
    let deleted_a = count_deletions(&info_a);
    let deleted_b = count_deletions(&info_b);
    set_obj_info(&a, info_b.clone());
    drop(info_a);

    drop(a);
    assert_eq!(*deleted_a.borrow(), 1);
    assert_eq!(*deleted_b.borrow(), 0);

    drop(b);
    assert_eq!(*deleted_b.borrow(), 1);
}
