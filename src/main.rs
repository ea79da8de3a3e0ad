use std::rc::Rc;

use tracing::{error, info};

use squall::compile::{CompileState, Expr};
use squall::datatype::{IntKind, TextKind};
use squall::event::{callback, HookFlow};
use squall::expr::{default_compiler, BinaryOper, Column, CompoundOper, Func, Null, Prefix, Suffix, Table};
use squall::info::{get_cls_info, get_obj_info, Mapped, ObjectInfoCell};
use squall::settings::{init_tracing, Settings, DEFAULT_CONFIG_FILE};
use squall::variable::VariableFactory;

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
            Column::declare("id", Some(&table), 1, VariableFactory::new(IntKind).allow_none(false)),
            Column::declare("name", Some(&table), 0, VariableFactory::new(TextKind)),
        ]
    }
    fn obj_info_cell(&self) -> &ObjectInfoCell {
        &self.info
    }
}

fn run() -> squall::Result<()> {
    let settings = Settings::load(DEFAULT_CONFIG_FILE)?;
    init_tracing(&settings);
    info!(?settings, "settings loaded");

    let root = default_compiler();
    let dialect = settings.dialect(&root);
    let cls_info = get_cls_info::<Person>()?;
    let (id, name) = (cls_info.columns()[0].clone(), cls_info.columns()[1].clone());

    let samples: Vec<Expr> = vec![
        CompoundOper::and(vec![
            BinaryOper::eq(id.clone(), 42).into(),
            CompoundOper::or(vec![
                BinaryOper::like(name.clone(), "A%").into(),
                BinaryOper::eq(name.clone(), Null).into(),
            ])
            .into(),
        ])
        .into(),
        BinaryOper::sub(1, BinaryOper::sub(2, 3)).into(),
        Prefix::not(BinaryOper::ne(id.clone(), Null)).into(),
        Expr::Seq(vec![Func::new("lower", vec![name.clone().into()]).into(), Suffix::desc(id.clone()).into()]),
    ];
    for sample in &samples {
        let mut state = CompileState::new();
        let sql = dialect.compile_with(sample, &mut state, &settings.options())?;
        println!("{}    -- {} parameter(s)", sql, state.parameters.len());
    }

    let person = Rc::new(Person { info: ObjectInfoCell::new() });
    let obj_info = get_obj_info(&person)?;
    let on_change = callback(|_, args| {
        if let (Some(variable), Some(old)) = (
            args.first().and_then(|a| a.as_variable()),
            args.get(1).and_then(|a| a.as_slot()),
        ) {
            println!("{:?} changed, was {:?}", variable.column(), old);
        }
        Ok(HookFlow::Continue)
    });
    obj_info.event().hook("changed", on_change, Vec::new());
    let on_delete = callback(|_, _| {
        println!("person deleted");
        Ok(HookFlow::Unsubscribe)
    });
    obj_info.event().hook("object-deleted", on_delete, Vec::new());

    if let Some(variable) = obj_info.variable(&name) {
        variable.set("Alice", false)?;
        variable.set("Alice", false)?;
        obj_info.checkpoint();
        variable.set("Bob", false)?;
        println!("has changed: {}", obj_info.has_changed());
    }
    drop(person);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!(error = %e, "squall demo failed");
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
