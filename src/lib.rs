//! Squall – the runtime core of a small object-relational mapper.
//!
//! Two engines cooperate here, connected by a minimal publish/subscribe bus:
//! * A *value engine*: every mapped object owns an [`info::ObjectInfo`] which
//!   holds one [`variable::Variable`] per mapped column. Variables are typed
//!   cells with lazy values, validation, dirty tracking and change
//!   notification.
//! * A *compiler*: [`compile::Compile`] renders expression trees to SQL text,
//!   dispatching on node tags through tables inherited along a hierarchy of
//!   compilers and parenthesizing by operator precedence.
//!
//! ## Modules
//! * [`event`] – The [`event::EventSystem`] hook registry.
//! * [`datatype`] – The dynamic [`datatype::Value`] plus the variable kinds
//!   converting between code and database representations (numbers, text,
//!   bytes, decimals, dates and times, intervals, enums, JSON).
//! * [`variable`] – Value cells, their construction and per-column factories.
//! * [`info`] – Class metadata ([`info::ClassInfo`]) and per-object
//!   [`info::ObjectInfo`].
//! * [`compile`] – The compiler hierarchy, compile state and node tags.
//! * [`expr`] – Expression nodes (columns, operators, functions…) and the
//!   root compiler with their handlers.
//! * [`settings`] – Configuration loading and logging setup.
//!
//! ## Events
//! Variables attached to an event system emit `changed` when their value
//! changes and `resolve-lazy-value` when read with a lazy value pending.
//! Dropping a mapped object emits `object-deleted`. Callbacks return
//! [`event::HookFlow::Unsubscribe`] to remove themselves.
//!
//! ## Quick Start
//! ```
//! use squall::expr::{default_compiler, BinaryOper, Column, CompoundOper, Table};
//! use squall::compile::{CompileState, Expr};
//! let compile = default_compiler();
//! let person = Table::new("person");
//! let name = Column::new("name", Some(&person));
//! let age = Column::new("age", Some(&person));
//! let expr = Expr::from(CompoundOper::or(vec![
//!     BinaryOper::eq(name, "Alice").into(),
//!     BinaryOper::gt(age, 30).into(),
//! ]));
//! let mut state = CompileState::new();
//! let sql = compile.compile(&expr, &mut state).unwrap();
//! assert_eq!(sql, "person.name = ? OR person.age > ?");
//! assert_eq!(state.parameters.len(), 2);
//! ```
//!
//! ## Threading
//! Everything is single-threaded and built on `Rc`/`RefCell`. Event callbacks
//! run synchronously and may re-enter the variable that emitted the event.

use core::hash::BuildHasherDefault;
use seahash::SeaHasher;

// we will use a fast hashing algo for dispatch tables and hook registries
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub mod compile;
pub mod datatype;
pub mod error;
pub mod event;
pub mod expr;
pub mod info;
pub mod settings;
pub mod variable;

pub use compile::{Compile, CompileState, Expr};
pub use error::{Result, SquallError};
pub use event::{EventSystem, HookFlow};
pub use info::{ObjectInfo, get_cls_info, get_obj_info, set_obj_info};
pub use variable::Variable;
