//! Expression nodes and the built-in handler set of the root compiler.

// identity of columns is the identity of their shared inner data
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

// used to decide whether a token may be emitted without quotes
use lazy_static::lazy_static;
use regex::Regex;

// our own stuff that we need
use crate::compile::{
    downcast, Compile, CompileOptions, CompileState, Context, Expr, Node, NodeTag, SqlToken,
    SQL_TOKEN,
};
use crate::datatype::{kind_of, Value};
use crate::error::Result;
use crate::variable::{Variable, VariableFactory};

// ------------- Tags -------------
pub const LITERAL: NodeTag = NodeTag::new("literal");
pub const BOOL: NodeTag = NodeTag::new("bool");
pub const INT: NodeTag = NodeTag::new("int");
pub const FLOAT: NodeTag = NodeTag::new("float");
pub const DECIMAL: NodeTag = NodeTag::new("decimal");
pub const TEXT: NodeTag = NodeTag::new("text");
pub const BYTES: NodeTag = NodeTag::new("bytes");
pub const DATETIME: NodeTag = NodeTag::new("datetime");
pub const DATE: NodeTag = NodeTag::new("date");
pub const TIME: NodeTag = NodeTag::new("time");
pub const TIMEDELTA: NodeTag = NodeTag::new("timedelta");
pub const JSON: NodeTag = NodeTag::new("json");
pub const NULL: NodeTag = NodeTag::new("null");
pub const VARIABLE: NodeTag = NodeTag::new("variable");
pub const TABLE: NodeTag = NodeTag::new("table");
pub const COLUMN: NodeTag = NodeTag::new("column");
pub const ALIAS: NodeTag = NodeTag::new("alias");

pub const BINARY_OPER: NodeTag = NodeTag::new("binary-oper");
pub const NON_ASSOC: NodeTag = NodeTag::new("non-assoc-binary-oper");
pub const EQ: NodeTag = NodeTag::new("eq");
pub const NE: NodeTag = NodeTag::new("ne");
pub const GT: NodeTag = NodeTag::new("gt");
pub const GE: NodeTag = NodeTag::new("ge");
pub const LT: NodeTag = NodeTag::new("lt");
pub const LE: NodeTag = NodeTag::new("le");
pub const LIKE: NodeTag = NodeTag::new("like");
pub const IN: NodeTag = NodeTag::new("in");
pub const LSHIFT: NodeTag = NodeTag::new("lshift");
pub const RSHIFT: NodeTag = NodeTag::new("rshift");
pub const SUB: NodeTag = NodeTag::new("sub");
pub const DIV: NodeTag = NodeTag::new("div");
pub const MOD: NodeTag = NodeTag::new("mod");

pub const COMPOUND_OPER: NodeTag = NodeTag::new("compound-oper");
pub const AND: NodeTag = NodeTag::new("and");
pub const OR: NodeTag = NodeTag::new("or");
pub const ADD: NodeTag = NodeTag::new("add");
pub const MUL: NodeTag = NodeTag::new("mul");

pub const FUNC: NodeTag = NodeTag::new("func");
pub const COUNT: NodeTag = NodeTag::new("count");
pub const PREFIX_EXPR: NodeTag = NodeTag::new("prefix-expr");
pub const NOT: NodeTag = NodeTag::new("not");
pub const EXISTS: NodeTag = NodeTag::new("exists");
pub const NEG: NodeTag = NodeTag::new("neg");
pub const SUFFIX_EXPR: NodeTag = NodeTag::new("suffix-expr");
pub const ASC: NodeTag = NodeTag::new("asc");
pub const DESC: NodeTag = NodeTag::new("desc");

macro_rules! node {
    ($t:ty, [$($tag:expr),+]) => {
        impl Node for $t {
            fn lineage(&self) -> &'static [NodeTag] {
                &[$($tag),+]
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

// ------------- Literals -------------
impl Node for Value {
    fn lineage(&self) -> &'static [NodeTag] {
        match self {
            Value::Bool(_) => &[BOOL, LITERAL],
            Value::Int(_) => &[INT, LITERAL],
            Value::Float(_) => &[FLOAT, LITERAL],
            Value::Decimal(_) => &[DECIMAL, LITERAL],
            Value::Text(_) => &[TEXT, LITERAL],
            Value::Bytes(_) => &[BYTES, LITERAL],
            Value::DateTime(_) => &[DATETIME, LITERAL],
            Value::Date(_) => &[DATE, LITERAL],
            Value::Time(_) => &[TIME, LITERAL],
            Value::TimeDelta(_) => &[TIMEDELTA, LITERAL],
            Value::Json(_) => &[JSON, LITERAL],
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The SQL `NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Null;
node!(Null, [NULL]);

node!(Variable, [VARIABLE]);

macro_rules! literal_expr {
    ($($t:ty),*) => {
        $(impl From<$t> for Expr {
            fn from(v: $t) -> Self { Expr::from(Value::from(v)) }
        })*
    };
}
literal_expr!(bool, i32, i64, f64, &str, String);

// ------------- Tables and columns -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    name: String,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}
node!(Table, [TABLE]);

struct ColumnInner {
    name: String,
    table: Option<Table>,
    primary: u32,
    factory: VariableFactory,
}

/// A column declaration. Columns are shared handles compared by identity,
/// so the same declaration must be used to look up the variable bound to it.
#[derive(Clone)]
pub struct Column(Rc<ColumnInner>);

impl Column {
    pub fn new(name: &str, table: Option<&Table>) -> Self {
        Self::declare(name, table, 0, VariableFactory::default())
    }
    /// `primary` is the 1-based position within the primary key, 0 when the
    /// column isn't part of it.
    pub fn declare(name: &str, table: Option<&Table>, primary: u32, factory: VariableFactory) -> Self {
        Self(Rc::new(ColumnInner {
            name: name.to_owned(),
            table: table.cloned(),
            primary,
            factory,
        }))
    }
    pub fn name(&self) -> &str {
        &self.0.name
    }
    pub fn table(&self) -> Option<&Table> {
        self.0.table.as_ref()
    }
    pub fn primary(&self) -> u32 {
        self.0.primary
    }
    pub fn factory(&self) -> &VariableFactory {
        &self.0.factory
    }
    pub fn qualified_name(&self) -> String {
        match &self.0.table {
            Some(table) => format!("{}.{}", table.name, self.0.name),
            None => self.0.name.clone(),
        }
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Column {}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.0), state)
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Column({})", self.qualified_name())
    }
}
node!(Column, [COLUMN]);

#[derive(Debug, Clone)]
pub struct Alias {
    pub expr: Expr,
    pub name: String,
}

impl Alias {
    pub fn new(expr: impl Into<Expr>, name: &str) -> Self {
        Self { expr: expr.into(), name: name.to_owned() }
    }
}
node!(Alias, [ALIAS]);

// ------------- Operators -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    In,
    LShift,
    RShift,
    Sub,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => " = ",
            BinaryOp::Ne => " != ",
            BinaryOp::Gt => " > ",
            BinaryOp::Ge => " >= ",
            BinaryOp::Lt => " < ",
            BinaryOp::Le => " <= ",
            BinaryOp::Like => " LIKE ",
            BinaryOp::In => " IN ",
            BinaryOp::LShift => "<<",
            BinaryOp::RShift => ">>",
            BinaryOp::Sub => "-",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinaryOper {
    pub op: BinaryOp,
    pub left: Expr,
    pub right: Expr,
}

macro_rules! binary_constructors {
    ($($name:ident => $op:ident),*) => {
        $(pub fn $name(left: impl Into<Expr>, right: impl Into<Expr>) -> Self {
            Self { op: BinaryOp::$op, left: left.into(), right: right.into() }
        })*
    };
}

impl BinaryOper {
    binary_constructors!(
        eq => Eq, ne => Ne, gt => Gt, ge => Ge, lt => Lt, le => Le, like => Like,
        lshift => LShift, rshift => RShift, sub => Sub, div => Div, modulo => Mod
    );

    /// `left IN (items...)`
    pub fn in_(left: impl Into<Expr>, items: Vec<Expr>) -> Self {
        Self { op: BinaryOp::In, left: left.into(), right: Expr::Seq(items) }
    }
}

impl Node for BinaryOper {
    fn lineage(&self) -> &'static [NodeTag] {
        match self.op {
            BinaryOp::Eq => &[EQ, BINARY_OPER],
            BinaryOp::Ne => &[NE, BINARY_OPER],
            BinaryOp::Gt => &[GT, BINARY_OPER],
            BinaryOp::Ge => &[GE, BINARY_OPER],
            BinaryOp::Lt => &[LT, BINARY_OPER],
            BinaryOp::Le => &[LE, BINARY_OPER],
            BinaryOp::Like => &[LIKE, BINARY_OPER],
            BinaryOp::In => &[IN, BINARY_OPER],
            BinaryOp::LShift => &[LSHIFT, BINARY_OPER],
            BinaryOp::RShift => &[RSHIFT, BINARY_OPER],
            BinaryOp::Sub => &[SUB, NON_ASSOC, BINARY_OPER],
            BinaryOp::Div => &[DIV, NON_ASSOC, BINARY_OPER],
            BinaryOp::Mod => &[MOD, NON_ASSOC, BINARY_OPER],
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    And,
    Or,
    Add,
    Mul,
}

impl CompoundOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompoundOp::And => " AND ",
            CompoundOp::Or => " OR ",
            CompoundOp::Add => "+",
            CompoundOp::Mul => "*",
        }
    }
}

/// An associative operator over any number of operands.
#[derive(Debug, Clone)]
pub struct CompoundOper {
    pub op: CompoundOp,
    pub exprs: Expr,
}

impl CompoundOper {
    pub fn new(op: CompoundOp, exprs: Vec<Expr>) -> Self {
        Self { op, exprs: Expr::Seq(exprs) }
    }
    pub fn and(exprs: Vec<Expr>) -> Self {
        Self::new(CompoundOp::And, exprs)
    }
    pub fn or(exprs: Vec<Expr>) -> Self {
        Self::new(CompoundOp::Or, exprs)
    }
    pub fn add(exprs: Vec<Expr>) -> Self {
        Self::new(CompoundOp::Add, exprs)
    }
    pub fn mul(exprs: Vec<Expr>) -> Self {
        Self::new(CompoundOp::Mul, exprs)
    }
}

impl Node for CompoundOper {
    fn lineage(&self) -> &'static [NodeTag] {
        match self.op {
            CompoundOp::And => &[AND, COMPOUND_OPER],
            CompoundOp::Or => &[OR, COMPOUND_OPER],
            CompoundOp::Add => &[ADD, COMPOUND_OPER],
            CompoundOp::Mul => &[MUL, COMPOUND_OPER],
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ------------- Functions -------------
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub args: Expr,
}

impl Func {
    pub fn new(name: &str, args: Vec<Expr>) -> Self {
        Self { name: name.to_owned(), args: Expr::Seq(args) }
    }
}
node!(Func, [FUNC]);

/// `COUNT(*)`, `COUNT(column)` or `COUNT(DISTINCT column)`.
#[derive(Debug, Clone)]
pub struct Count {
    pub column: Option<Expr>,
    pub distinct: bool,
}

impl Count {
    pub fn all() -> Self {
        Self { column: None, distinct: false }
    }
    pub fn of(column: impl Into<Expr>, distinct: bool) -> Self {
        Self { column: Some(column.into()), distinct }
    }
}
node!(Count, [COUNT, FUNC]);

// ------------- Prefix and suffix expressions -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Not,
    Exists,
    Neg,
}

#[derive(Debug, Clone)]
pub struct Prefix {
    pub op: PrefixOp,
    pub expr: Expr,
}

impl Prefix {
    pub fn not(expr: impl Into<Expr>) -> Self {
        Self { op: PrefixOp::Not, expr: expr.into() }
    }
    pub fn exists(expr: impl Into<Expr>) -> Self {
        Self { op: PrefixOp::Exists, expr: expr.into() }
    }
    pub fn neg(expr: impl Into<Expr>) -> Self {
        Self { op: PrefixOp::Neg, expr: expr.into() }
    }
    pub fn prefix(&self) -> &'static str {
        match self.op {
            PrefixOp::Not => "NOT",
            PrefixOp::Exists => "EXISTS",
            PrefixOp::Neg => "-",
        }
    }
}

impl Node for Prefix {
    fn lineage(&self) -> &'static [NodeTag] {
        match self.op {
            PrefixOp::Not => &[NOT, PREFIX_EXPR],
            PrefixOp::Exists => &[EXISTS, PREFIX_EXPR],
            PrefixOp::Neg => &[NEG, PREFIX_EXPR],
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuffixOp {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Suffix {
    pub op: SuffixOp,
    pub expr: Expr,
}

impl Suffix {
    pub fn asc(expr: impl Into<Expr>) -> Self {
        Self { op: SuffixOp::Asc, expr: expr.into() }
    }
    pub fn desc(expr: impl Into<Expr>) -> Self {
        Self { op: SuffixOp::Desc, expr: expr.into() }
    }
    pub fn suffix(&self) -> &'static str {
        match self.op {
            SuffixOp::Asc => "ASC",
            SuffixOp::Desc => "DESC",
        }
    }
}

impl Node for Suffix {
    fn lineage(&self) -> &'static [NodeTag] {
        match self.op {
            SuffixOp::Asc => &[ASC, SUFFIX_EXPR],
            SuffixOp::Desc => &[DESC, SUFFIX_EXPR],
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ------------- Root compiler -------------
lazy_static! {
    static ref SAFE_TOKEN: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").unwrap();
}

/// SQL-1992 reserved words.
pub const RESERVED_WORDS: &str = "
    absolute action add all allocate alter and any are as asc assertion at
    authorization avg begin between bit bit_length both by cascade cascaded
    case cast catalog char character char_length character_length check close
    coalesce collate collation column commit connect connection constraint
    constraints continue convert corresponding count create cross current
    current_date current_time current_timestamp current_user cursor date day
    deallocate dec decimal declare default deferrable deferred delete desc
    describe descriptor diagnostics disconnect distinct domain double drop
    else end end-exec escape except exception exec execute exists external
    extract false fetch first float for foreign found from full get global go
    goto grant group having hour identity immediate in indicator initially
    inner input insensitive insert int integer intersect interval into is
    isolation join key language last leading left level like local lower
    match max min minute module month names national natural nchar next no
    not null nullif numeric octet_length of on only open option or order
    outer output overlaps pad partial position precision prepare preserve
    primary prior privileges procedure public read real references relative
    restrict revoke right rollback rows schema scroll second section select
    session session_user set size smallint some space sql sqlcode sqlerror
    sqlstate substring sum system_user table temporary then time timestamp
    timezone_hour timezone_minute to trailing transaction translate
    translation trim true union unique unknown update upper usage user using
    value values varchar varying view when whenever where with work write
    year zone
";

fn compile_token(compile: &Compile, node: &dyn Node, _state: &mut CompileState) -> Result<String> {
    let token = &downcast::<SqlToken>(node)?.0;
    if SAFE_TOKEN.is_match(token) && !compile.is_reserved_word(token) {
        return Ok(token.clone());
    }
    Ok(format!("\"{}\"", token.replace('"', "\"\"")))
}

fn compile_name(compile: &Compile, name: &str, state: &mut CompileState) -> Result<String> {
    compile.compile_with(&Expr::from(name), state, &CompileOptions::token())
}

fn compile_literal(_compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let value = downcast::<Value>(node)?;
    state.parameters.push(Variable::with_value(kind_of(value), value.clone())?);
    Ok("?".to_owned())
}

fn compile_variable(_compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    state.parameters.push(downcast::<Variable>(node)?.clone());
    Ok("?".to_owned())
}

fn compile_table(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    compile_name(compile, downcast::<Table>(node)?.name(), state)
}

fn compile_column(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let column = downcast::<Column>(node)?;
    let table = match column.table() {
        Some(table) if state.context() != Some(Context::ColumnName) => table,
        _ => return compile_name(compile, column.name(), state),
    };
    state.push_context(Context::ColumnPrefix);
    let table = compile_name(compile, table.name(), state);
    state.pop_context();
    Ok(format!("{}.{}", table?, compile_name(compile, column.name(), state)?))
}

fn compile_alias(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let alias = downcast::<Alias>(node)?;
    let expr = compile.compile(&alias.expr, state)?;
    Ok(format!("{} AS {}", expr, compile_name(compile, &alias.name, state)?))
}

fn compile_binary_oper(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let oper = downcast::<BinaryOper>(node)?;
    let left = compile.compile(&oper.left, state)?;
    Ok(format!("{}{}{}", left, oper.op.symbol(), compile.compile(&oper.right, state)?))
}

fn compile_non_assoc_binary_oper(
    compile: &Compile,
    node: &dyn Node,
    state: &mut CompileState,
) -> Result<String> {
    let oper = downcast::<BinaryOper>(node)?;
    let left = compile.compile(&oper.left, state)?;
    // a right operand of the same precedence needs parentheses
    state.precedence += 1;
    Ok(format!("{}{}{}", left, oper.op.symbol(), compile.compile(&oper.right, state)?))
}

fn compile_null_comparison(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let oper = downcast::<BinaryOper>(node)?;
    if oper.right.downcast_ref::<Null>().is_none() {
        return compile_binary_oper(compile, node, state);
    }
    let left = compile.compile(&oper.left, state)?;
    match oper.op {
        BinaryOp::Ne => Ok(format!("{} IS NOT NULL", left)),
        _ => Ok(format!("{} IS NULL", left)),
    }
}

fn compile_in(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let oper = downcast::<BinaryOper>(node)?;
    let left = compile.compile(&oper.left, state)?;
    state.precedence = 0;
    Ok(format!("{} IN ({})", left, compile.compile(&oper.right, state)?))
}

fn compile_compound_oper(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let oper = downcast::<CompoundOper>(node)?;
    compile.compile_with(&oper.exprs, state, &CompileOptions::join(oper.op.symbol()))
}

fn compile_func(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let func = downcast::<Func>(node)?;
    state.push_context(Context::Expr);
    // the argument list is already delimited
    state.precedence = 0;
    let args = compile.compile(&func.args, state);
    state.pop_context();
    Ok(format!("{}({})", func.name, args?))
}

fn compile_count(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let count = downcast::<Count>(node)?;
    let Some(column) = &count.column else {
        return Ok("COUNT(*)".to_owned());
    };
    state.push_context(Context::Expr);
    let column = compile.compile(column, state);
    state.pop_context();
    if count.distinct {
        return Ok(format!("COUNT(DISTINCT {})", column?));
    }
    Ok(format!("COUNT({})", column?))
}

fn compile_prefix_expr(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let expr = downcast::<Prefix>(node)?;
    Ok(format!("{} {}", expr.prefix(), compile.compile(&expr.expr, state)?))
}

fn compile_suffix_expr(compile: &Compile, node: &dyn Node, state: &mut CompileState) -> Result<String> {
    let expr = downcast::<Suffix>(node)?;
    let inner = compile.compile_with(&expr.expr, state, &CompileOptions::raw())?;
    Ok(format!("{} {}", inner, expr.suffix()))
}

/// A root compiler with handlers for every node type in this module, the
/// operator precedences and the SQL-1992 reserved words.
pub fn default_compiler() -> Compile {
    let compile = Compile::new();
    compile.when(&[SQL_TOKEN], compile_token);
    compile.when(&[LITERAL], compile_literal);
    compile.when(&[NULL], |_, _, _| Ok("NULL".to_owned()));
    compile.when(&[VARIABLE], compile_variable);
    compile.when(&[TABLE], compile_table);
    compile.when(&[COLUMN], compile_column);
    compile.when(&[ALIAS], compile_alias);
    compile.when(&[BINARY_OPER], compile_binary_oper);
    compile.when(&[NON_ASSOC], compile_non_assoc_binary_oper);
    compile.when(&[EQ, NE], compile_null_comparison);
    compile.when(&[IN], compile_in);
    compile.when(&[COMPOUND_OPER], compile_compound_oper);
    compile.when(&[FUNC], compile_func);
    compile.when(&[COUNT], compile_count);
    compile.when(&[PREFIX_EXPR], compile_prefix_expr);
    compile.when(&[SUFFIX_EXPR], compile_suffix_expr);

    compile.set_precedence(30, &[OR]);
    compile.set_precedence(40, &[AND]);
    compile.set_precedence(50, &[EQ, NE, GT, GE, LT, LE, LIKE, IN]);
    compile.set_precedence(60, &[LSHIFT, RSHIFT]);
    compile.set_precedence(70, &[ADD, SUB]);
    compile.set_precedence(80, &[MUL, DIV, MOD]);

    compile.add_reserved_words(RESERVED_WORDS.split_whitespace());
    compile
}
