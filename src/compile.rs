//! Hierarchical, type-dispatching renderer of expression trees to text.
//!
//! A [`Compile`] is a handle to one node of a compiler hierarchy. Every node
//! owns *local* tables (handlers, precedences and reserved words) and keeps
//! *effective* tables merged from its ancestors' local tables, root first,
//! with its own local tables applied last. Mutating a local table eagerly
//! recomputes the effective tables of the node and of every live descendant.
//!
//! The hierarchy lives in an arena shared by all handles derived from the
//! same root. Children keep their ancestors alive; a parent only lists the
//! indices of its live children. When the last handle of a childless node is
//! dropped the node leaves the arena and its parent forgets it, which may in
//! turn release the parent.
//!
//! Dispatch works on [`NodeTag`]s: a node reports its lineage, from its own
//! tag to the most generic one, and the first tag with a registered handler
//! wins. Precedence is looked up for the node's own tag only. A node whose
//! precedence is lower than the precedence in effect around it is wrapped in
//! parentheses.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::OtherHasher;
use crate::datatype::Value;
use crate::error::{Result, SquallError};
use crate::variable::Variable;

/// Precedence of nodes without an explicit one; such nodes are never
/// parenthesized.
pub const MAX_PRECEDENCE: i32 = 1000;

/// Stable identifier of a node type in the dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeTag(&'static str);

impl NodeTag {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that can appear in an expression tree.
pub trait Node: fmt::Debug + 'static {
    /// Tags from the most specific to the most generic. Never empty.
    fn lineage(&self) -> &'static [NodeTag];
    fn as_any(&self) -> &dyn Any;

    fn tag(&self) -> NodeTag {
        self.lineage().first().copied().unwrap_or(NodeTag("unknown"))
    }
}

/// Downcasts a node handed to a handler to the concrete type it expects.
pub fn downcast<T: Node>(node: &dyn Node) -> Result<&T> {
    node.as_any().downcast_ref::<T>().ok_or_else(|| {
        SquallError::Invariant(format!("expected {}, got {:?}", type_name::<T>(), node))
    })
}

#[derive(Debug, Clone)]
pub enum Expr {
    Node(Rc<dyn Node>),
    Seq(Vec<Expr>),
}

impl Expr {
    pub fn seq<I: IntoIterator<Item = Expr>>(items: I) -> Self {
        Expr::Seq(items.into_iter().collect())
    }
    pub fn as_node(&self) -> Option<&dyn Node> {
        match self {
            Expr::Node(node) => Some(node.as_ref()),
            Expr::Seq(_) => None,
        }
    }
    pub fn downcast_ref<T: Node>(&self) -> Option<&T> {
        self.as_node().and_then(|node| node.as_any().downcast_ref::<T>())
    }
    /// Identity comparison: the same nodes in the same shape.
    pub fn same(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Node(a), Expr::Node(b)) => Rc::ptr_eq(a, b),
            (Expr::Seq(a), Expr::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
            }
            _ => false,
        }
    }
    fn plain_text(&self) -> Option<&str> {
        self.downcast_ref::<Value>().and_then(Value::as_text)
    }
    fn passthrough(&self, raw: bool) -> Option<&str> {
        if let Some(sql) = self.downcast_ref::<SqlRaw>() {
            return Some(&sql.0);
        }
        if raw { self.plain_text() } else { None }
    }
}

impl<T: Node> From<T> for Expr {
    fn from(node: T) -> Self {
        Expr::Node(Rc::new(node))
    }
}

impl From<Vec<Expr>> for Expr {
    fn from(items: Vec<Expr>) -> Self {
        Expr::Seq(items)
    }
}

/// Text injected into the output without any processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlRaw(pub String);

/// A single identifier, quoted when needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlToken(pub String);

pub const SQL_RAW: NodeTag = NodeTag::new("sql-raw");
pub const SQL_TOKEN: NodeTag = NodeTag::new("sql-token");

impl Node for SqlRaw {
    fn lineage(&self) -> &'static [NodeTag] {
        &[SQL_RAW]
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Node for SqlToken {
    fn lineage(&self) -> &'static [NodeTag] {
        &[SQL_TOKEN]
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// What kind of SQL is expected where an expression is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Table,
    Expr,
    Column,
    ColumnPrefix,
    ColumnName,
}

/// Mutable data threaded through one top-level compilation.
#[derive(Debug, Default)]
pub struct CompileState {
    /// Precedence in effect, set and restored by the compiler.
    pub precedence: i32,
    /// Values bound to the `?` placeholders, in order of appearance.
    pub parameters: Vec<Variable>,
    context: Option<Context>,
    saved_contexts: Vec<Option<Context>>,
}

impl CompileState {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn context(&self) -> Option<Context> {
        self.context
    }
    /// Sets the context in a way that can be reverted with [`Self::pop_context`].
    pub fn push_context(&mut self, context: Context) {
        self.saved_contexts.push(self.context.replace(context));
    }
    pub fn pop_context(&mut self) {
        if let Some(previous) = self.saved_contexts.pop() {
            self.context = previous;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions<'a> {
    /// Placed between the elements of a sequence.
    pub join: &'a str,
    /// Plain strings pass through unprocessed.
    pub raw: bool,
    /// Plain strings are compiled as [`SqlToken`]s.
    pub token: bool,
}

impl Default for CompileOptions<'_> {
    fn default() -> Self {
        Self { join: ", ", raw: false, token: false }
    }
}

impl<'a> CompileOptions<'a> {
    pub fn join(join: &'a str) -> Self {
        Self { join, ..Self::default() }
    }
    pub fn raw() -> Self {
        Self { raw: true, ..Self::default() }
    }
    pub fn token() -> Self {
        Self { token: true, ..Self::default() }
    }
}

pub type Handler = Rc<dyn Fn(&Compile, &dyn Node, &mut CompileState) -> Result<String>>;

type Tables<V> = HashMap<NodeTag, V, OtherHasher>;

struct CompilerNode {
    // root first
    parents: Vec<usize>,
    children: Vec<usize>,
    handles: usize,
    local_dispatch: Tables<Handler>,
    local_precedence: Tables<i32>,
    local_reserved_words: HashMap<String, bool, OtherHasher>,
    dispatch: Tables<Handler>,
    precedence: Tables<i32>,
    reserved_words: HashMap<String, bool, OtherHasher>,
}

impl CompilerNode {
    fn new(parents: Vec<usize>) -> Self {
        Self {
            parents,
            children: Vec::new(),
            handles: 1,
            local_dispatch: HashMap::default(),
            local_precedence: HashMap::default(),
            local_reserved_words: HashMap::default(),
            dispatch: HashMap::default(),
            precedence: HashMap::default(),
            reserved_words: HashMap::default(),
        }
    }
}

#[derive(Default)]
struct Arena {
    nodes: Vec<Option<CompilerNode>>,
    free: Vec<usize>,
}

impl Arena {
    fn insert(&mut self, node: CompilerNode) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }
    // a live handle keeps its node and every ancestor in the arena
    fn node(&self, id: usize) -> &CompilerNode {
        self.nodes[id].as_ref().expect("compiler handle outlived its node")
    }
    fn node_mut(&mut self, id: usize) -> &mut CompilerNode {
        self.nodes[id].as_mut().expect("compiler handle outlived its node")
    }
    fn live(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    fn update_cache(&mut self, id: usize) {
        let mut dispatch: Tables<Handler> = HashMap::default();
        let mut precedence: Tables<i32> = HashMap::default();
        let mut reserved_words: HashMap<String, bool, OtherHasher> = HashMap::default();
        let node = self.node(id);
        for &source in node.parents.iter().chain(std::iter::once(&id)) {
            let source = self.node(source);
            dispatch.extend(source.local_dispatch.iter().map(|(t, h)| (*t, Rc::clone(h))));
            precedence.extend(source.local_precedence.iter().map(|(t, p)| (*t, *p)));
            reserved_words.extend(source.local_reserved_words.iter().map(|(w, r)| (w.clone(), *r)));
        }
        let node = self.node_mut(id);
        node.dispatch = dispatch;
        node.precedence = precedence;
        node.reserved_words = reserved_words;
        let children = node.children.clone();
        for child in children {
            self.update_cache(child);
        }
    }

    fn create_child(&mut self, parent: usize) -> usize {
        let mut parents = self.node(parent).parents.clone();
        parents.push(parent);
        let id = self.insert(CompilerNode::new(parents));
        self.node_mut(parent).children.push(id);
        self.update_cache(id);
        id
    }

    /// Drops one handle of `id`; returns the nodes that left the arena so the
    /// caller can drop them once the arena is no longer borrowed.
    fn release_handle(&mut self, id: usize) -> Vec<CompilerNode> {
        self.node_mut(id).handles -= 1;
        let mut released = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.node(id);
            if node.handles > 0 || !node.children.is_empty() {
                break;
            }
            let Some(node) = self.nodes[id].take() else { break };
            self.free.push(id);
            current = node.parents.last().copied();
            if let Some(parent) = current {
                self.node_mut(parent).children.retain(|child| *child != id);
            }
            released.push(node);
        }
        released
    }
}

/// Handle to one compiler of a hierarchy.
pub struct Compile {
    arena: Rc<RefCell<Arena>>,
    id: usize,
}

impl Compile {
    /// A new root compiler without any handlers.
    pub fn new() -> Self {
        let mut arena = Arena::default();
        let id = arena.insert(CompilerNode::new(Vec::new()));
        Self { arena: Rc::new(RefCell::new(arena)), id }
    }

    /// A compiler inheriting everything registered on this one, now and later.
    pub fn create_child(&self) -> Compile {
        let id = self.arena.borrow_mut().create_child(self.id);
        debug!(parent = self.id, child = id, "created child compiler");
        Compile { arena: Rc::clone(&self.arena), id }
    }

    /// Registers `handler` for every tag in `tags`.
    pub fn when<F>(&self, tags: &[NodeTag], handler: F)
    where
        F: Fn(&Compile, &dyn Node, &mut CompileState) -> Result<String> + 'static,
    {
        self.when_handler(tags, Rc::new(handler));
    }

    pub fn when_handler(&self, tags: &[NodeTag], handler: Handler) {
        let replaced: Vec<Handler> = {
            let mut arena = self.arena.borrow_mut();
            let node = arena.node_mut(self.id);
            let replaced = tags
                .iter()
                .filter_map(|tag| node.local_dispatch.insert(*tag, Rc::clone(&handler)))
                .collect();
            arena.update_cache(self.id);
            replaced
        };
        debug!(compiler = self.id, tags = ?tags, "registered handler");
        drop(replaced);
    }

    pub fn set_precedence(&self, precedence: i32, tags: &[NodeTag]) {
        let mut arena = self.arena.borrow_mut();
        let node = arena.node_mut(self.id);
        for tag in tags {
            node.local_precedence.insert(*tag, precedence);
        }
        arena.update_cache(self.id);
    }

    pub fn get_precedence(&self, tag: NodeTag) -> i32 {
        let arena = self.arena.borrow();
        arena.node(self.id).precedence.get(&tag).copied().unwrap_or(MAX_PRECEDENCE)
    }

    pub fn add_reserved_words<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mark_reserved_words(words, true);
    }

    /// Un-reserves words for this compiler and its descendants, even when an
    /// ancestor reserves them.
    pub fn remove_reserved_words<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mark_reserved_words(words, false);
    }

    fn mark_reserved_words<I, S>(&self, words: I, reserved: bool)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut arena = self.arena.borrow_mut();
        let node = arena.node_mut(self.id);
        for word in words {
            node.local_reserved_words.insert(word.as_ref().to_lowercase(), reserved);
        }
        arena.update_cache(self.id);
    }

    pub fn is_reserved_word(&self, word: &str) -> bool {
        let arena = self.arena.borrow();
        arena
            .node(self.id)
            .reserved_words
            .get(&word.to_lowercase())
            .copied()
            .unwrap_or(false)
    }

    /// Number of children currently alive.
    pub fn live_children(&self) -> usize {
        self.arena.borrow().node(self.id).children.len()
    }

    /// Number of compilers alive in this hierarchy.
    pub fn hierarchy_size(&self) -> usize {
        self.arena.borrow().live()
    }

    /// Compiles with a fresh state and default options.
    pub fn render(&self, expr: &Expr) -> Result<String> {
        self.compile(expr, &mut CompileState::new())
    }

    pub fn compile(&self, expr: &Expr, state: &mut CompileState) -> Result<String> {
        self.compile_with(expr, state, &CompileOptions::default())
    }

    pub fn compile_with(
        &self,
        expr: &Expr,
        state: &mut CompileState,
        options: &CompileOptions,
    ) -> Result<String> {
        if let Some(text) = expr.passthrough(options.raw) {
            return Ok(text.to_owned());
        }
        let outer_precedence = state.precedence;
        let statement = match expr {
            Expr::Seq(items) => {
                let mut compiled = Vec::with_capacity(items.len());
                for item in items {
                    let statement = if let Some(text) = item.passthrough(options.raw) {
                        text.to_owned()
                    } else if let Expr::Seq(_) = item {
                        state.precedence = outer_precedence;
                        self.compile_with(item, state, options)?
                    } else {
                        self.compile_item(item, state, outer_precedence, options.token)?
                    };
                    compiled.push(statement);
                }
                compiled.join(options.join)
            }
            Expr::Node(_) => self.compile_item(expr, state, outer_precedence, options.token)?,
        };
        state.precedence = outer_precedence;
        Ok(statement)
    }

    fn compile_item(
        &self,
        expr: &Expr,
        state: &mut CompileState,
        outer_precedence: i32,
        token: bool,
    ) -> Result<String> {
        if token {
            if let Some(text) = expr.plain_text() {
                let token = SqlToken(text.to_owned());
                return self.compile_single(&token, state, outer_precedence);
            }
        }
        match expr.as_node() {
            Some(node) => self.compile_single(node, state, outer_precedence),
            None => Err(SquallError::Invariant("sequence compiled as a single node".into())),
        }
    }

    fn compile_single(
        &self,
        node: &dyn Node,
        state: &mut CompileState,
        outer_precedence: i32,
    ) -> Result<String> {
        let (handler, inner_precedence) = self.lookup(node)?;
        state.precedence = inner_precedence;
        let statement = handler(self, node, state)?;
        if inner_precedence < outer_precedence {
            return Ok(format!("({})", statement));
        }
        Ok(statement)
    }

    fn lookup(&self, node: &dyn Node) -> Result<(Handler, i32)> {
        let arena = self.arena.borrow();
        let compiler = arena.node(self.id);
        let handler = node
            .lineage()
            .iter()
            .find_map(|tag| compiler.dispatch.get(tag))
            .ok_or_else(|| SquallError::Compile {
                type_name: node.tag().name().to_owned(),
                repr: format!("{:?}", node),
            })?;
        let precedence = compiler.precedence.get(&node.tag()).copied().unwrap_or(MAX_PRECEDENCE);
        Ok((Rc::clone(handler), precedence))
    }
}

impl Default for Compile {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Compile {
    fn clone(&self) -> Self {
        self.arena.borrow_mut().node_mut(self.id).handles += 1;
        Self { arena: Rc::clone(&self.arena), id: self.id }
    }
}

impl Drop for Compile {
    fn drop(&mut self) {
        let released = self.arena.borrow_mut().release_handle(self.id);
        if !released.is_empty() {
            debug!(compiler = self.id, released = released.len(), "released compilers");
        }
    }
}

impl PartialEq for Compile {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.arena, &other.arena) && self.id == other.id
    }
}

impl fmt::Debug for Compile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let arena = self.arena.borrow();
        let node = arena.node(self.id);
        f.debug_struct("Compile")
            .field("id", &self.id)
            .field("parents", &node.parents)
            .field("children", &node.children)
            .field("handlers", &node.dispatch.len())
            .finish()
    }
}
