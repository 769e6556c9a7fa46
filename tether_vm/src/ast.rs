/// Syntax tree produced by the [`Parser`](crate::parser::Parser).
///
/// Names are interned while parsing, so every identifier in the tree is a
/// [`Sym`] of the symbol table shared with the state that will run it.
/// Method and block bodies are reference counted: a `def` evaluated many
/// times, or a block turned into many procs, shares a single body.
use std::rc::Rc;

use crate::{Float, Sym, span::Pos};

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: Pos,
}

impl Node {
    pub fn new(kind: NodeKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    pub fn nil(pos: Pos) -> Self {
        Self::new(NodeKind::Nil, pos)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ── Literals ──────────────────────────────────────────────
    Nil,
    True,
    False,
    SelfRef,
    Integer(i64),
    Float(Float),
    String(String),
    /// `"a#{b}c"`: parts are concatenated after `to_s`.
    Interpolated(Vec<Node>),
    Symbol(Sym),
    Array(Vec<Node>),
    Hash(Vec<(Node, Node)>),

    // ── Variables ─────────────────────────────────────────────
    Local(Sym),
    LocalSet(Sym, Box<Node>),
    IVar(Sym),
    IVarSet(Sym, Box<Node>),
    GVar(Sym),
    GVarSet(Sym, Box<Node>),
    /// `Foo`, `A::Foo` or `::Foo`.
    Const(ConstPath),
    ConstSet(ConstPath, Box<Node>),

    // ── Calls ─────────────────────────────────────────────────
    Call(Box<Call>),
    /// `*expr` inside an argument or array list.
    Splat(Box<Node>),
    Yield(Vec<Node>),

    // ── Control flow ──────────────────────────────────────────
    Seq(Vec<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
        /// `until` loops run while the condition is falsy.
        negate: bool,
    },
    Begin(Box<Begin>),
    Return(Option<Box<Node>>),
    Break(Option<Box<Node>>),
    Next(Option<Box<Node>>),
    /// `a ||= b`, `a &&= b`, `a += b`, ...
    OpAssign {
        target: Box<Node>,
        op: AssignOp,
        value: Box<Node>,
    },

    // ── Definitions ───────────────────────────────────────────
    Def {
        /// `def self.foo` or `def Const.foo`.
        singleton: Option<Box<Node>>,
        def: Rc<MethodDef>,
    },
    ClassDef {
        path: ConstPath,
        superclass: Option<Box<Node>>,
        body: Box<Node>,
    },
    ModuleDef {
        path: ConstPath,
        body: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstPath {
    pub scope: ConstScope,
    pub name: Sym,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstScope {
    /// Resolved through lexical nesting and ancestors.
    Lexical,
    /// `::Foo`
    Top,
    /// `expr::Foo`
    Under(Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub receiver: Option<Node>,
    pub method: Sym,
    pub args: Vec<Node>,
    pub block: Option<BlockArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockArg {
    /// `{ |x| ... }` or `do |x| ... end`
    Literal(Rc<BlockBody>),
    /// `&expr`
    Pass(Box<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Or,
    And,
    /// Binary operator method, e.g. `+` for `+=`.
    Binary(Sym),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Begin {
    pub body: Node,
    pub rescues: Vec<Rescue>,
    pub otherwise: Option<Node>,
    pub ensure: Option<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rescue {
    /// Empty means `StandardError`.
    pub classes: Vec<Node>,
    pub binding: Option<Sym>,
    pub body: Node,
}

/// Parameter list shared by methods and blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub required: Vec<Sym>,
    pub optional: Vec<(Sym, Node)>,
    pub rest: Option<Sym>,
    pub block: Option<Sym>,
}

impl Params {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
            && self.optional.is_empty()
            && self.rest.is_none()
            && self.block.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: Sym,
    pub params: Params,
    pub body: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockBody {
    pub params: Params,
    pub body: Node,
}
