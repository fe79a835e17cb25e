//! Syntax tree produced by the parser and consumed by the emitter.
//!
//! Names are already resolved when a node is built: every variable reference
//! carries a [`SymbolRef`] saying whether it is a local slot, an upvalue or a
//! global looked up through some environment.

use crate::proto::UpvalDesc;
use crate::token::Span;
use lunette_core::string::StringId;

/// Index into [`FunctionDef::locals`].
pub type LocalId = u32;
/// Index into [`FunctionDef::gotos`].
pub type GotoId = u32;
/// Index into [`FunctionDef::labels`].
pub type LabelId = u32;

/// How a name was resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum SymbolRef {
    /// A local of the current function, living in stack slot `slot`.
    Local {
        slot: u16,
        id: LocalId,
        name: StringId,
    },
    /// An upvalue of the current function.
    Upvalue { index: u16, name: StringId },
    /// A free name, looked up as a field of the environment `env`.
    Global { name: StringId, env: Box<SymbolRef> },
    /// The VM's globals table, used when no `_ENV` is in scope
    /// (dynamic expressions).
    DefaultEnv,
}

impl SymbolRef {
    pub fn name(&self) -> Option<StringId> {
        match self {
            SymbolRef::Local { name, .. }
            | SymbolRef::Upvalue { name, .. }
            | SymbolRef::Global { name, .. } => Some(*name),
            SymbolRef::DefaultEnv => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LocalAttrib {
    #[default]
    None,
    Const,
    Close,
}

/// Compile-time facts about one local variable.
#[derive(Clone, Debug)]
pub struct LocalVarInfo {
    pub name: StringId,
    pub slot: u16,
    pub attrib: LocalAttrib,
    /// Referenced by a nested function, so leaving its scope must close an upvalue.
    pub captured: bool,
    pub line: u32,
}

impl LocalVarInfo {
    /// Leaving this local's scope needs a close instruction.
    pub fn needs_close(&self) -> bool {
        self.captured || self.attrib == LocalAttrib::Close
    }
}

/// Slot range a block owns at run time, with the slots whose values must be
/// closed (`__close`) when the block is left.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeScopeBlock {
    pub from: u16,
    /// Inclusive end; `None` when the block declares no locals.
    pub to_inclusive: Option<u16>,
    pub to_be_closed: Vec<u16>,
    /// Some local of the block is captured or to-be-closed.
    pub needs_close: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Shl,
    Shr,
    BAnd,
    BOr,
    BXor,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinOp {
    /// (left priority, right priority); right < left means right-associative.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq | BinOp::NotEq | BinOp::Eq => (3, 3),
            BinOp::BOr => (4, 4),
            BinOp::BXor => (5, 5),
            BinOp::BAnd => (6, 6),
            BinOp::Shl | BinOp::Shr => (7, 7),
            BinOp::Concat => (9, 8),
            BinOp::Add | BinOp::Sub => (10, 10),
            BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
            BinOp::Pow => (14, 13),
        }
    }

    /// Operators that only exist from Lua 5.3 on.
    pub fn needs_53(self) -> bool {
        matches!(
            self,
            BinOp::IDiv | BinOp::Shl | BinOp::Shr | BinOp::BAnd | BinOp::BOr | BinOp::BXor
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "..",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BAnd => "&",
            BinOp::BOr => "|",
            BinOp::BXor => "~",
            BinOp::Eq => "==",
            BinOp::NotEq => "~=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BNot,
    Not,
    Len,
}

/// Priority of all unary operators.
pub const UNARY_PRIORITY: u8 = 12;

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    pub fn line(&self) -> u32 {
        self.span.line
    }

    /// Calls and `...` can produce any number of values.
    pub fn is_multi(&self) -> bool {
        matches!(self.kind, ExprKind::Call(_) | ExprKind::VarArgs)
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Integer(i64),
    Float(f64),
    Str(StringId),
    VarArgs,
    Symbol(SymbolRef),
    Index { obj: Box<Expr>, key: Box<Expr> },
    Call(Box<CallExpr>),
    Function(Box<FunctionDef>),
    Table(Vec<TableField>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
    /// Parenthesized expression: truncates multiple results to one.
    Paren(Box<Expr>),
}

#[derive(Clone, Debug)]
pub struct CallExpr {
    pub func: Expr,
    /// `obj:name(...)` call: `func` is the receiver.
    pub method: Option<StringId>,
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub enum TableField {
    Positional(Expr),
    Named(StringId, Expr),
    Keyed(Expr, Expr),
}

#[derive(Clone, Debug)]
pub struct Block {
    pub stats: Vec<Stat>,
    pub scope: RuntimeScopeBlock,
}

#[derive(Clone, Debug)]
pub struct Stat {
    pub kind: StatKind,
    pub line: u32,
}

#[derive(Clone, Debug)]
pub enum StatKind {
    Local {
        locals: Vec<LocalId>,
        exprs: Vec<Expr>,
    },
    Assign {
        targets: Vec<Expr>,
        exprs: Vec<Expr>,
    },
    Call(Expr),
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    If {
        clauses: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },
    /// Hidden control slots are `base`, `base+1`, `base+2`; the loop
    /// variable is `base+3` and lives in `body`.
    NumericFor {
        base: u16,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
        scope: RuntimeScopeBlock,
    },
    /// Hidden slots are iterator, state, control and closing value
    /// (`base..base+4`); the loop variables follow in `body`.
    GenericFor {
        base: u16,
        num_vars: u16,
        exprs: Vec<Expr>,
        body: Block,
        scope: RuntimeScopeBlock,
    },
    LocalFunction {
        local: LocalId,
        func: Box<FunctionDef>,
    },
    Return {
        exprs: Vec<Expr>,
        /// A lone call may reuse the frame (no to-be-closed locals active).
        tail_call: bool,
    },
    /// `exits` lists the locals left by jumping out of the innermost loop.
    Break {
        exits: Vec<LocalId>,
    },
    Goto(GotoId),
    Label(LabelId),
}

/// A `goto` and where it leads.
#[derive(Clone, Debug)]
pub struct GotoInfo {
    pub name: StringId,
    pub line: u32,
    /// Locals active at the goto, innermost last.
    pub active: Vec<LocalId>,
    pub target: Option<LabelId>,
}

#[derive(Clone, Debug)]
pub struct LabelInfo {
    pub name: StringId,
    pub line: u32,
    /// Number of locals in scope at the label.
    pub active_count: u16,
}

/// One function body with everything the emitter needs.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub line: u32,
    pub end_line: u32,
    pub num_params: u16,
    pub is_vararg: bool,
    pub body: Block,
    pub locals: Vec<LocalVarInfo>,
    pub upvalues: Vec<UpvalDesc>,
    pub max_slots: u16,
    pub gotos: Vec<GotoInfo>,
    pub labels: Vec<LabelInfo>,
}
