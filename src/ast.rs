//! The AST produced by the [`parser`](crate::parser) and consumed directly
//! by the tree-walking [`eval`](crate::eval) module — there is no bytecode
//! lowering step in this engine.

use std::ops::Deref;

use crate::tokens::Span;
use crate::value::Value;

/// Wraps a node with its source span.
///
/// Boxing keeps enum variants small regardless of how large an individual
/// node gets, and gives every node a stable address that the inheritance
/// resolver can borrow block bodies from without cloning them.
#[derive(Debug)]
pub struct Spanned<T> {
    node: Box<T>,
    span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Spanned<T> {
        Spanned {
            node: Box::new(node),
            span,
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn into_inner(self) -> T {
        *self.node
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

/// A statement node.
#[derive(Debug)]
pub enum Stmt<'a> {
    EmitExpr(Spanned<EmitExpr<'a>>),
    EmitRaw(Spanned<EmitRaw<'a>>),
    ForLoop(Spanned<ForLoop<'a>>),
    IfCond(Spanned<IfCond<'a>>),
    WithBlock(Spanned<WithBlock<'a>>),
    Set(Spanned<Set<'a>>),
    SetBlock(Spanned<SetBlock<'a>>),
    Block(Spanned<Block<'a>>),
    AutoEscape(Spanned<AutoEscape<'a>>),
    FilterBlock(Spanned<FilterBlock<'a>>),
    Import(Spanned<Import<'a>>),
    FromImport(Spanned<FromImport<'a>>),
    Extends(Spanned<Extends<'a>>),
    Include(Spanned<Include<'a>>),
    Macro(Spanned<Macro<'a>>),
    CallBlock(Spanned<CallBlock<'a>>),
    Do(Spanned<Do<'a>>),
    Break(Span),
    Continue(Span),
    /// A statement contributed by an unrecognized `{% tag %}` name,
    /// dispatched to the extension registry at parse time.
    Extension(Spanned<Extension<'a>>),
}

/// The root of a parsed template.
#[derive(Debug)]
pub struct Template<'a> {
    pub children: Vec<Stmt<'a>>,
}

#[derive(Debug)]
pub struct ForLoop<'a> {
    /// One or more comma separated binding names; more than one means the
    /// loop unpacks each item as a tuple.
    pub target: Vec<&'a str>,
    pub iter: Expr<'a>,
    pub body: Vec<Stmt<'a>>,
    pub else_body: Vec<Stmt<'a>>,
    pub recursive: bool,
}

#[derive(Debug)]
pub struct IfCond<'a> {
    /// `(condition, body)` pairs in source order; `{% elif %}` just adds
    /// another pair. The final fallback, if any, is `else_body`.
    pub branches: Vec<(Expr<'a>, Vec<Stmt<'a>>)>,
    pub else_body: Vec<Stmt<'a>>,
}

#[derive(Debug)]
pub struct WithBlock<'a> {
    pub assignments: Vec<(AssignTarget<'a>, Expr<'a>)>,
    pub body: Vec<Stmt<'a>>,
}

#[derive(Debug)]
pub struct Set<'a> {
    pub target: AssignTarget<'a>,
    pub expr: Expr<'a>,
}

#[derive(Debug)]
pub struct SetBlock<'a> {
    pub target: AssignTarget<'a>,
    pub filters: Vec<FilterCall<'a>>,
    pub body: Vec<Stmt<'a>>,
}

/// The left-hand side of `{% set %}`/`{% for %}`/`{% with %}`: a single name
/// or a tuple-unpacking pattern (`a, b`).
#[derive(Debug)]
pub enum AssignTarget<'a> {
    Name(&'a str),
    Tuple(Vec<&'a str>),
}

#[derive(Debug)]
pub struct Block<'a> {
    pub name: &'a str,
    pub body: Vec<Stmt<'a>>,
    pub scoped: bool,
}

#[derive(Debug)]
pub struct Extends<'a> {
    pub name: Expr<'a>,
}

#[derive(Debug)]
pub struct Include<'a> {
    pub name: Expr<'a>,
    pub with_context: bool,
    pub ignore_missing: bool,
}

#[derive(Debug)]
pub struct AutoEscape<'a> {
    pub enabled: Expr<'a>,
    pub body: Vec<Stmt<'a>>,
}

#[derive(Debug)]
pub struct FilterBlock<'a> {
    pub filters: Vec<FilterCall<'a>>,
    pub body: Vec<Stmt<'a>>,
}

#[derive(Debug)]
pub struct FilterCall<'a> {
    pub name: &'a str,
    pub args: Vec<Expr<'a>>,
    pub kwargs: Vec<(&'a str, Expr<'a>)>,
}

#[derive(Debug)]
pub struct Macro<'a> {
    pub name: &'a str,
    pub args: Vec<&'a str>,
    pub defaults: Vec<Option<Expr<'a>>>,
    pub body: Vec<Stmt<'a>>,
}

/// `{% call macro(args) %}body{% endcall %}`: the body becomes the macro's
/// `caller()`. `params` are the optional `{% call(x, y) ... %}` names that
/// `caller(...)`'s own arguments bind to inside the body.
#[derive(Debug)]
pub struct CallBlock<'a> {
    pub call: Call<'a>,
    pub params: Vec<&'a str>,
    pub body: Vec<Stmt<'a>>,
}

#[derive(Debug)]
pub struct FromImport<'a> {
    pub expr: Expr<'a>,
    pub names: Vec<(&'a str, Option<&'a str>)>,
}

#[derive(Debug)]
pub struct Import<'a> {
    pub expr: Expr<'a>,
    pub name: &'a str,
}

#[derive(Debug)]
pub struct EmitExpr<'a> {
    pub expr: Expr<'a>,
}

#[derive(Debug)]
pub struct EmitRaw<'a> {
    pub raw: &'a str,
}

#[derive(Debug)]
pub struct Do<'a> {
    pub expr: Expr<'a>,
}

#[derive(Debug)]
pub struct Extension<'a> {
    pub name: &'a str,
    pub payload: Vec<Stmt<'a>>,
}

/// An expression node.
#[derive(Debug)]
pub enum Expr<'a> {
    Var(Spanned<Var<'a>>),
    Const(Spanned<Const>),
    Slice(Spanned<Slice<'a>>),
    UnaryOp(Spanned<UnaryOp<'a>>),
    BinOp(Spanned<BinOp<'a>>),
    IfExpr(Spanned<IfExpr<'a>>),
    Filter(Spanned<Filter<'a>>),
    Test(Spanned<Test<'a>>),
    GetAttr(Spanned<GetAttr<'a>>),
    GetItem(Spanned<GetItem<'a>>),
    Call(Spanned<Call<'a>>),
    List(Spanned<ListLit<'a>>),
    Tuple(Spanned<TupleLit<'a>>),
    Map(Spanned<MapLit<'a>>),
    SetLit(Spanned<SetLitExpr<'a>>),
    Comprehension(Spanned<Comprehension<'a>>),
    Super(Span),
}

impl<'a> Expr<'a> {
    pub fn span(&self) -> Span {
        match self {
            Expr::Var(s) => s.span(),
            Expr::Const(s) => s.span(),
            Expr::Slice(s) => s.span(),
            Expr::UnaryOp(s) => s.span(),
            Expr::BinOp(s) => s.span(),
            Expr::IfExpr(s) => s.span(),
            Expr::Filter(s) => s.span(),
            Expr::Test(s) => s.span(),
            Expr::GetAttr(s) => s.span(),
            Expr::GetItem(s) => s.span(),
            Expr::Call(s) => s.span(),
            Expr::List(s) => s.span(),
            Expr::Tuple(s) => s.span(),
            Expr::Map(s) => s.span(),
            Expr::SetLit(s) => s.span(),
            Expr::Comprehension(s) => s.span(),
            Expr::Super(s) => *s,
        }
    }
}

#[derive(Debug)]
pub struct Var<'a> {
    pub id: &'a str,
}

#[derive(Debug)]
pub struct Const {
    pub value: Value,
}

#[derive(Debug)]
pub struct Slice<'a> {
    pub expr: Expr<'a>,
    pub start: Option<Expr<'a>>,
    pub stop: Option<Expr<'a>>,
    pub step: Option<Expr<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub enum UnaryOpKind {
    Not,
    Neg,
    Pos,
}

#[derive(Debug)]
pub struct UnaryOp<'a> {
    pub op: UnaryOpKind,
    pub expr: Expr<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    ScAnd,
    ScOr,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Concat,
    In,
    NotIn,
}

#[derive(Debug)]
pub struct BinOp<'a> {
    pub op: BinOpKind,
    pub left: Expr<'a>,
    pub right: Expr<'a>,
}

#[derive(Debug)]
pub struct IfExpr<'a> {
    pub test_expr: Expr<'a>,
    pub true_expr: Expr<'a>,
    pub false_expr: Option<Expr<'a>>,
}

#[derive(Debug)]
pub struct Filter<'a> {
    pub name: &'a str,
    pub expr: Expr<'a>,
    pub args: Vec<Expr<'a>>,
    pub kwargs: Vec<(&'a str, Expr<'a>)>,
}

#[derive(Debug)]
pub struct Test<'a> {
    pub name: &'a str,
    pub expr: Expr<'a>,
    pub args: Vec<Expr<'a>>,
    pub negated: bool,
}

#[derive(Debug)]
pub struct GetAttr<'a> {
    pub expr: Expr<'a>,
    pub name: &'a str,
}

#[derive(Debug)]
pub struct GetItem<'a> {
    pub expr: Expr<'a>,
    pub subscript: Expr<'a>,
}

#[derive(Debug)]
pub struct Call<'a> {
    pub expr: Expr<'a>,
    pub args: Vec<Expr<'a>>,
    pub kwargs: Vec<(&'a str, Expr<'a>)>,
}

#[derive(Debug)]
pub struct ListLit<'a> {
    pub items: Vec<Expr<'a>>,
}

#[derive(Debug)]
pub struct TupleLit<'a> {
    pub items: Vec<Expr<'a>>,
}

#[derive(Debug)]
pub struct MapLit<'a> {
    pub keys: Vec<Expr<'a>>,
    pub values: Vec<Expr<'a>>,
}

#[derive(Debug)]
pub struct SetLitExpr<'a> {
    pub items: Vec<Expr<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
}

#[derive(Debug)]
pub struct Comprehension<'a> {
    pub kind: ComprehensionKind,
    pub target: AssignTarget<'a>,
    pub iter: Expr<'a>,
    pub filter: Option<Expr<'a>>,
    pub key: Option<Expr<'a>>,
    pub element: Expr<'a>,
}

/// Classifies a [`Call`] expression the way the evaluator needs to dispatch
/// it: a bare name, a `self.block_name()` reference to an enclosing block
/// (used by `{% block %}...{{ self.other_block() }}`), a method call on an
/// object, or calling an arbitrary expression's result.
pub enum CallType<'ast, 'source> {
    Function(&'source str),
    Method(&'ast Expr<'source>, &'source str),
    Block(&'source str),
    Object(&'ast Expr<'source>),
}

impl<'a> Call<'a> {
    pub fn identify_call(&self) -> CallType<'_, 'a> {
        match &self.expr {
            Expr::Var(var) => CallType::Function(var.id),
            Expr::GetAttr(attr) => {
                if let Expr::Var(var) = &attr.expr {
                    if var.id == "self" {
                        return CallType::Block(attr.name);
                    }
                }
                CallType::Method(&attr.expr, attr.name)
            }
            other => CallType::Object(other),
        }
    }
}
