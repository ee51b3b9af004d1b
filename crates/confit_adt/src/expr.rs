//! The conjunct expression tree.
//!
//! Expressions are produced by the external translator and are immutable from
//! then on; conjuncts share them through `Arc`. The engine evaluates them in
//! their captured environment. `Expr::Vertex` and `Expr::Resolved` are
//! engine-internal: they are synthesized when an already-evaluated result
//! re-enters unification (reference resolution, disjunction distribution).

use crate::feature::{ArcType, Feature};
use crate::kind::Kind;
use crate::value::Value;
use crate::vertex::VertexId;
use std::sync::Arc;

/// Binary bound operator (`>x`, `>=x`, `<x`, `<=x`, `!=x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundOp {
    Gt,
    Ge,
    Lt,
    Le,
    Ne,
}

impl BoundOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BoundOp::Gt => ">",
            BoundOp::Ge => ">=",
            BoundOp::Lt => "<",
            BoundOp::Le => "<=",
            BoundOp::Ne => "!=",
        }
    }

    pub fn is_lower(self) -> bool {
        matches!(self, BoundOp::Gt | BoundOp::Ge)
    }

    pub fn is_upper(self) -> bool {
        matches!(self, BoundOp::Lt | BoundOp::Le)
    }

    pub fn is_strict(self) -> bool {
        matches!(self, BoundOp::Gt | BoundOp::Lt)
    }
}

/// Binary operator on concrete values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
        }
    }
}

/// One branch of a disjunction, optionally marked as a default (`*expr`).
#[derive(Debug, Clone)]
pub struct Disjunct {
    pub expr: Arc<Expr>,
    pub default: bool,
}

impl Disjunct {
    pub fn new(expr: Arc<Expr>) -> Self {
        Self {
            expr,
            default: false,
        }
    }

    pub fn default(expr: Arc<Expr>) -> Self {
        Self {
            expr,
            default: true,
        }
    }
}

/// One declaration inside a struct literal.
#[derive(Debug, Clone)]
pub enum Decl {
    /// A field declaration, with its presence classification.
    Field {
        label: Feature,
        arc: ArcType,
        value: Arc<Expr>,
    },
    /// An embedded expression whose result merges into the enclosing struct.
    Embed(Arc<Expr>),
    /// A struct-level `let`; lazily bound, excluded from output.
    Let { name: String, value: Arc<Expr> },
}

/// A struct literal. `closed` is set by the translator for `close(...)` and
/// for struct bodies that derive from a definition.
#[derive(Debug, Clone, Default)]
pub struct StructLit {
    pub decls: Vec<Decl>,
    pub closed: bool,
}

impl StructLit {
    pub fn new(decls: Vec<Decl>) -> Self {
        Self {
            decls,
            closed: false,
        }
    }

    pub fn closed(decls: Vec<Decl>) -> Self {
        Self {
            decls,
            closed: true,
        }
    }

    /// Features this literal declares, used for closedness checking.
    pub fn declared_features(&self) -> impl Iterator<Item = &Feature> {
        self.decls.iter().filter_map(|decl| match decl {
            Decl::Field { label, .. } => Some(label),
            _ => None,
        })
    }
}

/// A list literal. `ellipsis` distinguishes fixed-length lists (`None`) from
/// open lists: `Some(None)` is `[..., ]` with unconstrained tail elements and
/// `Some(Some(t))` is `[...t]`.
#[derive(Debug, Clone)]
pub struct ListLit {
    pub elems: Vec<Arc<Expr>>,
    pub ellipsis: Option<Option<Arc<Expr>>>,
}

impl ListLit {
    pub fn new(elems: Vec<Arc<Expr>>) -> Self {
        Self {
            elems,
            ellipsis: None,
        }
    }

    pub fn open(elems: Vec<Arc<Expr>>, elem: Option<Arc<Expr>>) -> Self {
        Self {
            elems,
            ellipsis: Some(elem),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ellipsis.is_some()
    }
}

/// One clause of a comprehension chain.
#[derive(Debug, Clone)]
pub enum Clause {
    /// `for [key,] value in source`.
    For {
        key: Option<String>,
        value: String,
        source: Arc<Expr>,
    },
    /// `if cond`.
    If(Arc<Expr>),
    /// `let name = expr`, bound lazily per iteration.
    Let { name: String, value: Arc<Expr> },
}

/// A comprehension: a clause chain terminated by a body struct, with an
/// optional `else` body yielded when the chain produced zero results.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub clauses: Vec<Clause>,
    pub body: Arc<Expr>,
    pub else_body: Option<Arc<Expr>>,
}

impl Comprehension {
    pub fn new(clauses: Vec<Clause>, body: Arc<Expr>) -> Self {
        Self {
            clauses,
            body,
            else_body: None,
        }
    }

    pub fn with_else(mut self, body: Arc<Expr>) -> Self {
        self.else_body = Some(body);
        self
    }

    /// Names the clause chain introduces. These are poisoned inside the
    /// `else` environment: the `else` body runs in the scope enclosing the
    /// comprehension and must not see iteration bindings.
    pub fn bound_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for clause in &self.clauses {
            match clause {
                Clause::For { key, value, .. } => {
                    if let Some(key) = key {
                        names.push(key.clone());
                    }
                    names.push(value.clone());
                }
                Clause::Let { name, .. } => names.push(name.clone()),
                Clause::If(_) => {}
            }
        }
        names
    }
}

/// An unevaluated expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A type as a value: `int`, `string`, `number`, `_`.
    Type(Kind),
    /// A unary bound: `>=operand`.
    Bound { op: BoundOp, operand: Arc<Expr> },
    Struct(StructLit),
    List(ListLit),
    Disjunction(Vec<Disjunct>),
    Comprehension(Comprehension),
    /// Lexical reference, resolved through the environment chain.
    Ref(String),
    /// Field selection on an evaluated base.
    Select { base: Arc<Expr>, feature: Feature },
    /// Index into an evaluated list (or string-keyed struct).
    Index { base: Arc<Expr>, index: Arc<Expr> },
    /// Opaque builtin invocation.
    Call { builtin: String, args: Vec<Arc<Expr>> },
    BinOp {
        op: Op,
        lhs: Arc<Expr>,
        rhs: Arc<Expr>,
    },
    /// Engine-internal: a deferred re-entry of another vertex's result.
    Vertex(VertexId),
    /// Engine-internal: an already-evaluated value re-entering unification.
    Resolved(Value),
}

impl Expr {
    pub fn int(v: i64) -> Arc<Expr> {
        Arc::new(Expr::Int(v))
    }

    pub fn float(v: f64) -> Arc<Expr> {
        Arc::new(Expr::Float(v))
    }

    pub fn bool(v: bool) -> Arc<Expr> {
        Arc::new(Expr::Bool(v))
    }

    pub fn str(v: impl Into<String>) -> Arc<Expr> {
        Arc::new(Expr::Str(v.into()))
    }

    pub fn null() -> Arc<Expr> {
        Arc::new(Expr::Null)
    }

    pub fn typ(kind: Kind) -> Arc<Expr> {
        Arc::new(Expr::Type(kind))
    }

    pub fn bound(op: BoundOp, operand: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::Bound { op, operand })
    }

    pub fn struct_lit(lit: StructLit) -> Arc<Expr> {
        Arc::new(Expr::Struct(lit))
    }

    pub fn list_lit(lit: ListLit) -> Arc<Expr> {
        Arc::new(Expr::List(lit))
    }

    pub fn disjunction(disjuncts: Vec<Disjunct>) -> Arc<Expr> {
        Arc::new(Expr::Disjunction(disjuncts))
    }

    pub fn comprehension(comp: Comprehension) -> Arc<Expr> {
        Arc::new(Expr::Comprehension(comp))
    }

    pub fn reference(name: impl Into<String>) -> Arc<Expr> {
        Arc::new(Expr::Ref(name.into()))
    }

    pub fn select(base: Arc<Expr>, feature: Feature) -> Arc<Expr> {
        Arc::new(Expr::Select { base, feature })
    }

    pub fn index(base: Arc<Expr>, index: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::Index { base, index })
    }

    pub fn call(builtin: impl Into<String>, args: Vec<Arc<Expr>>) -> Arc<Expr> {
        Arc::new(Expr::Call {
            builtin: builtin.into(),
            args,
        })
    }

    pub fn binop(op: Op, lhs: Arc<Expr>, rhs: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::BinOp { op, lhs, rhs })
    }
}
