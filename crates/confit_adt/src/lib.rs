//! confit_adt - abstract data model for the confit configuration language.
//!
//! This crate defines the graph the evaluation engine operates on: features
//! and arc types, the conjunct expression tree handed over by the translator,
//! evaluated values, the vertex arena, lexical environments, and first-class
//! failure values. It contains no evaluation logic; `confit_eval` drives
//! every mutation.

pub mod environment;
pub mod errors;
pub mod expr;
pub mod feature;
pub mod kind;
pub mod span;
pub mod value;
pub mod vertex;

pub use environment::{Binding, EnvArena, EnvId, Environment};
pub use errors::{Bottom, ErrReport, ErrorCode};
pub use expr::{
    BoundOp, Clause, Comprehension, Decl, Disjunct, Expr, ListLit, Op, StructLit,
};
pub use feature::{ArcType, Feature};
pub use kind::Kind;
pub use span::Span;
pub use value::{DisjunctBranch, Value};
pub use vertex::{Conjunct, PendingDisjunction, Vertex, VertexArena, VertexId, VertexStatus};
