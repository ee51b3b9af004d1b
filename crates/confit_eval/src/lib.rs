//! confit_eval - the evaluation engine of the confit configuration language.
//!
//! The engine unifies the conjuncts attached to each vertex of a
//! [`confit_adt`] value graph into finalized values: scalar merging with
//! bound and type constraints, struct and list insertion with closedness
//! checking, disjunction resolution with default marks, and comprehension
//! expansion. Evaluation is lazy and re-entrant; reference cycles are
//! tolerated and classified rather than fatal.
//!
//! A typical run builds a graph through [`OpContext`], drives it with
//! [`OpContext::finalize_tree`], checks the outcome with
//! [`validate`](validate::validate) and emits data with
//! [`export`](export::export).

mod comprehension;
pub mod config;
pub mod context;
mod disjunction;
pub mod export;
pub mod merge;
pub mod registry;
mod unify;
pub mod validate;

pub use config::EvalConfig;
pub use context::{EvalError, EvalResult, OpContext};
pub use export::{export, Exported};
pub use merge::merge_values;
pub use registry::{default_registry, BuiltinFn, BuiltinRegistry};
pub use validate::{validate, Config, ValidationReport};
