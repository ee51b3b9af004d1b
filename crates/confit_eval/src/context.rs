//! The operation context.
//!
//! One `OpContext` owns a vertex graph for the duration of an evaluation run:
//! the vertex and environment arenas, the explicit stack of vertices under
//! evaluation (cycle detection), the resource budgets, and a shared handle to
//! the builtin registry. Evaluation of a single graph is single threaded by
//! construction; independent contexts may run on separate threads.

use crate::config::EvalConfig;
use crate::registry::{default_registry, BuiltinRegistry};
use confit_adt::{
    Bottom, Conjunct, EnvArena, EnvId, Environment, Feature, Value, Vertex, VertexArena, VertexId,
};
use std::sync::Arc;
use thiserror::Error;

/// Fatal, process-facing errors. In-language failures are `Bottom` values,
/// never `EvalError`; this enum is reserved for resource exhaustion and
/// malformed input graphs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("evaluation budget exhausted after {steps} steps")]
    BudgetExhausted { steps: usize },
    #[error("evaluation depth limit of {depth} exceeded")]
    DepthExceeded { depth: usize },
}

/// Outcome of evaluating a single expression.
#[derive(Debug, Clone)]
pub enum EvalResult {
    /// The expression produced a value (possibly a fatal bottom).
    Complete(Value),
    /// Evaluation stalled on an unresolved dependency; retryable.
    Pending(Bottom),
}

/// Evaluation context owning one value graph.
#[derive(Debug)]
pub struct OpContext {
    pub vertices: VertexArena,
    pub envs: EnvArena,
    pub(crate) stack: Vec<VertexId>,
    pub(crate) config: EvalConfig,
    pub(crate) registry: Arc<BuiltinRegistry>,
    pub(crate) steps: usize,
}

impl OpContext {
    pub fn new() -> Self {
        Self::with_config(EvalConfig::default())
    }

    pub fn with_config(config: EvalConfig) -> Self {
        Self::with_registry(config, default_registry())
    }

    pub fn with_registry(config: EvalConfig, registry: Arc<BuiltinRegistry>) -> Self {
        Self {
            vertices: VertexArena::new(),
            envs: EnvArena::new(),
            stack: Vec::new(),
            config: config.sanitized(),
            registry,
            steps: 0,
        }
    }

    /// Creates an empty root vertex together with its scope environment.
    pub fn new_root(&mut self) -> (VertexId, EnvId) {
        let root = self.vertices.new_root();
        let env = self.envs.add(Environment::new(None, Some(root)));
        (root, env)
    }

    pub fn new_env(&mut self, parent: Option<EnvId>, vertex: Option<VertexId>) -> EnvId {
        self.envs.add(Environment::new(parent, vertex))
    }

    /// Attaches a conjunct to a vertex. Callers build the graph with this
    /// before finalizing.
    pub fn add_conjunct(&mut self, vertex: VertexId, conjunct: Conjunct) {
        self.vertices.get_mut(vertex).add_conjunct(conjunct);
    }

    pub(crate) fn charge_step(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > self.config.max_steps {
            return Err(EvalError::BudgetExhausted { steps: self.steps });
        }
        Ok(())
    }

    pub(crate) fn on_stack(&self, vertex: VertexId) -> bool {
        self.stack.contains(&vertex)
    }

    pub fn path_of(&self, vertex: VertexId) -> String {
        self.vertices.path_of(vertex)
    }

    /// Follows a feature path from `root` through the evaluated graph.
    pub fn lookup_path(&self, root: VertexId, path: &[Feature]) -> Option<VertexId> {
        let mut current = root;
        for feature in path {
            current = self.vertices.lookup_arc(current, feature)?;
        }
        Some(current)
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        self.vertices.get(id)
    }

    /// Combined failure a stalled vertex is currently blocked on.
    pub(crate) fn pending_bottom(&self, vertex: VertexId) -> Bottom {
        let vx = self.vertices.get(vertex);
        let mut acc: Option<Bottom> = None;
        for (_, bottom) in &vx.postponed {
            acc = Some(Bottom::combine_opt(acc, bottom.clone()));
        }
        if !vx.disjunctions.is_empty() {
            acc = Some(Bottom::combine_opt(
                acc,
                Bottom::incomplete("unresolved disjunction"),
            ));
        }
        acc.unwrap_or_else(|| Bottom::incomplete("incomplete value"))
            .with_path(self.path_of(vertex))
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{EvalError, OpContext};
    use crate::config::EvalConfig;
    use confit_adt::{ArcType, Feature};

    #[test]
    fn step_budget_is_enforced() {
        let mut ctx = OpContext::with_config(EvalConfig::new(8, 2, 8));
        assert!(ctx.charge_step().is_ok());
        assert!(ctx.charge_step().is_ok());
        assert_eq!(
            ctx.charge_step(),
            Err(EvalError::BudgetExhausted { steps: 3 })
        );
    }

    #[test]
    fn path_lookup_follows_arcs() {
        let mut ctx = OpContext::new();
        let (root, _) = ctx.new_root();
        let a = ctx.vertices.new_arc(root, Feature::ident("a"), ArcType::Regular);
        let b = ctx.vertices.new_arc(a, Feature::ident("b"), ArcType::Regular);
        assert_eq!(
            ctx.lookup_path(root, &[Feature::ident("a"), Feature::ident("b")]),
            Some(b)
        );
        assert_eq!(ctx.lookup_path(root, &[Feature::ident("missing")]), None);
    }
}
