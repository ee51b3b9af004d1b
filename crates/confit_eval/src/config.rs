//! Evaluation resource configuration.
//!
//! Evaluation is cooperative-bounded: a caller may impose recursion and step
//! budgets, and the engine aborts with a fatal resource-exhaustion error when
//! a budget runs out. There is no implicit timeout. This is distinct from the
//! validator [`Config`](crate::validate::Config), which controls what counts
//! as an acceptable result rather than how much work may be spent finding it.

/// Resource budgets for one evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Maximum depth of the evaluating-vertex stack (reference chains,
    /// nested finalization).
    pub max_depth: usize,
    /// Maximum number of conjunct evaluations across the whole run.
    pub max_steps: usize,
    /// Maximum whole-tree fixpoint passes before stalled vertices are sealed.
    pub max_passes: usize,
}

impl EvalConfig {
    pub fn new(max_depth: usize, max_steps: usize, max_passes: usize) -> Self {
        Self {
            max_depth,
            max_steps,
            max_passes,
        }
        .sanitized()
    }

    /// Enforces minimum budgets; a zero budget would reject every graph.
    pub fn sanitized(mut self) -> Self {
        if self.max_depth == 0 {
            self.max_depth = 1;
        }
        if self.max_steps == 0 {
            self.max_steps = 1;
        }
        if self.max_passes == 0 {
            self.max_passes = 1;
        }
        self
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_depth: 512,
            max_steps: 1_000_000,
            max_passes: 64,
        }
    }
}
