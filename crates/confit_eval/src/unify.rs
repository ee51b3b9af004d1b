//! The unification engine.
//!
//! Drives vertices from `Unprocessed` to `Finalized` by evaluating each
//! attached conjunct in its captured environment and merging the result into
//! the vertex. Evaluation is pull based: a child is only evaluated when
//! looked up. Conjuncts whose evaluation stalls on an unresolved dependency
//! are postponed and retried while any pass makes progress; a vertex left
//! with postponed conjuncts becomes `Partial` and is retried when re-entered.
//!
//! Cycle detection uses the explicit stack of evaluating vertices owned by
//! the context: resolving a reference into a vertex on that stack yields a
//! retryable `cycle` bottom instead of recursing.

use crate::context::{EvalError, EvalResult, OpContext};
use crate::merge;
use confit_adt::{
    ArcType, Binding, Bottom, Conjunct, Decl, Environment, ErrorCode, Expr, Feature, Kind,
    ListLit, PendingDisjunction, Span, StructLit, Value, Vertex, VertexId, VertexStatus,
};
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Result of processing one conjunct.
pub(crate) enum ConjunctOutcome {
    /// The conjunct's contribution is merged into the vertex.
    Merged,
    /// Evaluation stalled; retry once the blocking dependency resolves.
    Stalled(Bottom),
}

impl OpContext {
    /// Drives a vertex to `Finalized`, or to `Partial` when evaluation
    /// stalls on unresolved dependencies. Re-entering a `Partial` vertex
    /// retries its postponed conjuncts.
    pub fn finalize(&mut self, vertex: VertexId) -> Result<(), EvalError> {
        match self.vertices.get(vertex).status {
            VertexStatus::Finalized | VertexStatus::Evaluating => return Ok(()),
            VertexStatus::Unprocessed | VertexStatus::Partial => {}
        }
        if self.stack.len() >= self.config.max_depth {
            return Err(EvalError::DepthExceeded {
                depth: self.stack.len(),
            });
        }
        tracing::trace!(vertex = vertex.to_raw(), path = %self.path_of(vertex), "finalize");
        self.stack.push(vertex);
        self.vertices.get_mut(vertex).status = VertexStatus::Evaluating;
        let result = self.unify_conjuncts(vertex);
        self.stack.pop();
        if result.is_err() {
            self.vertices.get_mut(vertex).status = VertexStatus::Partial;
            return result;
        }
        self.settle(vertex, false)
    }

    /// Fully finalizes the tree under `root` for export: repeats whole-tree
    /// passes until a fixpoint, breaks self-consistent reference cycles, and
    /// finally seals vertices that can never resolve with their blocking
    /// failure.
    pub fn finalize_tree(&mut self, root: VertexId) -> Result<(), EvalError> {
        for _ in 0..self.config.max_passes {
            self.run_fixpoint(root)?;
            if !self.break_cycles(root)? {
                break;
            }
        }
        self.seal_rec(root)
    }

    fn run_fixpoint(&mut self, root: VertexId) -> Result<(), EvalError> {
        let mut last_signature = None;
        for _ in 0..self.config.max_passes {
            self.finalize_rec(root)?;
            let signature = self.progress_signature();
            if last_signature == Some(signature) {
                break;
            }
            last_signature = Some(signature);
        }
        Ok(())
    }

    /// Finalizes a vertex and everything under it, one pass.
    pub(crate) fn finalize_subtree(&mut self, vertex: VertexId) -> Result<(), EvalError> {
        self.finalize_rec(vertex)
    }

    fn finalize_rec(&mut self, vertex: VertexId) -> Result<(), EvalError> {
        self.finalize(vertex)?;
        for arc in self.vertices.get(vertex).arcs.clone() {
            self.finalize_rec(arc)?;
        }
        Ok(())
    }

    fn progress_signature(&self) -> (usize, usize, usize) {
        let mut finalized = 0;
        let mut postponed = 0;
        for i in 0..self.vertices.len() {
            let vx = self.vertices.get(VertexId::new(i as u32));
            if vx.status == VertexStatus::Finalized {
                finalized += 1;
            }
            postponed += vx.postponed.len();
        }
        (finalized, postponed, self.vertices.len())
    }

    /// Breaks one self-consistent reference cycle per call: a vertex whose
    /// only blockers are cycle-classified references and that already holds
    /// a result through another path is finalized as-is, which lets the
    /// vertices referencing it resolve on the next pass. One cycle per call
    /// keeps conflicting mutual constraints detectable.
    fn break_cycles(&mut self, root: VertexId) -> Result<bool, EvalError> {
        let Some(vertex) = self.find_breakable(root) else {
            return Ok(false);
        };
        tracing::debug!(path = %self.path_of(vertex), "breaking self-consistent cycle");
        self.vertices.get_mut(vertex).postponed.clear();
        self.settle(vertex, false)?;
        Ok(true)
    }

    fn find_breakable(&self, vertex: VertexId) -> Option<VertexId> {
        let vx = self.vertices.get(vertex);
        if vx.status == VertexStatus::Partial {
            let cyclic_only = !vx.postponed.is_empty()
                && vx
                    .postponed
                    .iter()
                    .all(|(_, bottom)| bottom.code == ErrorCode::Cycle)
                && vx.disjunctions.is_empty();
            let has_result = vx.is_composite()
                || vx
                    .value
                    .as_ref()
                    .map(|value| value.is_concrete())
                    .unwrap_or(false);
            if cyclic_only && has_result {
                return Some(vertex);
            }
        }
        vx.arcs.iter().find_map(|&arc| self.find_breakable(arc))
    }

    fn seal_rec(&mut self, vertex: VertexId) -> Result<(), EvalError> {
        if self.vertices.get(vertex).status != VertexStatus::Finalized {
            self.finalize(vertex)?;
            if self.vertices.get(vertex).status != VertexStatus::Finalized {
                self.settle(vertex, true)?;
            }
        }
        for arc in self.vertices.get(vertex).arcs.clone() {
            self.seal_rec(arc)?;
        }
        Ok(())
    }

    /// Evaluates the vertex's pending conjuncts to a local fixpoint,
    /// retrying stalled conjuncts while any pass makes progress. New
    /// conjuncts appended mid-pass (comprehension yields, embeddings) are
    /// picked up in the same round.
    fn unify_conjuncts(&mut self, vertex: VertexId) -> Result<(), EvalError> {
        let mut round: Vec<Conjunct> = self
            .vertices
            .get_mut(vertex)
            .postponed
            .drain(..)
            .map(|(conjunct, _)| conjunct)
            .collect();
        loop {
            let mut stalled: Vec<(Conjunct, Bottom)> = Vec::new();
            let mut progress = false;
            loop {
                let next = {
                    let vx = self.vertices.get(vertex);
                    if vx.processed < vx.conjuncts.len() {
                        Some(vx.conjuncts[vx.processed].clone())
                    } else {
                        None
                    }
                };
                let conjunct = match next {
                    Some(conjunct) => {
                        self.vertices.get_mut(vertex).processed += 1;
                        conjunct
                    }
                    None => match round.pop() {
                        Some(conjunct) => conjunct,
                        None => break,
                    },
                };
                match self.process_conjunct(vertex, &conjunct)? {
                    ConjunctOutcome::Merged => progress = true,
                    ConjunctOutcome::Stalled(bottom) => stalled.push((conjunct, bottom)),
                }
            }
            if stalled.is_empty() || !progress {
                self.vertices.get_mut(vertex).postponed = stalled;
                return Ok(());
            }
            round = stalled.into_iter().map(|(conjunct, _)| conjunct).collect();
        }
    }

    fn process_conjunct(
        &mut self,
        vertex: VertexId,
        conjunct: &Conjunct,
    ) -> Result<ConjunctOutcome, EvalError> {
        self.charge_step()?;
        match conjunct.expr.as_ref() {
            Expr::Struct(lit) => {
                self.insert_struct(vertex, lit, conjunct);
                Ok(ConjunctOutcome::Merged)
            }
            Expr::List(lit) => {
                self.insert_list(vertex, lit, conjunct);
                Ok(ConjunctOutcome::Merged)
            }
            Expr::Comprehension(comp) => crate::comprehension::expand(self, vertex, comp, conjunct),
            Expr::Disjunction(disjuncts) => {
                self.vertices.get_mut(vertex).disjunctions.push(PendingDisjunction {
                    branches: disjuncts.clone(),
                    env: conjunct.env,
                    span: conjunct.span,
                });
                Ok(ConjunctOutcome::Merged)
            }
            _ => match self.eval_expr(conjunct.env, &conjunct.expr, conjunct.span)? {
                EvalResult::Complete(Value::Struct(w)) | EvalResult::Complete(Value::List(w)) => {
                    self.merge_vertex_value(vertex, w, conjunct);
                    Ok(ConjunctOutcome::Merged)
                }
                EvalResult::Complete(Value::Disjunction(branches)) => {
                    let branches = branches
                        .into_iter()
                        .map(|branch| confit_adt::Disjunct {
                            expr: Arc::new(Expr::Resolved(branch.value)),
                            default: branch.default,
                        })
                        .collect();
                    self.vertices.get_mut(vertex).disjunctions.push(PendingDisjunction {
                        branches,
                        env: conjunct.env,
                        span: conjunct.span,
                    });
                    Ok(ConjunctOutcome::Merged)
                }
                EvalResult::Complete(value) => {
                    self.merge_scalar(vertex, value, conjunct.span);
                    Ok(ConjunctOutcome::Merged)
                }
                EvalResult::Pending(bottom) => Ok(ConjunctOutcome::Stalled(bottom)),
            },
        }
    }

    /// Merges a struct literal into a vertex: a fresh scope frame, one arc
    /// per field declaration, embeddings appended as further conjuncts of
    /// the vertex itself.
    fn insert_struct(&mut self, vertex: VertexId, lit: &StructLit, conjunct: &Conjunct) {
        self.vertices.get_mut(vertex).is_struct = true;
        let scope = self
            .envs
            .add(Environment::new(Some(conjunct.env), Some(vertex)));
        for decl in &lit.decls {
            if let Decl::Let { name, value } = decl {
                self.envs.get_mut(scope).bind(
                    name.clone(),
                    Binding::Lazy {
                        expr: value.clone(),
                        env: scope,
                    },
                );
            }
        }
        for decl in &lit.decls {
            match decl {
                Decl::Field { label, arc, value } => {
                    let child = self.ensure_arc(vertex, label.clone(), *arc);
                    self.vertices.get_mut(child).add_conjunct(Conjunct {
                        expr: value.clone(),
                        env: scope,
                        span: conjunct.span,
                    });
                }
                Decl::Embed(expr) => {
                    self.vertices.get_mut(vertex).add_conjunct(Conjunct {
                        expr: expr.clone(),
                        env: scope,
                        span: conjunct.span,
                    });
                }
                Decl::Let { .. } => {}
            }
        }
        if lit.closed {
            let features: FxHashSet<Feature> = lit.declared_features().cloned().collect();
            self.vertices.get_mut(vertex).restrict(features);
        }
    }

    fn insert_list(&mut self, vertex: VertexId, lit: &ListLit, conjunct: &Conjunct) {
        self.vertices.get_mut(vertex).is_list = true;
        let tail_constraints = self.vertices.get(vertex).ellipses.clone();
        for (i, elem) in lit.elems.iter().enumerate() {
            let (child, created) = self.ensure_arc_tracked(vertex, Feature::Index(i as u64));
            self.vertices.get_mut(child).add_conjunct(Conjunct {
                expr: elem.clone(),
                env: conjunct.env,
                span: conjunct.span,
            });
            if created {
                for (start, tail) in &tail_constraints {
                    if i >= *start {
                        self.vertices.get_mut(child).add_conjunct(tail.clone());
                    }
                }
            }
        }
        match &lit.ellipsis {
            None => self.merge_list_len(vertex, lit.elems.len(), conjunct.span),
            Some(tail) => {
                let expr = tail
                    .clone()
                    .unwrap_or_else(|| Arc::new(Expr::Type(Kind::TOP)));
                let start = lit.elems.len();
                let tail_conjunct = Conjunct {
                    expr,
                    env: conjunct.env,
                    span: conjunct.span,
                };
                for arc in self.vertices.get(vertex).arcs.clone() {
                    if let Feature::Index(i) = self.vertices.get(arc).label {
                        if i as usize >= start {
                            self.vertices
                                .get_mut(arc)
                                .add_conjunct(tail_conjunct.clone());
                        }
                    }
                }
                self.vertices
                    .get_mut(vertex)
                    .ellipses
                    .push((start, tail_conjunct));
            }
        }
    }

    fn merge_list_len(&mut self, vertex: VertexId, len: usize, span: Option<Span>) {
        match self.vertices.get(vertex).list_len {
            None => self.vertices.get_mut(vertex).list_len = Some(len),
            Some(existing) if existing == len => {}
            Some(existing) => self.merge_scalar(
                vertex,
                Value::Bottom(Bottom::eval(format!(
                    "incompatible list lengths ({existing} and {len})"
                ))),
                span,
            ),
        }
    }

    fn ensure_arc(&mut self, vertex: VertexId, label: Feature, arc: ArcType) -> VertexId {
        if let Some(existing) = self.vertices.lookup_arc(vertex, &label) {
            let child = self.vertices.get_mut(existing);
            child.arc_type = child.arc_type.merge(arc);
            existing
        } else {
            self.vertices.new_arc(vertex, label, arc)
        }
    }

    fn ensure_arc_tracked(&mut self, vertex: VertexId, label: Feature) -> (VertexId, bool) {
        if let Some(existing) = self.vertices.lookup_arc(vertex, &label) {
            (existing, false)
        } else {
            (self.vertices.new_arc(vertex, label, ArcType::Regular), true)
        }
    }

    /// Folds a non-composite value into the vertex's accumulated result.
    pub(crate) fn merge_scalar(&mut self, vertex: VertexId, value: Value, span: Option<Span>) {
        let current = self.vertices.get_mut(vertex).value.take();
        let merged = match current {
            None => value,
            Some(current) => merge::merge_values(&current, &value),
        };
        let merged = match merged {
            Value::Bottom(bottom) => {
                let mut bottom = bottom.with_path(self.vertices.path_of(vertex));
                if let Some(span) = span {
                    bottom = bottom.with_span(span);
                }
                Value::Bottom(bottom)
            }
            other => other,
        };
        self.vertices.get_mut(vertex).value = Some(merged);
    }

    /// Replays a vertex's already-merged base state into a detached scratch
    /// vertex for disjunction forking.
    pub(crate) fn replay_base(&mut self, scratch: VertexId, source: VertexId, conjunct: &Conjunct) {
        self.merge_vertex_value(scratch, source, conjunct);
    }

    /// Merges another vertex's evaluated result into `vertex`: arcs are
    /// unioned (each deferred through `Expr::Vertex`), closedness and list
    /// bookkeeping carried over, and any scalar result folded in.
    fn merge_vertex_value(&mut self, vertex: VertexId, source: VertexId, conjunct: &Conjunct) {
        if vertex == source {
            return;
        }
        let (is_struct, is_list, closed, allowed, list_len, value, arcs, ellipses) = {
            let sx = self.vertices.get(source);
            (
                sx.is_struct,
                sx.is_list,
                sx.closed,
                sx.allowed.clone(),
                sx.list_len,
                sx.value.clone(),
                sx.arcs.clone(),
                sx.ellipses.clone(),
            )
        };
        {
            let vx = self.vertices.get_mut(vertex);
            vx.is_struct |= is_struct;
            vx.is_list |= is_list;
            if closed {
                match allowed {
                    Some(allowed) => vx.restrict(allowed),
                    None => vx.closed = true,
                }
            }
        }
        if let Some(len) = list_len {
            self.merge_list_len(vertex, len, conjunct.span);
        }
        for arc in arcs {
            let (label, arc_type) = {
                let ax = self.vertices.get(arc);
                (ax.label.clone(), ax.arc_type)
            };
            let child = self.ensure_arc(vertex, label, arc_type);
            self.vertices.get_mut(child).add_conjunct(Conjunct {
                expr: Arc::new(Expr::Vertex(arc)),
                env: conjunct.env,
                span: conjunct.span,
            });
        }
        for tail in ellipses {
            self.vertices.get_mut(vertex).ellipses.push(tail);
        }
        if let Some(value) = value {
            self.merge_scalar(vertex, value, conjunct.span);
        }
    }

    /// Post-processing once the conjunct queue drains: list arity and
    /// closedness checks, kind conflicts, disjunction resolution, and the
    /// final status decision. With `seal` set, a stalled vertex is stamped
    /// with its blocking failure instead of staying retryable.
    pub(crate) fn settle(&mut self, vertex: VertexId, seal: bool) -> Result<(), EvalError> {
        let arcs = self.vertices.get(vertex).arcs.clone();

        // List arity: elements past a fixed length are conflicts.
        if let (true, Some(len)) = {
            let vx = self.vertices.get(vertex);
            (vx.is_list, vx.list_len)
        } {
            for &arc in &arcs {
                if let Feature::Index(i) = self.vertices.get(arc).label {
                    if i as usize >= len {
                        self.merge_scalar(
                            arc,
                            Value::Bottom(Bottom::eval(format!(
                                "index {i} out of range for list of length {len}"
                            ))),
                            None,
                        );
                    }
                }
            }
        }

        let (is_struct, is_list) = {
            let vx = self.vertices.get(vertex);
            (vx.is_struct, vx.is_list)
        };
        if is_struct && is_list {
            self.merge_scalar(
                vertex,
                Value::Bottom(Bottom::eval("conflicting values: list and struct")),
                None,
            );
        }

        // A composite vertex cannot also hold a scalar result; a type
        // constraint is absorbed if it admits the composite kind.
        if is_struct || is_list || !arcs.is_empty() {
            let value = self.vertices.get(vertex).value.clone();
            match value {
                Some(Value::Type(kind)) => {
                    let want = if is_list { Kind::LIST } else { Kind::STRUCT };
                    if kind.intersect(want).is_bottom() {
                        self.merge_scalar(
                            vertex,
                            Value::Bottom(Bottom::eval(format!(
                                "conflicting values {kind} and {want}"
                            ))),
                            None,
                        );
                    } else {
                        self.vertices.get_mut(vertex).value = None;
                    }
                }
                Some(Value::Bottom(_)) | None => {}
                Some(other) => self.merge_scalar(
                    vertex,
                    Value::Bottom(Bottom::eval(format!(
                        "conflicting values {other} and {}",
                        if is_list { "list" } else { "struct" }
                    ))),
                    None,
                ),
            }
        }

        // Closedness: regular arcs must pass the allowed-feature set.
        if self.vertices.get(vertex).closed {
            for &arc in &arcs {
                let label = self.vertices.get(arc).label.clone();
                if label.is_regular() && !self.vertices.get(vertex).accepts(&label) {
                    self.merge_scalar(
                        arc,
                        Value::Bottom(Bottom::eval(format!("field not allowed: {label}"))),
                        None,
                    );
                }
            }
        }

        // Branch selection only sees contributions already merged into the
        // base, so it must wait for the postponed conjuncts.
        let ready = {
            let vx = self.vertices.get(vertex);
            !vx.disjunctions.is_empty() && (vx.postponed.is_empty() || seal)
        };
        if ready {
            crate::disjunction::resolve(self, vertex, seal)?;
        }

        let fatal = matches!(
            self.vertices.get(vertex).value,
            Some(Value::Bottom(ref bottom)) if !bottom.is_incomplete()
        );
        if fatal {
            self.vertices.get_mut(vertex).status = VertexStatus::Finalized;
            return Ok(());
        }

        let stalled = {
            let vx = self.vertices.get(vertex);
            !vx.postponed.is_empty() || !vx.disjunctions.is_empty()
        };
        if stalled {
            self.vertices.get_mut(vertex).status = VertexStatus::Partial;
            if seal {
                let pending = self.pending_bottom(vertex);
                let vx = self.vertices.get_mut(vertex);
                let already_fatal =
                    matches!(vx.value, Some(Value::Bottom(ref b)) if !b.is_incomplete());
                if !already_fatal {
                    vx.value = Some(Value::Bottom(pending));
                }
                vx.postponed.clear();
                vx.disjunctions.clear();
                vx.status = VertexStatus::Finalized;
            }
            return Ok(());
        }

        let vx = self.vertices.get_mut(vertex);
        if vx.value.is_none() && !vx.is_composite() {
            vx.value = Some(Value::Type(Kind::TOP));
        }
        vx.status = VertexStatus::Finalized;
        tracing::trace!(vertex = vertex.to_raw(), "finalized");
        Ok(())
    }

    /// Resolves a vertex to its (possibly partial) value for use inside an
    /// expression. Re-entering a vertex currently under evaluation yields a
    /// retryable cycle bottom rather than blocking.
    pub(crate) fn vertex_value(&mut self, vertex: VertexId) -> Result<EvalResult, EvalError> {
        if self.on_stack(vertex) || self.vertices.get(vertex).status == VertexStatus::Evaluating {
            let path = self.path_of(vertex);
            return Ok(EvalResult::Pending(
                Bottom::cycle("cycle detected").with_path(path),
            ));
        }
        self.finalize(vertex)?;
        let vx = self.vertices.get(vertex);
        match vx.status {
            VertexStatus::Finalized => {
                if let Some(Value::Bottom(bottom)) = &vx.value {
                    if bottom.is_incomplete() {
                        Ok(EvalResult::Pending(bottom.clone()))
                    } else {
                        Ok(EvalResult::Complete(Value::Bottom(bottom.clone())))
                    }
                } else if vx.is_composite() {
                    Ok(EvalResult::Complete(if vx.is_list {
                        Value::List(vertex)
                    } else {
                        Value::Struct(vertex)
                    }))
                } else if let Some(value) = &vx.value {
                    Ok(EvalResult::Complete(value.clone()))
                } else {
                    Ok(EvalResult::Complete(Value::Type(Kind::TOP)))
                }
            }
            _ => Ok(EvalResult::Pending(self.pending_bottom(vertex))),
        }
    }

    /// Evaluates an expression in an environment to a value, or to a
    /// retryable failure when a dependency is not yet resolvable.
    pub(crate) fn eval_expr(
        &mut self,
        env: confit_adt::EnvId,
        expr: &Arc<Expr>,
        span: Option<Span>,
    ) -> Result<EvalResult, EvalError> {
        self.charge_step()?;
        match expr.as_ref() {
            Expr::Null => Ok(EvalResult::Complete(Value::Null)),
            Expr::Bool(v) => Ok(EvalResult::Complete(Value::Bool(*v))),
            Expr::Int(v) => Ok(EvalResult::Complete(Value::Int(*v))),
            Expr::Float(v) => Ok(EvalResult::Complete(Value::Float(*v))),
            Expr::Str(v) => Ok(EvalResult::Complete(Value::Str(v.clone()))),
            Expr::Bytes(v) => Ok(EvalResult::Complete(Value::Bytes(v.clone()))),
            Expr::Type(kind) => Ok(EvalResult::Complete(Value::Type(*kind))),

            Expr::Bound { op, operand } => match self.eval_expr(env, operand, span)? {
                EvalResult::Complete(value) => {
                    let resolved = value.default().clone();
                    match resolved {
                        Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Bytes(_) => {
                            Ok(EvalResult::Complete(Value::Bound {
                                op: *op,
                                bound: Box::new(resolved),
                            }))
                        }
                        Value::Bottom(b) if b.is_incomplete() => Ok(EvalResult::Pending(b)),
                        Value::Bottom(b) => Ok(EvalResult::Complete(Value::Bottom(b))),
                        other => Ok(EvalResult::Complete(Value::Bottom(Bottom::eval(format!(
                            "bound operand {other} is not a concrete scalar"
                        ))))),
                    }
                }
                pending => Ok(pending),
            },

            Expr::Struct(_) | Expr::List(_) => {
                // Literal in expression position: evaluate into a detached
                // vertex.
                let w = self.vertices.add(Vertex::new(Feature::ident("_lit")));
                self.vertices.get_mut(w).add_conjunct(Conjunct {
                    expr: expr.clone(),
                    env,
                    span,
                });
                self.finalize(w)?;
                self.vertex_value(w)
            }

            Expr::Disjunction(disjuncts) => {
                let mut branches = Vec::new();
                let mut errors: Option<Bottom> = None;
                for disjunct in disjuncts {
                    match self.eval_expr(env, &disjunct.expr, span)? {
                        EvalResult::Complete(Value::Bottom(b)) if !b.is_incomplete() => {
                            errors = Some(Bottom::combine_opt(errors, b));
                        }
                        EvalResult::Complete(value) => {
                            branches.push(confit_adt::DisjunctBranch::new(value, disjunct.default));
                        }
                        EvalResult::Pending(b) => return Ok(EvalResult::Pending(b)),
                    }
                }
                match branches.len() {
                    0 => Ok(EvalResult::Complete(Value::Bottom(errors.unwrap_or_else(
                        || Bottom::eval("empty disjunction: all branches failed"),
                    )))),
                    1 => Ok(EvalResult::Complete(branches.remove(0).value)),
                    _ => Ok(EvalResult::Complete(Value::Disjunction(branches))),
                }
            }

            Expr::Comprehension(_) => Ok(EvalResult::Complete(Value::Bottom(Bottom::eval(
                "comprehension not allowed in expression position",
            )))),

            Expr::Ref(name) => self.resolve_name(env, name),

            Expr::Select { base, feature } => match self.eval_expr(env, base, span)? {
                EvalResult::Complete(value) => self.select_feature(value, feature),
                pending => Ok(pending),
            },

            Expr::Index { base, index } => {
                let base_value = match self.eval_expr(env, base, span)? {
                    EvalResult::Complete(value) => value,
                    pending => return Ok(pending),
                };
                let index_value = match self.eval_expr(env, index, span)? {
                    EvalResult::Complete(value) => value.default().clone(),
                    pending => return Ok(pending),
                };
                let feature = match index_value {
                    Value::Int(i) if i >= 0 => Feature::Index(i as u64),
                    Value::Str(s) => Feature::Str(s),
                    other => {
                        return Ok(EvalResult::Complete(Value::Bottom(Bottom::eval(format!(
                            "invalid index {other}"
                        )))))
                    }
                };
                self.select_feature(base_value, &feature)
            }

            Expr::Call { builtin, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    match self.eval_expr(env, arg, span)? {
                        EvalResult::Complete(value) => {
                            let resolved = value.default().clone();
                            match resolved {
                                Value::Bottom(b) if b.is_incomplete() => {
                                    return Ok(EvalResult::Pending(b))
                                }
                                Value::Bottom(b) => {
                                    return Ok(EvalResult::Complete(Value::Bottom(b)))
                                }
                                other if !other.is_concrete() => {
                                    return Ok(EvalResult::Pending(Bottom::incomplete(format!(
                                        "non-concrete argument {other} to {builtin}"
                                    ))))
                                }
                                other => evaluated.push(other),
                            }
                        }
                        pending => return Ok(pending),
                    }
                }
                let Some(f) = self.registry.get(builtin) else {
                    return Ok(EvalResult::Complete(Value::Bottom(Bottom::eval(format!(
                        "unknown builtin \"{builtin}\""
                    )))));
                };
                match f(&evaluated) {
                    Ok(value) => Ok(EvalResult::Complete(value)),
                    Err(b) if b.is_incomplete() => Ok(EvalResult::Pending(b)),
                    Err(b) => Ok(EvalResult::Complete(Value::Bottom(b))),
                }
            }

            Expr::BinOp { op, lhs, rhs } => {
                let left = match self.eval_expr(env, lhs, span)? {
                    EvalResult::Complete(value) => value.default().clone(),
                    pending => return Ok(pending),
                };
                let right = match self.eval_expr(env, rhs, span)? {
                    EvalResult::Complete(value) => value.default().clone(),
                    pending => return Ok(pending),
                };
                for operand in [&left, &right] {
                    match operand {
                        Value::Bottom(b) if b.is_incomplete() => {
                            return Ok(EvalResult::Pending(b.clone()))
                        }
                        Value::Bottom(b) => {
                            return Ok(EvalResult::Complete(Value::Bottom(b.clone())))
                        }
                        other if !other.is_concrete() => {
                            return Ok(EvalResult::Pending(Bottom::incomplete(format!(
                                "non-concrete operand {other} to {}",
                                op.symbol()
                            ))))
                        }
                        _ => {}
                    }
                }
                Ok(EvalResult::Complete(merge::apply_binop(*op, &left, &right)))
            }

            Expr::Vertex(w) => self.vertex_value(*w),

            Expr::Resolved(value) => match value {
                Value::Struct(w) | Value::List(w) => self.vertex_value(*w),
                other => Ok(EvalResult::Complete(other.clone())),
            },
        }
    }

    fn select_feature(&mut self, value: Value, feature: &Feature) -> Result<EvalResult, EvalError> {
        let resolved = value.default().clone();
        match resolved {
            Value::Struct(w) | Value::List(w) => {
                if let Some(arc) = self.lookup_selectable(w, feature) {
                    self.vertex_value(arc)
                } else {
                    Ok(EvalResult::Pending(
                        Bottom::incomplete(format!("undefined field {feature}"))
                            .with_path(self.path_of(w)),
                    ))
                }
            }
            Value::Bottom(b) if b.is_incomplete() => Ok(EvalResult::Pending(b)),
            Value::Bottom(b) => Ok(EvalResult::Complete(Value::Bottom(b))),
            other => Ok(EvalResult::Complete(Value::Bottom(Bottom::eval(format!(
                "cannot select {feature} from {other}"
            ))))),
        }
    }

    /// Arc lookup for selection: identifier and string labels are
    /// interchangeable keys.
    fn lookup_selectable(&self, vertex: VertexId, feature: &Feature) -> Option<VertexId> {
        if let Some(arc) = self.vertices.lookup_arc(vertex, feature) {
            return Some(arc);
        }
        match feature {
            Feature::Ident(name) => self.vertices.lookup_arc(vertex, &Feature::Str(name.clone())),
            Feature::Str(name) => self.vertices.lookup_arc(vertex, &Feature::Ident(name.clone())),
            _ => None,
        }
    }

    fn resolve_name(&mut self, env: confit_adt::EnvId, name: &str) -> Result<EvalResult, EvalError> {
        let mut current = Some(env);
        while let Some(eid) = current {
            let (binding, scope, parent) = {
                let frame = self.envs.get(eid);
                (frame.local(name).cloned(), frame.vertex, frame.parent)
            };
            if let Some(binding) = binding {
                return match binding {
                    Binding::Value(value) => Ok(EvalResult::Complete(value)),
                    Binding::Vertex(w) => self.vertex_value(w),
                    Binding::Lazy { expr, env } => self.eval_expr(env, &expr, None),
                    Binding::Forbidden => Ok(EvalResult::Complete(Value::Bottom(Bottom::eval(
                        format!("comprehension binding \"{name}\" is not visible from else"),
                    )))),
                };
            }
            if let Some(scope) = scope {
                if let Some(arc) = self.lookup_named_arc(scope, name) {
                    return self.vertex_value(arc);
                }
                if self.vertices.get(scope).status != VertexStatus::Finalized {
                    // The field may still appear; retry once the scope
                    // settles.
                    return Ok(EvalResult::Pending(Bottom::incomplete(format!(
                        "reference \"{name}\" is not yet resolvable"
                    ))));
                }
            }
            current = parent;
        }
        Ok(EvalResult::Complete(Value::Bottom(Bottom::eval(format!(
            "reference \"{name}\" not found"
        )))))
    }

    fn lookup_named_arc(&self, scope: VertexId, name: &str) -> Option<VertexId> {
        self.vertices
            .get(scope)
            .arcs
            .iter()
            .copied()
            .find(|&arc| self.vertices.get(arc).label.name() == Some(name))
    }
}
