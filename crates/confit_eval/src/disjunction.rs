//! Disjunction resolution.
//!
//! Disjunction conjuncts are collected on the vertex during unification and
//! resolved at settle time by forking: for every combination of branch
//! choices across the pending disjunctions, the vertex's already-merged base
//! state is replayed into a detached scratch vertex together with the chosen
//! branches, and the scratch is evaluated in isolation. Branch combinations
//! that fail are pruned; combinations that stall keep the whole disjunction
//! pending until the final seal, when complete survivors win over stalled
//! ones.
//!
//! Default marks use three-valued combination: a combination is marked
//! default only if some disjunction marked its chosen branch and none chose
//! an unmarked branch of a marked disjunction.

use crate::context::{EvalError, OpContext};
use confit_adt::{
    Bottom, Conjunct, DisjunctBranch, Feature, Kind, PendingDisjunction, Value, Vertex, VertexId,
    VertexStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultMode {
    /// The disjunction carries no default marks; it expresses no preference.
    Maybe,
    /// The chosen branch is marked as a default.
    Is,
    /// Another branch is marked and this one is not.
    Not,
}

impl DefaultMode {
    fn combine(self, other: DefaultMode) -> DefaultMode {
        match (self, other) {
            (DefaultMode::Not, _) | (_, DefaultMode::Not) => DefaultMode::Not,
            (DefaultMode::Is, _) | (_, DefaultMode::Is) => DefaultMode::Is,
            _ => DefaultMode::Maybe,
        }
    }

    fn of(pending: &PendingDisjunction, choice: usize) -> DefaultMode {
        if !pending.branches.iter().any(|branch| branch.default) {
            DefaultMode::Maybe
        } else if pending.branches[choice].default {
            DefaultMode::Is
        } else {
            DefaultMode::Not
        }
    }
}

enum ComboOutcome {
    Complete { value: Value, default: bool },
    Incomplete(Bottom),
    Failed(Bottom),
}

/// Resolves the pending disjunctions of `vertex`. Called from settle once
/// the conjunct queue has drained; with `seal` set, stalled combinations are
/// pruned instead of keeping the disjunction pending.
pub(crate) fn resolve(ctx: &mut OpContext, vertex: VertexId, seal: bool) -> Result<(), EvalError> {
    let pendings = std::mem::take(&mut ctx.vertices.get_mut(vertex).disjunctions);
    if pendings.is_empty() {
        return Ok(());
    }
    if matches!(ctx.vertices.get(vertex).bottom(), Some(b) if !b.is_incomplete()) {
        return Ok(());
    }
    if pendings.iter().any(|pending| pending.branches.is_empty()) {
        let span = pendings.first().and_then(|pending| pending.span);
        ctx.merge_scalar(vertex, Value::Bottom(Bottom::eval("empty disjunction")), span);
        return Ok(());
    }
    tracing::debug!(
        path = %ctx.path_of(vertex),
        disjunctions = pendings.len(),
        "resolving disjunctions"
    );

    let mut survivors: Vec<DisjunctBranch> = Vec::new();
    let mut stalled: Option<Bottom> = None;
    let mut failed: Option<Bottom> = None;
    let mut choices = vec![0usize; pendings.len()];
    loop {
        match try_combination(ctx, vertex, &pendings, &choices)? {
            ComboOutcome::Complete { value, default } => {
                push_survivor(ctx, &mut survivors, value, default);
            }
            ComboOutcome::Incomplete(bottom) => {
                stalled = Some(Bottom::combine_opt(stalled, bottom));
            }
            ComboOutcome::Failed(bottom) => {
                failed = Some(Bottom::combine_opt(failed, bottom));
            }
        }
        if !advance(&mut choices, &pendings) {
            break;
        }
    }

    if stalled.is_some() && !seal {
        // A stalled combination may yet succeed and change the survivor
        // set; redo branch selection once more of the graph has resolved.
        ctx.vertices.get_mut(vertex).disjunctions = pendings;
        return Ok(());
    }

    if survivors.is_empty() {
        if stalled.is_some() {
            // Sealing with nothing complete: leave the pending set in place
            // so the seal stamps the blocking failure.
            ctx.vertices.get_mut(vertex).disjunctions = pendings;
            return Ok(());
        }
        let bottom = failed.unwrap_or_else(|| Bottom::eval("empty disjunction"));
        let span = pendings.first().and_then(|pending| pending.span);
        ctx.merge_scalar(vertex, Value::Bottom(bottom), span);
        return Ok(());
    }

    if survivors.len() == 1 {
        let branch = survivors.remove(0);
        match branch.value {
            Value::Struct(scratch) | Value::List(scratch) => adopt(ctx, vertex, scratch),
            value => {
                let vx = ctx.vertices.get_mut(vertex);
                vx.value = Some(value);
            }
        }
    } else {
        ctx.vertices.get_mut(vertex).value = Some(Value::Disjunction(survivors));
    }
    Ok(())
}

fn advance(choices: &mut [usize], pendings: &[PendingDisjunction]) -> bool {
    for (choice, pending) in choices.iter_mut().zip(pendings).rev() {
        *choice += 1;
        if *choice < pending.branches.len() {
            return true;
        }
        *choice = 0;
    }
    false
}

/// Replays the vertex's base state plus one branch choice per disjunction
/// into a detached scratch vertex and evaluates it.
fn try_combination(
    ctx: &mut OpContext,
    vertex: VertexId,
    pendings: &[PendingDisjunction],
    choices: &[usize],
) -> Result<ComboOutcome, EvalError> {
    let scratch = ctx.vertices.add(Vertex::new(Feature::ident("_disjunct")));
    let base_env = pendings[0].env;
    let base = Conjunct {
        expr: std::sync::Arc::new(confit_adt::Expr::Null),
        env: base_env,
        span: pendings[0].span,
    };
    ctx.replay_base(scratch, vertex, &base);

    let mut mode = DefaultMode::Maybe;
    for (pending, &choice) in pendings.iter().zip(choices) {
        let branch = &pending.branches[choice];
        ctx.add_conjunct(
            scratch,
            Conjunct {
                expr: branch.expr.clone(),
                env: pending.env,
                span: pending.span,
            },
        );
        mode = mode.combine(DefaultMode::of(pending, choice));
    }

    ctx.finalize_subtree(scratch)?;
    Ok(classify(ctx, scratch, mode))
}

fn classify(ctx: &OpContext, scratch: VertexId, mode: DefaultMode) -> ComboOutcome {
    match scan(ctx, scratch) {
        ScratchState::Failed(bottom) => ComboOutcome::Failed(bottom),
        ScratchState::Incomplete(bottom) => ComboOutcome::Incomplete(bottom),
        ScratchState::Done => ComboOutcome::Complete {
            value: snapshot(ctx, scratch),
            default: mode == DefaultMode::Is,
        },
    }
}

enum ScratchState {
    Done,
    Incomplete(Bottom),
    Failed(Bottom),
}

/// Walks a scratch subtree and reports the most severe condition found:
/// a fatal bottom anywhere fails the combination, an unfinalized or
/// incomplete vertex keeps it pending.
fn scan(ctx: &OpContext, vertex: VertexId) -> ScratchState {
    let vx = ctx.vertices.get(vertex);
    if let Some(bottom) = vx.bottom() {
        if bottom.is_incomplete() {
            return ScratchState::Incomplete(bottom.clone());
        }
        return ScratchState::Failed(bottom.clone());
    }
    if vx.status() != VertexStatus::Finalized {
        return ScratchState::Incomplete(ctx.pending_bottom(vertex));
    }
    let mut pending: Option<Bottom> = None;
    for &arc in &vx.arcs {
        match scan(ctx, arc) {
            ScratchState::Failed(bottom) => return ScratchState::Failed(bottom),
            ScratchState::Incomplete(bottom) => {
                pending = Some(Bottom::combine_opt(pending, bottom));
            }
            ScratchState::Done => {}
        }
    }
    match pending {
        Some(bottom) => ScratchState::Incomplete(bottom),
        None => ScratchState::Done,
    }
}

fn snapshot(ctx: &OpContext, scratch: VertexId) -> Value {
    let vx = ctx.vertices.get(scratch);
    if vx.is_composite() {
        if vx.is_list {
            Value::List(scratch)
        } else {
            Value::Struct(scratch)
        }
    } else {
        vx.value().cloned().unwrap_or(Value::Type(Kind::TOP))
    }
}

/// Deduplicates structurally equal survivors; a duplicate contributes its
/// default mark to the kept branch.
fn push_survivor(
    ctx: &OpContext,
    survivors: &mut Vec<DisjunctBranch>,
    value: Value,
    default: bool,
) {
    for survivor in survivors.iter_mut() {
        if values_equal(ctx, &survivor.value, &value) {
            survivor.default |= default;
            return;
        }
    }
    survivors.push(DisjunctBranch::new(value, default));
}

fn values_equal(ctx: &OpContext, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Struct(x), Value::Struct(y)) | (Value::List(x), Value::List(y)) => {
            vertices_equal(ctx, *x, *y)
        }
        _ => a == b,
    }
}

fn vertices_equal(ctx: &OpContext, a: VertexId, b: VertexId) -> bool {
    if a == b {
        return true;
    }
    let va = ctx.vertices.get(a);
    let vb = ctx.vertices.get(b);
    if va.is_list != vb.is_list || va.arcs.len() != vb.arcs.len() {
        return false;
    }
    for &arc_a in &va.arcs {
        let label = &ctx.vertices.get(arc_a).label;
        let Some(arc_b) = ctx.vertices.lookup_arc(b, label) else {
            return false;
        };
        let (xa, xb) = (ctx.vertices.get(arc_a), ctx.vertices.get(arc_b));
        let equal = if xa.is_composite() && xb.is_composite() {
            vertices_equal(ctx, arc_a, arc_b)
        } else {
            xa.value() == xb.value()
        };
        if !equal {
            return false;
        }
    }
    va.value() == vb.value()
}

/// Grafts a winning scratch subtree onto the original vertex: the scratch
/// already merged the vertex's base state, so its content replaces the
/// vertex's wholesale. Superseded arcs stay in the arena but are no longer
/// reachable from the root.
fn adopt(ctx: &mut OpContext, vertex: VertexId, scratch: VertexId) {
    let (arcs, value, is_struct, is_list, closed, allowed, list_len, ellipses) = {
        let sx = ctx.vertices.get(scratch);
        (
            sx.arcs.clone(),
            sx.value.clone(),
            sx.is_struct,
            sx.is_list,
            sx.closed,
            sx.allowed.clone(),
            sx.list_len,
            sx.ellipses.clone(),
        )
    };
    for &arc in &arcs {
        ctx.vertices.get_mut(arc).parent = Some(vertex);
    }
    let vx = ctx.vertices.get_mut(vertex);
    vx.arcs = arcs;
    vx.value = value;
    vx.is_struct = is_struct;
    vx.is_list = is_list;
    vx.closed = closed;
    vx.allowed = allowed;
    vx.list_len = list_len;
    vx.ellipses = ellipses;
}
