//! Comprehension expansion.
//!
//! A comprehension is expanded all-or-nothing: the clause chain is walked
//! and every yield is buffered; only when the whole traversal completes are
//! the yielded bodies appended as conjuncts of the enclosing vertex. A
//! traversal that stalls on an unresolved source leaves no partial yields
//! behind, so the retry re-runs it from scratch.
//!
//! The `else` body is evaluated in the environment enclosing the
//! comprehension, with every clause-bound name poisoned: referencing an
//! iteration binding from `else` is an evaluation error, not a silent
//! lookup in an outer scope.

use crate::context::{EvalError, OpContext};
use crate::unify::ConjunctOutcome;
use confit_adt::{
    ArcType, Binding, Bottom, Clause, Comprehension, Conjunct, Environment, EnvId, Feature, Value,
    VertexId,
};

enum WalkOutcome {
    Done,
    Stalled(Bottom),
    Failed(Bottom),
}

/// Expands one comprehension conjunct attached to `vertex`.
pub(crate) fn expand(
    ctx: &mut OpContext,
    vertex: VertexId,
    comp: &Comprehension,
    conjunct: &Conjunct,
) -> Result<ConjunctOutcome, EvalError> {
    let mut yields = Vec::new();
    match walk(ctx, &comp.clauses, conjunct.env, &mut yields)? {
        WalkOutcome::Stalled(bottom) => return Ok(ConjunctOutcome::Stalled(bottom)),
        WalkOutcome::Failed(bottom) => {
            ctx.merge_scalar(vertex, Value::Bottom(bottom), conjunct.span);
            return Ok(ConjunctOutcome::Merged);
        }
        WalkOutcome::Done => {}
    }
    tracing::trace!(yields = yields.len(), "comprehension expanded");
    if yields.is_empty() {
        if let Some(else_body) = &comp.else_body {
            let else_env = ctx.new_env(Some(conjunct.env), None);
            for name in comp.bound_names() {
                ctx.envs.get_mut(else_env).bind(name, Binding::Forbidden);
            }
            ctx.vertices.get_mut(vertex).add_conjunct(Conjunct {
                expr: else_body.clone(),
                env: else_env,
                span: conjunct.span,
            });
        }
    } else {
        for env in yields {
            ctx.vertices.get_mut(vertex).add_conjunct(Conjunct {
                expr: comp.body.clone(),
                env,
                span: conjunct.span,
            });
        }
    }
    Ok(ConjunctOutcome::Merged)
}

fn walk(
    ctx: &mut OpContext,
    clauses: &[Clause],
    env: EnvId,
    yields: &mut Vec<EnvId>,
) -> Result<WalkOutcome, EvalError> {
    let Some((clause, rest)) = clauses.split_first() else {
        yields.push(env);
        return Ok(WalkOutcome::Done);
    };
    match clause {
        Clause::For { key, value, source } => {
            let source_value = match ctx.eval_expr(env, source, None)? {
                crate::context::EvalResult::Complete(v) => v.default().clone(),
                crate::context::EvalResult::Pending(bottom) => {
                    return Ok(WalkOutcome::Stalled(bottom))
                }
            };
            let elements = match source_value {
                Value::List(w) => collect_list(ctx, w),
                Value::Struct(w) => collect_struct(ctx, w),
                Value::Bottom(b) if b.is_incomplete() => return Ok(WalkOutcome::Stalled(b)),
                Value::Bottom(b) => return Ok(WalkOutcome::Failed(b)),
                other => {
                    return Ok(WalkOutcome::Failed(Bottom::eval(format!(
                        "cannot iterate over {other}"
                    ))))
                }
            };
            for (key_value, arc) in elements {
                let element = match ctx.vertex_value(arc)? {
                    crate::context::EvalResult::Complete(Value::Bottom(b)) => {
                        return Ok(WalkOutcome::Failed(b))
                    }
                    crate::context::EvalResult::Complete(v) => v,
                    crate::context::EvalResult::Pending(bottom) => {
                        return Ok(WalkOutcome::Stalled(bottom))
                    }
                };
                let frame = ctx.envs.add(Environment::new(Some(env), None));
                if let Some(key_name) = key {
                    ctx.envs
                        .get_mut(frame)
                        .bind(key_name.clone(), Binding::Value(key_value.clone()));
                }
                ctx.envs
                    .get_mut(frame)
                    .bind(value.clone(), Binding::Value(element));
                match walk(ctx, rest, frame, yields)? {
                    WalkOutcome::Done => {}
                    blocked => return Ok(blocked),
                }
            }
            Ok(WalkOutcome::Done)
        }
        Clause::If(cond) => {
            let cond_value = match ctx.eval_expr(env, cond, None)? {
                crate::context::EvalResult::Complete(v) => v.default().clone(),
                crate::context::EvalResult::Pending(bottom) => {
                    return Ok(WalkOutcome::Stalled(bottom))
                }
            };
            match cond_value {
                Value::Bool(true) => walk(ctx, rest, env, yields),
                Value::Bool(false) => Ok(WalkOutcome::Done),
                Value::Bottom(b) if b.is_incomplete() => Ok(WalkOutcome::Stalled(b)),
                Value::Bottom(b) => Ok(WalkOutcome::Failed(b)),
                other => Ok(WalkOutcome::Failed(Bottom::eval(format!(
                    "non-boolean comprehension condition {other}"
                )))),
            }
        }
        Clause::Let { name, value } => {
            let frame = ctx.envs.add(Environment::new(Some(env), None));
            ctx.envs.get_mut(frame).bind(
                name.clone(),
                Binding::Lazy {
                    expr: value.clone(),
                    env: frame,
                },
            );
            walk(ctx, rest, frame, yields)
        }
    }
}

/// List elements in index order, keyed by their integer index.
fn collect_list(ctx: &OpContext, source: VertexId) -> Vec<(Value, VertexId)> {
    ctx.vertices
        .get(source)
        .arcs
        .iter()
        .filter_map(|&arc| match ctx.vertices.get(arc).label {
            Feature::Index(i) => Some((Value::Int(i as i64), arc)),
            _ => None,
        })
        .collect()
}

/// Regular, non-optional struct fields in declaration order, keyed by name.
/// Definitions and hidden fields are not iterated.
fn collect_struct(ctx: &OpContext, source: VertexId) -> Vec<(Value, VertexId)> {
    ctx.vertices
        .get(source)
        .arcs
        .iter()
        .filter_map(|&arc| {
            let vx = ctx.vertices.get(arc);
            if vx.arc_type == ArcType::Optional || !vx.label.is_regular() {
                return None;
            }
            vx.label
                .name()
                .map(|name| (Value::Str(name.to_string()), arc))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::context::OpContext;
    use confit_adt::{
        ArcType, Clause, Comprehension, Conjunct, Decl, ErrorCode, Expr, Feature, ListLit, Op,
        StructLit, Value,
    };

    fn field(name: &str, value: std::sync::Arc<Expr>) -> Decl {
        Decl::Field {
            label: Feature::ident(name),
            arc: ArcType::Regular,
            value,
        }
    }

    #[test]
    fn for_over_list_yields_bodies() {
        // for x in [10] { a: x }
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let comp = Comprehension::new(
            vec![Clause::For {
                key: None,
                value: "x".into(),
                source: Expr::list_lit(ListLit::new(vec![Expr::int(10)])),
            }],
            Expr::struct_lit(StructLit::new(vec![field("a", Expr::reference("x"))])),
        );
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        let a = ctx.lookup_path(root, &[Feature::ident("a")]).expect("arc a");
        assert_eq!(ctx.vertex(a).value(), Some(&Value::Int(10)));
    }

    #[test]
    fn struct_iteration_binds_key_and_value() {
        // for k, v in {src: 7} { name: k, val: v }
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let source = StructLit::new(vec![field("src", Expr::int(7))]);
        let comp = Comprehension::new(
            vec![Clause::For {
                key: Some("k".into()),
                value: "v".into(),
                source: Expr::struct_lit(source),
            }],
            Expr::struct_lit(StructLit::new(vec![
                field("name", Expr::reference("k")),
                field("val", Expr::reference("v")),
            ])),
        );
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        let name = ctx
            .lookup_path(root, &[Feature::ident("name")])
            .expect("arc name");
        let val = ctx
            .lookup_path(root, &[Feature::ident("val")])
            .expect("arc val");
        assert_eq!(ctx.vertex(name).value(), Some(&Value::Str("src".into())));
        assert_eq!(ctx.vertex(val).value(), Some(&Value::Int(7)));
    }

    #[test]
    fn if_clause_filters_iterations() {
        // for x in [1, 9] if x > 5 { a: x }
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let comp = Comprehension::new(
            vec![
                Clause::For {
                    key: None,
                    value: "x".into(),
                    source: Expr::list_lit(ListLit::new(vec![Expr::int(1), Expr::int(9)])),
                },
                Clause::If(Expr::binop(Op::Gt, Expr::reference("x"), Expr::int(5))),
            ],
            Expr::struct_lit(StructLit::new(vec![field("a", Expr::reference("x"))])),
        );
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        let a = ctx.lookup_path(root, &[Feature::ident("a")]).expect("arc a");
        assert_eq!(ctx.vertex(a).value(), Some(&Value::Int(9)));
    }

    #[test]
    fn empty_source_triggers_else() {
        // for x in [] { x } else { "empty" }
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let comp = Comprehension::new(
            vec![Clause::For {
                key: None,
                value: "x".into(),
                source: Expr::list_lit(ListLit::new(vec![])),
            }],
            Expr::reference("x"),
        )
        .with_else(Expr::str("empty"));
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        assert_eq!(ctx.vertex(root).value(), Some(&Value::Str("empty".into())));
    }

    #[test]
    fn filtered_out_iterations_trigger_else() {
        // for x in [1, 2] if x > 5 { a: x } else { a: "none" }
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let comp = Comprehension::new(
            vec![
                Clause::For {
                    key: None,
                    value: "x".into(),
                    source: Expr::list_lit(ListLit::new(vec![Expr::int(1), Expr::int(2)])),
                },
                Clause::If(Expr::binop(Op::Gt, Expr::reference("x"), Expr::int(5))),
            ],
            Expr::struct_lit(StructLit::new(vec![field("a", Expr::reference("x"))])),
        )
        .with_else(Expr::struct_lit(StructLit::new(vec![field(
            "a",
            Expr::str("none"),
        )])));
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        let a = ctx.lookup_path(root, &[Feature::ident("a")]).expect("arc a");
        assert_eq!(ctx.vertex(a).value(), Some(&Value::Str("none".into())));
    }

    #[test]
    fn yields_suppress_else() {
        // for x in [3] { a: x } else { a: "none" }
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let comp = Comprehension::new(
            vec![Clause::For {
                key: None,
                value: "x".into(),
                source: Expr::list_lit(ListLit::new(vec![Expr::int(3)])),
            }],
            Expr::struct_lit(StructLit::new(vec![field("a", Expr::reference("x"))])),
        )
        .with_else(Expr::struct_lit(StructLit::new(vec![field(
            "a",
            Expr::str("none"),
        )])));
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        let a = ctx.lookup_path(root, &[Feature::ident("a")]).expect("arc a");
        assert_eq!(ctx.vertex(a).value(), Some(&Value::Int(3)));
    }

    #[test]
    fn else_cannot_see_clause_bindings() {
        // for x in [] { x } else { a: x } -- x is poisoned in the else body
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let comp = Comprehension::new(
            vec![Clause::For {
                key: None,
                value: "x".into(),
                source: Expr::list_lit(ListLit::new(vec![])),
            }],
            Expr::reference("x"),
        )
        .with_else(Expr::struct_lit(StructLit::new(vec![field(
            "a",
            Expr::reference("x"),
        )])));
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        let a = ctx.lookup_path(root, &[Feature::ident("a")]).expect("arc a");
        let bottom = ctx.vertex(a).bottom().expect("bottom");
        assert_eq!(bottom.code, ErrorCode::Eval);
    }

    #[test]
    fn let_clause_binds_per_iteration() {
        // for x in [4] let y = x + 1 { a: y }
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let comp = Comprehension::new(
            vec![
                Clause::For {
                    key: None,
                    value: "x".into(),
                    source: Expr::list_lit(ListLit::new(vec![Expr::int(4)])),
                },
                Clause::Let {
                    name: "y".into(),
                    value: Expr::binop(Op::Add, Expr::reference("x"), Expr::int(1)),
                },
            ],
            Expr::struct_lit(StructLit::new(vec![field("a", Expr::reference("y"))])),
        );
        ctx.add_conjunct(root, Conjunct::new(Expr::comprehension(comp), env));
        ctx.finalize_tree(root).expect("finalize");
        let a = ctx.lookup_path(root, &[Feature::ident("a")]).expect("arc a");
        assert_eq!(ctx.vertex(a).value(), Some(&Value::Int(5)));
    }
}
